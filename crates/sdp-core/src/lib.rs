//! SDP model and wire codec for the media profile spoken by OCS 2007,
//! Lync and Skype for Business peers.
//!
//! The model mirrors what the call layer negotiates: media sections with
//! ICE candidates (both the legacy draft-6 encoding and RFC 5245), codecs
//! keyed by payload type, and the handful of vendor attributes the servers
//! understand (`encryption`, `x-applicationsharing-*`, ...). Parsing and
//! serialization cover exactly this profile, not general RFC 4566.

// Error handling
pub mod error;

// ICE candidates
pub mod candidate;

// Codec descriptions
pub mod codec;

// Media sections
pub mod media;

// Whole-message model
pub mod message;

// Wire codec
pub mod parser;
pub mod serializer;

// Public exports
pub use candidate::{CandidateType, Component, SdpCandidate, TransportProtocol};
pub use codec::{MediaType, SdpCodec};
pub use error::{Error, Result};
pub use media::{SdpAttribute, SdpMedia};
pub use message::{IceVersion, SdpMessage};
pub use parser::parse_sdp;
pub use serializer::serialize_sdp;

/// Re-export of common types and functions
pub mod prelude {
    pub use super::{
        parse_sdp, serialize_sdp, CandidateType, Component, Error, IceVersion, MediaType,
        SdpAttribute, SdpCandidate, SdpCodec, SdpMedia, SdpMessage, TransportProtocol,
    };
}
