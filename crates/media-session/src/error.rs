//! Error types and handling for the media session core.
//!
//! Categories follow the failure surfaces of the protocol:
//!
//! - **Network** - the SIP transport failed; the call is torn down.
//! - **Protocol** - malformed SDP or XML, unexpected SIP response,
//!   framing violation; answered with 488 where a dialog exists.
//! - **Policy** - encryption requirements of the two ends cannot be
//!   reconciled.
//! - **Peer** - the remote side declined, is busy or unavailable.
//! - **Local** - resource setup failed on our side (ports, codecs).

use thiserror::Error;

/// Errors produced by the media session core.
#[derive(Debug, Error)]
pub enum Error {
    /// SIP transport failure.
    #[error("transport failure: {0}")]
    Network(String),

    /// Malformed SDP/XML or an unexpected SIP message.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Peer encryption policy is incompatible with ours.
    #[error("encryption levels not compatible")]
    EncryptionIncompatible,

    /// The remote side declined, is busy or unavailable.
    #[error("peer error: {0}")]
    Peer(String),

    /// Only one audio call may exist at a time.
    #[error("another audio call is in progress")]
    AudioCallExists,

    /// The backend could not create a stream.
    #[error("error creating {0} stream")]
    StreamCreation(String),

    /// No call is known under this Call-ID.
    #[error("no call with id {0}")]
    UnknownCall(String),

    /// SDP codec error.
    #[error(transparent)]
    Sdp(#[from] ucsip_sdp_core::Error),
}

/// Result type for media session operations.
pub type Result<T> = std::result::Result<T, Error>;
