//! Call lifecycle and media negotiation core for OCS / Lync / Skype for
//! Business interop.
//!
//! This crate owns the per-call state machine: SDP offer/answer with ICE
//! candidates, retry across ICE protocol revisions, hold/resume,
//! encryption-policy compatibility, multipart INVITE composition, and
//! the A/V Edge (MRAS) credential exchange. It performs no I/O itself —
//! the SIP transport, the ICE/RTP engine, DNS and user notification are
//! capabilities injected by the embedder, and every suspension point of
//! the protocol is an explicit method on [`MediaSessionManager`] driven
//! from the embedder's single-threaded event loop.

// Error handling
pub mod error;

// Configuration surface
pub mod config;

// Capability traits
pub mod backend;
pub mod transport;

// Session events for the overlay layers
pub mod events;

// SDP <-> backend translation with vendor workarounds
pub mod bridge;

// Per-stream state
pub mod stream;

// Per-call state
pub mod call;

// A/V Edge relay credentials
pub mod relay;

// Multipart INVITE bodies
pub mod multipart;

// The call manager
pub mod manager;

// Public exports
pub use backend::{BackendCandidate, BackendCodec, DnsQueryHandle, DnsResolver, MediaBackend, Notifier};
pub use call::MediaCall;
pub use config::{EncryptionPolicy, MediaConfig};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use manager::MediaSessionManager;
pub use relay::{MediaRelay, RelayCredentials};
pub use stream::{MediaStream, SRTP_KEY_LEN};
pub use transport::{Dialog, SipMessage, SipTransport, TransactionKey};

/// Re-export of common types and functions
pub mod prelude {
    pub use super::{
        BackendCandidate, BackendCodec, Dialog, DnsResolver, EncryptionPolicy, Error, MediaBackend,
        MediaCall, MediaConfig, MediaRelay, MediaSessionManager, MediaStream, Notifier,
        RelayCredentials, SessionEvent, SipMessage, SipTransport, TransactionKey,
    };
    pub use ucsip_sdp_core::prelude::*;
}
