//! Error types for the file-transfer overlay.

use thiserror::Error;

/// Errors produced by the file-transfer layer.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying media call failed.
    #[error(transparent)]
    Media(#[from] ucsip_media_session::Error),

    /// A control document did not parse or lacked required fields.
    #[error("malformed ms-filetransfer document: {0}")]
    Xml(String),

    /// The INVITE was not a valid file-transfer offer.
    #[error("not a file-transfer invitation: {0}")]
    Invitation(String),

    /// No transfer is attached to this call.
    #[error("no transfer on call {0}")]
    UnknownTransfer(String),
}

/// Result type for file-transfer operations.
pub type Result<T> = std::result::Result<T, Error>;
