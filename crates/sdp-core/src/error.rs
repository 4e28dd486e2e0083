//! Error types for SDP parsing and serialization.

use thiserror::Error;

/// Errors produced by the SDP codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A line did not match the `<key>=<value>` SDP shape.
    #[error("invalid SDP line: {0}")]
    InvalidLine(String),

    /// An `a=candidate` attribute could not be decoded.
    #[error("invalid candidate attribute: {0}")]
    InvalidCandidate(String),

    /// An `m=` section was malformed.
    #[error("invalid media description: {0}")]
    InvalidMedia(String),

    /// A mandatory session-level field was absent.
    #[error("missing mandatory field: {0}")]
    MissingField(&'static str),
}

/// Result type for SDP operations.
pub type Result<T> = std::result::Result<T, Error>;
