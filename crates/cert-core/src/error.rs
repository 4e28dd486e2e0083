//! Error types for certificate operations.

use thiserror::Error;

/// Errors produced while generating or handling certificate material.
#[derive(Debug, Error)]
pub enum Error {
    /// RSA key pair generation failed.
    #[error("key pair generation failed: {0}")]
    KeyGeneration(String),

    /// The generated key could not be handed to the certificate builder.
    #[error("key encoding failed: {0}")]
    KeyEncoding(String),

    /// Building or signing a certificate or certificate request failed.
    #[error("certificate assembly failed: {0}")]
    Assembly(#[from] rcgen::Error),

    /// A base64 payload did not decode.
    #[error("invalid base64 certificate payload")]
    InvalidBase64,

    /// DER bytes did not parse as an X.509 certificate.
    #[error("certificate decoding failed")]
    InvalidCertificate,
}

/// Result type for certificate operations.
pub type Result<T> = std::result::Result<T, Error>;
