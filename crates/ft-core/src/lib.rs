//! Lync 2010 file-transfer overlay and inbound SIP dispatch.
//!
//! File transfers ride on a hidden media call carrying a single `data`
//! stream: an XML control plane (requests, responses, notifies over SIP
//! INFO) multiplexed with a length-prefixed binary data plane over the
//! ICE-negotiated stream. This crate owns both, plus the glue that
//! decides whether an inbound INVITE/INFO/CANCEL belongs to the call
//! manager or to a transfer.

// Error handling
pub mod error;

// ms-filetransfer+xml control documents
pub mod xml;

// Data-plane chunk framing
pub mod framing;

// Transfer state
pub mod transfer;

// Inbound message routing and event pump
pub mod dispatch;

// Public exports
pub use dispatch::{Dispatcher, FileTransferBackend, UploadProgress};
pub use error::{Error, Result};
pub use framing::{ChunkReader, ChunkEvent, CHUNK_DATA, CHUNK_STREAM_END, CHUNK_STREAM_START};
pub use transfer::{Direction, FileTransfer};
pub use xml::{FtControl, RequestBody};
