//! Per-transfer state.

use crate::framing::ChunkReader;

/// Which way the file moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The peer published a file; we download it.
    Incoming,
    /// We published a file; the peer downloads it.
    Outgoing,
}

/// One file transfer riding on a hidden data session.
///
/// The struct is shared between the dispatcher's transfer table and the
/// data stream's opaque slot (`Rc<RefCell<..>>`); whichever side is
/// reached first finds the same state. Control-plane correlation runs
/// on `request_id`: inbound responses and notifies with a different id
/// are silently ignored.
pub struct FileTransfer {
    /// Call-ID of the owning data session.
    pub call_id: String,
    pub direction: Direction,
    pub file_name: String,
    /// Opaque GUID assigned by the publishing side.
    pub file_id: String,
    pub file_size: u64,
    /// Last requestId used on this transfer.
    pub request_id: u32,
    /// Locally cancelled; inbound data is drained and discarded until
    /// the control plane finishes.
    pub was_cancelled: bool,

    pub(crate) reader: ChunkReader,
    pub(crate) bytes_received: u64,
    pub(crate) progress_notified: bool,
    pub(crate) upload_started: bool,
    pub(crate) upload_finished: bool,
}

impl FileTransfer {
    pub(crate) fn new_incoming(
        call_id: &str,
        request_id: u32,
        file_id: &str,
        file_name: &str,
        file_size: u64,
    ) -> Self {
        Self {
            call_id: call_id.to_string(),
            direction: Direction::Incoming,
            file_name: file_name.to_string(),
            file_id: file_id.to_string(),
            file_size,
            request_id,
            was_cancelled: false,
            reader: ChunkReader::new(),
            bytes_received: 0,
            progress_notified: false,
            upload_started: false,
            upload_finished: false,
        }
    }

    pub(crate) fn new_outgoing(
        call_id: &str,
        request_id: u32,
        file_id: &str,
        file_name: &str,
        file_size: u64,
    ) -> Self {
        Self {
            call_id: call_id.to_string(),
            direction: Direction::Outgoing,
            file_name: file_name.to_string(),
            file_id: file_id.to_string(),
            file_size,
            request_id,
            was_cancelled: false,
            reader: ChunkReader::new(),
            bytes_received: 0,
            progress_notified: false,
            upload_started: false,
            upload_finished: false,
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn upload_finished(&self) -> bool {
        self.upload_finished
    }
}
