//! Binary framing of the data plane.
//!
//! Every chunk is `type(u8) || size(u16 big-endian) || payload`. Types
//! `0x01`/`0x02` bracket a stream and carry the ASCII decimal requestId
//! as payload; `0x00` carries file bytes. A transfer's chunk sequence
//! is exactly one `0x01`, any number of `0x00`, one `0x02`.

use bytes::{BufMut, BytesMut};
use tracing::debug;

/// File data chunk.
pub const CHUNK_DATA: u8 = 0x00;
/// Start of a stream; payload is the ASCII requestId.
pub const CHUNK_STREAM_START: u8 = 0x01;
/// End of a stream; payload is the ASCII requestId.
pub const CHUNK_STREAM_END: u8 = 0x02;

/// Scratch size for data reads; payload chunks never exceed the u16
/// size field anyway.
const READ_BUFFER_LEN: usize = 0x800;

/// One decoded framing event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    /// `0x01`: a stream opened for the given requestId.
    StreamStart(String),
    /// `0x02`: the stream for the given requestId is complete.
    StreamEnd(String),
    /// `0x00`: file bytes (possibly a fragment of the current chunk).
    Data(Vec<u8>),
}

/// Re-entrant chunk decoder.
///
/// `on_readable` performs at most one decoding step per invocation,
/// mirroring one readable notification from the engine: a header is
/// consumed with blocking reads, but a data payload may arrive in
/// fragments across invocations. The `read` callback wraps the engine's
/// stream read; its second argument is the blocking flag.
#[derive(Debug, Default)]
pub struct ChunkReader {
    /// Bytes of the current data chunk still outstanding.
    expecting: u16,
}

impl ChunkReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_readable(
        &mut self,
        read: &mut dyn FnMut(&mut [u8], bool) -> usize,
    ) -> Option<ChunkEvent> {
        if self.expecting == 0 {
            let mut type_buf = [0u8; 1];
            read(&mut type_buf, true);
            let mut size_buf = [0u8; 2];
            read(&mut size_buf, true);
            let size = u16::from_be_bytes(size_buf);

            match type_buf[0] {
                CHUNK_STREAM_START => {
                    let mut payload = vec![0u8; size as usize];
                    read(&mut payload, true);
                    let request_id = String::from_utf8_lossy(&payload).to_string();
                    debug!(request_id = %request_id, "received new stream");
                    Some(ChunkEvent::StreamStart(request_id))
                }
                CHUNK_STREAM_END => {
                    let mut payload = vec![0u8; size as usize];
                    read(&mut payload, true);
                    let request_id = String::from_utf8_lossy(&payload).to_string();
                    debug!(request_id = %request_id, "received end of stream");
                    Some(ChunkEvent::StreamEnd(request_id))
                }
                CHUNK_DATA => {
                    debug!(size, "received new data chunk");
                    // Readable fires again for the payload bytes.
                    self.expecting = size;
                    None
                }
                other => {
                    debug!(chunk_type = other, "ignoring unknown chunk type");
                    None
                }
            }
        } else {
            let len = (self.expecting as usize).min(READ_BUFFER_LEN);
            let mut buffer = vec![0u8; len];
            let n = read(&mut buffer, false);
            buffer.truncate(n);
            self.expecting -= n as u16;
            debug!(read = n, remaining = self.expecting, "read data fragment");
            Some(ChunkEvent::Data(buffer))
        }
    }
}

/// Encodes one chunk into the wire framing.
pub fn encode_chunk(chunk_type: u8, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(3 + payload.len());
    buf.put_u8(chunk_type);
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    buf
}
