//! Inbound message routing and the transfer state machines.
//!
//! The dispatcher sits on top of the call manager: it sniffs inbound
//! INVITEs for file-transfer offers, routes INFO control documents to
//! the right transfer, and reacts to the manager's session events
//! (candidate pair established, stream readable, call rejected) by
//! draining them in an explicit loop after each protocol step.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rand::Rng;
use tracing::{debug, info, warn};
use ucsip_media_session::multipart::parse_multipart;
use ucsip_media_session::{
    MediaSessionManager, SessionEvent, SipMessage, TransactionKey,
};
use ucsip_sdp_core::{IceVersion, MediaType};

use crate::error::{Error, Result};
use crate::framing::{self, ChunkEvent, CHUNK_DATA, CHUNK_STREAM_END, CHUNK_STREAM_START};
use crate::transfer::{Direction, FileTransfer};
use crate::xml::{self, FtControl, RequestBody, OUTGOING_FILE_ID};

/// Content type of the file-transfer control plane.
const FT_CONTENT_TYPE: &str = "application/ms-filetransfer+xml";

/// Upload chunk size; one chunk is written per drive step.
const UPLOAD_CHUNK_LEN: usize = 1024;

/// The local file side of a transfer (the embedder's file store/UI).
pub trait FileTransferBackend {
    /// Announces an inbound offer; the user decides via
    /// [`Dispatcher::accept_transfer`] / [`Dispatcher::cancel_transfer`].
    fn incoming_transfer(&mut self, call_id: &str, with: &str, file_name: &str, file_size: u64);
    /// Opens the local file for reading or writing.
    fn start(&mut self, call_id: &str);
    fn write_file(&mut self, call_id: &str, data: &[u8]);
    fn read_file(&mut self, call_id: &str, buf: &mut [u8]) -> usize;
    /// All file bytes have been read out for sending.
    fn is_completed(&self, call_id: &str) -> bool;
    /// The remote side cancelled the transfer.
    fn cancel_remote(&mut self, call_id: &str);
}

/// Progress of the cooperative upload loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadProgress {
    /// A chunk was written; call again when the stream is writable.
    Continue,
    /// The end-of-stream marker was written.
    Done,
    /// Nothing to write right now.
    Idle,
}

/// Transactions the file-transfer layer tracks itself.
enum FtTransaction {
    /// Our cancelTransfer request; its response completes the cancel.
    CancelRequest { call_id: String },
    /// Our failure/requestCancelled response to a peer cancel.
    CancelResponse { call_id: String },
}

/// Routes inbound SIP messages and session events between the call
/// manager and the file-transfer overlay.
pub struct Dispatcher {
    manager: MediaSessionManager,
    ft_backend: Box<dyn FileTransferBackend>,
    /// One transfer per data session, keyed by Call-ID. The same state
    /// also hangs off the call's data stream as opaque user data.
    transfers: HashMap<String, Rc<RefCell<FileTransfer>>>,
    pending: HashMap<TransactionKey, FtTransaction>,
}

impl Dispatcher {
    pub fn new(manager: MediaSessionManager, ft_backend: Box<dyn FileTransferBackend>) -> Self {
        Self {
            manager,
            ft_backend,
            transfers: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn manager(&self) -> &MediaSessionManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut MediaSessionManager {
        &mut self.manager
    }

    pub fn transfer(&self, call_id: &str) -> Option<Rc<RefCell<FileTransfer>>> {
        self.transfers.get(call_id).cloned()
    }

    // ------------------------------------------------------------------
    // Inbound routing
    // ------------------------------------------------------------------

    /// Routes an inbound INVITE: file-transfer offers go through the
    /// transfer setup path, everything else to the call manager.
    pub fn handle_invite(&mut self, msg: &SipMessage) -> Option<String> {
        let content_type = msg.header("Content-Type").unwrap_or("").to_string();

        if content_type.starts_with("multipart/mixed") {
            let parts = parse_multipart(&content_type, &msg.body);

            let publish = parts
                .iter()
                .find(|p| p.content_type.starts_with(FT_CONTENT_TYPE))
                .and_then(|p| xml::parse_control(&p.body).ok())
                .and_then(|control| match control {
                    FtControl::Request {
                        request_id,
                        body:
                            RequestBody::PublishFile {
                                file_id,
                                file_name,
                                file_size,
                            },
                    } => Some((request_id, file_id, file_name, file_size)),
                    _ => None,
                });

            if let Some((request_id, file_id, file_name, file_size)) = publish {
                let sdp = parts
                    .iter()
                    .find(|p| p.content_type.starts_with("application/sdp"))
                    .map(|p| p.body.clone());
                return self.handle_ft_invite(
                    msg, request_id, file_id, file_name, file_size, sdp,
                );
            }
        }

        self.manager.process_incoming_invite(msg)
    }

    fn handle_ft_invite(
        &mut self,
        msg: &SipMessage,
        request_id: u32,
        file_id: String,
        file_name: String,
        file_size: u64,
        sdp: Option<String>,
    ) -> Option<String> {
        let sdp = match sdp {
            Some(sdp) if !file_name.is_empty() && file_size != 0 => sdp,
            _ => {
                self.manager.respond(msg, 488, "Not Acceptable Here");
                return None;
            }
        };

        // Hand the call manager the INVITE with the SDP part spliced in
        // as its body; it creates the hidden data session.
        let mut spliced = msg.clone();
        spliced.body = sdp;

        let call_id = match self.manager.process_incoming_invite(&spliced) {
            Some(id) => id,
            None => {
                self.manager.respond(msg, 500, "Server Internal Error");
                return None;
            }
        };

        let with = self
            .manager
            .call(&call_id)
            .map(|c| c.with.clone())
            .unwrap_or_default();

        info!(call_id = %call_id, file_name = %file_name, file_size, "incoming file transfer");

        let transfer = Rc::new(RefCell::new(FileTransfer::new_incoming(
            &call_id, request_id, &file_id, &file_name, file_size,
        )));
        self.manager
            .stream_set_data(&call_id, "data", Some(Box::new(Rc::clone(&transfer))));
        self.transfers.insert(call_id.clone(), transfer);

        self.ft_backend
            .incoming_transfer(&call_id, &with, &file_name, file_size);

        Some(call_id)
    }

    /// Routes an inbound INFO. Returns false when the message belongs
    /// to no transfer (so the embedder can try other consumers).
    pub fn handle_info(&mut self, msg: &SipMessage) -> bool {
        let call_id = match msg.call_id() {
            Some(id) => id.to_string(),
            None => return false,
        };

        let transfer = match self.transfers.get(&call_id) {
            Some(t) => Rc::clone(t),
            None => return false,
        };

        let control = match xml::parse_control(&msg.body) {
            Ok(c) => c,
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "undecodable file-transfer INFO");
                return true;
            }
        };

        self.manager.respond(msg, 200, "OK");

        let direction = transfer.borrow().direction;
        match (direction, control) {
            (Direction::Incoming, FtControl::Response { request_id, code, reason }) => {
                self.process_response(&call_id, &transfer, request_id, &code, reason.as_deref());
            }
            (
                Direction::Outgoing,
                FtControl::Request {
                    request_id,
                    body: RequestBody::DownloadFile,
                },
            ) => {
                self.process_download_request(&call_id, &transfer, request_id);
            }
            (
                Direction::Outgoing,
                FtControl::Request {
                    body: RequestBody::CancelTransfer,
                    ..
                },
            ) => {
                self.process_cancel_request(&call_id, &transfer);
            }
            (Direction::Outgoing, FtControl::Notify { progress_to }) => {
                self.process_notify(&call_id, &transfer, progress_to);
            }
            _ => {}
        }

        true
    }

    /// Routes an inbound CANCEL to the call manager.
    pub fn handle_cancel(&mut self, msg: &SipMessage) {
        self.manager.process_incoming_cancel(msg);
    }

    /// Feeds a transaction response, trying the transfer layer's own
    /// transactions first, then the call manager's.
    pub fn process_transaction_response(&mut self, key: TransactionKey, msg: &SipMessage) -> bool {
        if let Some(transaction) = self.pending.remove(&key) {
            if msg.response.map_or(false, |code| code < 200) {
                self.pending.insert(key, transaction);
                return true;
            }
            match transaction {
                FtTransaction::CancelRequest { call_id }
                | FtTransaction::CancelResponse { call_id } => {
                    self.deallocate(&call_id);
                }
            }
            return true;
        }

        self.manager.process_transaction_response(key, msg)
    }

    // ------------------------------------------------------------------
    // Event pump
    // ------------------------------------------------------------------

    /// Drains the manager's event queue, handling what concerns the
    /// transfer layer; all events are returned for the embedder.
    pub fn pump(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();

        while let Some(event) = self.manager.poll_event() {
            match &event {
                SessionEvent::CandidatePairEstablished { call_id, stream_id }
                    if stream_id == "data" =>
                {
                    self.on_data_channel_ready(call_id.clone());
                }
                SessionEvent::StreamReadable { call_id, stream_id } if stream_id == "data" => {
                    self.on_data_readable(call_id.clone());
                }
                SessionEvent::CallRejected { call_id, local } => {
                    if !*local && self.transfers.contains_key(call_id) {
                        self.ft_backend.cancel_remote(call_id);
                    }
                }
                SessionEvent::CallEnded { call_id } => {
                    self.transfers.remove(call_id);
                }
                _ => {}
            }
            out.push(event);
        }

        out
    }

    // ------------------------------------------------------------------
    // Download flow (we are the receiver)
    // ------------------------------------------------------------------

    /// The user accepted an announced inbound transfer.
    pub fn accept_transfer(&mut self, call_id: &str) {
        self.manager.accept_call(call_id);
    }

    fn on_data_channel_ready(&mut self, call_id: String) {
        let transfer = match self.transfers.get(&call_id) {
            Some(t) => Rc::clone(t),
            None => return,
        };

        let (request_id, file_id, file_name) = {
            let t = transfer.borrow();
            if t.direction != Direction::Incoming {
                return;
            }
            (t.request_id, t.file_id.clone(), t.file_name.clone())
        };

        // Acknowledge the publish, then ask for the file.
        let _ = self
            .manager
            .send_info(&call_id, FT_CONTENT_TYPE, &xml::success_response(request_id));

        let download_id = request_id + 1;
        transfer.borrow_mut().request_id = download_id;
        let _ = self.manager.send_info(
            &call_id,
            FT_CONTENT_TYPE,
            &xml::download_file_request(download_id, &file_id, &file_name),
        );
    }

    fn on_data_readable(&mut self, call_id: String) {
        let transfer = match self.transfers.get(&call_id) {
            Some(t) => Rc::clone(t),
            None => return,
        };

        if transfer.borrow().was_cancelled {
            // Just drop the incoming data.
            let mut scratch = [0u8; 0x800];
            self.manager
                .backend_mut()
                .read(&call_id, "data", &mut scratch, false);
            return;
        }

        let event = {
            let mut t = transfer.borrow_mut();
            let backend = self.manager.backend_mut();
            let mut read =
                |buf: &mut [u8], blocking: bool| backend.read(&call_id, "data", buf, blocking);
            t.reader.on_readable(&mut read)
        };

        match event {
            Some(ChunkEvent::StreamStart(request_id)) => {
                debug!(call_id = %call_id, request_id = %request_id, "data stream opened");
                self.ft_backend.start(&call_id);
            }
            Some(ChunkEvent::Data(bytes)) => {
                self.ft_backend.write_file(&call_id, &bytes);

                let complete = {
                    let mut t = transfer.borrow_mut();
                    t.bytes_received += bytes.len() as u64;
                    !t.progress_notified && t.bytes_received >= t.file_size
                };

                if complete {
                    let (request_id, file_size) = {
                        let mut t = transfer.borrow_mut();
                        t.progress_notified = true;
                        (t.request_id, t.file_size)
                    };
                    let notify_id: u32 = rand::thread_rng().gen();
                    let _ = self.manager.send_info(
                        &call_id,
                        FT_CONTENT_TYPE,
                        &xml::transfer_progress_notify(notify_id, request_id, file_size),
                    );
                    // The transfer stays alive until the peer confirms
                    // with a success response and hangs up.
                }
            }
            Some(ChunkEvent::StreamEnd(request_id)) => {
                debug!(call_id = %call_id, request_id = %request_id, "data stream complete");
            }
            None => {}
        }
    }

    fn process_response(
        &mut self,
        call_id: &str,
        transfer: &Rc<RefCell<FileTransfer>>,
        request_id: u32,
        code: &str,
        reason: Option<&str>,
    ) {
        {
            let t = transfer.borrow();
            if request_id != t.request_id {
                debug!(call_id = %call_id, request_id, "response for foreign requestId ignored");
                return;
            }
        }

        match code {
            "success" => {
                // The sender acknowledged completion; it will also send
                // the BYE, so only release our state.
                self.transfers.remove(call_id);
            }
            "failure" => {
                if reason == Some("requestCancelled") && !transfer.borrow().was_cancelled {
                    self.ft_backend.cancel_remote(call_id);
                }
            }
            _ => {}
        }
    }

    /// Receiver-side local cancel: tell the peer, keep draining bytes,
    /// tear down once the peer answers.
    pub fn cancel_transfer(&mut self, call_id: &str) -> Result<()> {
        let transfer = self
            .transfers
            .get(call_id)
            .cloned()
            .ok_or_else(|| Error::UnknownTransfer(call_id.to_string()))?;

        let (request_id, transfer_id, file_id, file_name) = {
            let mut t = transfer.borrow_mut();
            if t.was_cancelled {
                return Ok(());
            }
            t.was_cancelled = true;
            (
                t.request_id + 1,
                t.request_id,
                t.file_id.clone(),
                t.file_name.clone(),
            )
        };

        let body = xml::cancel_transfer_request(request_id, transfer_id, &file_id, &file_name);
        let key = self.manager.send_info(call_id, FT_CONTENT_TYPE, &body)?;
        self.pending
            .insert(key, FtTransaction::CancelRequest { call_id: call_id.to_string() });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Upload flow (we are the sender)
    // ------------------------------------------------------------------

    /// Publishes a file towards `with` on a fresh data session.
    pub fn send_file(&mut self, with: &str, file_name: &str, file_size: u64) -> Result<String> {
        let call_id = self
            .manager
            .data_session_new_outgoing(with, IceVersion::Rfc5245)?;

        if let Err(e) = self.manager.add_stream(
            &call_id,
            "data",
            MediaType::Application,
            IceVersion::Rfc5245,
            true,
        ) {
            self.manager
                .notify_error("Error occurred", "Error creating data stream");
            self.manager.backend_mut().hangup(&call_id, false);
            self.manager.on_media_end(&call_id);
            return Err(e.into());
        }

        self.manager
            .stream_add_extra_attribute(&call_id, "data", "sendonly", "");
        self.manager
            .stream_add_extra_attribute(&call_id, "data", "mid", "1");

        let request_id = self.manager.next_ft_request_id();
        let part = format!(
            "Content-Type: {}\r\n\
             Content-Transfer-Encoding: 7bit\r\n\
             Content-Disposition: render; handling=optional\r\n\
             \r\n\
             {}\r\n",
            FT_CONTENT_TYPE,
            xml::publish_file_request(request_id, OUTGOING_FILE_ID, file_name, file_size)
        );
        self.manager
            .add_extra_invite_section(&call_id, "multipart/mixed", &part);

        let transfer = Rc::new(RefCell::new(FileTransfer::new_outgoing(
            &call_id,
            request_id,
            OUTGOING_FILE_ID,
            file_name,
            file_size,
        )));
        self.manager
            .stream_set_data(&call_id, "data", Some(Box::new(Rc::clone(&transfer))));
        self.transfers.insert(call_id.clone(), transfer);

        // The INVITE goes out once the data stream initializes.
        Ok(call_id)
    }

    fn process_download_request(
        &mut self,
        call_id: &str,
        transfer: &Rc<RefCell<FileTransfer>>,
        request_id: u32,
    ) {
        transfer.borrow_mut().request_id = request_id;

        let _ = self
            .manager
            .send_info(call_id, FT_CONTENT_TYPE, &xml::pending_response(request_id));

        // Open the data plane: stream-start header, then the chunk loop
        // runs from drive_upload.
        let header = framing::encode_chunk(CHUNK_STREAM_START, request_id.to_string().as_bytes());
        self.manager
            .backend_mut()
            .write(call_id, "data", &header, true);
        self.ft_backend.start(call_id);
        transfer.borrow_mut().upload_started = true;
    }

    /// Writes one file chunk. The embedder keeps calling while the
    /// stream is writable, yielding between chunks.
    pub fn drive_upload(&mut self, call_id: &str) -> UploadProgress {
        let transfer = match self.transfers.get(call_id) {
            Some(t) => Rc::clone(t),
            None => return UploadProgress::Idle,
        };

        {
            let t = transfer.borrow();
            if !t.upload_started || t.upload_finished || t.was_cancelled {
                return UploadProgress::Idle;
            }
        }

        let mut buffer = [0u8; UPLOAD_CHUNK_LEN];
        let n = self.ft_backend.read_file(call_id, &mut buffer);
        if n != 0 {
            let chunk = framing::encode_chunk(CHUNK_DATA, &buffer[..n]);
            self.manager
                .backend_mut()
                .write(call_id, "data", &chunk, true);
        }

        if self.ft_backend.is_completed(call_id) {
            let request_id = transfer.borrow().request_id;
            let end = framing::encode_chunk(CHUNK_STREAM_END, request_id.to_string().as_bytes());
            self.manager.backend_mut().write(call_id, "data", &end, true);
            transfer.borrow_mut().upload_finished = true;
            return UploadProgress::Done;
        }

        UploadProgress::Continue
    }

    fn process_notify(
        &mut self,
        call_id: &str,
        transfer: &Rc<RefCell<FileTransfer>>,
        progress_to: Option<u64>,
    ) {
        let (request_id, file_size) = {
            let t = transfer.borrow();
            (t.request_id, t.file_size)
        };

        if progress_to == Some(file_size.saturating_sub(1)) {
            let _ = self
                .manager
                .send_info(call_id, FT_CONTENT_TYPE, &xml::success_response(request_id));
            // The receiver has everything; hang up and release.
            self.deallocate(call_id);
        }
    }

    /// Peer cancelled our upload: confirm with failure/requestCancelled,
    /// then tear the dialog down once that INFO is answered.
    fn process_cancel_request(&mut self, call_id: &str, transfer: &Rc<RefCell<FileTransfer>>) {
        {
            let mut t = transfer.borrow_mut();
            if t.was_cancelled {
                return;
            }
            t.was_cancelled = true;
        }

        let request_id = transfer.borrow().request_id;
        if let Ok(key) = self
            .manager
            .send_info(call_id, FT_CONTENT_TYPE, &xml::cancelled_response(request_id))
        {
            self.pending
                .insert(key, FtTransaction::CancelResponse { call_id: call_id.to_string() });
        }
        self.ft_backend.cancel_remote(call_id);
    }

    fn deallocate(&mut self, call_id: &str) {
        self.transfers.remove(call_id);
        if self.manager.call(call_id).is_some() {
            // Also hangs up the call and sends BYE to the other party.
            self.manager.hangup_call(call_id);
        }
    }
}
