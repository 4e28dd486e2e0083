//! Mock capability implementations shared by the integration tests.
//!
//! Each mock logs what the manager asked of it into an `Rc<RefCell<..>>`
//! the test keeps a handle on; state mutation helpers let tests stage
//! engine behavior (gathered candidates, initialization, read buffers).

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use ucsip_media_session::backend::DnsQueryHandle;
use ucsip_media_session::prelude::*;

// ----------------------------------------------------------------------
// SIP transport
// ----------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SentRequest {
    pub call_id: String,
    pub to: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub key: TransactionKey,
    pub cseq: u32,
}

impl SentRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SentResponse {
    pub call_id: String,
    pub code: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl SentResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
pub struct TransportLog {
    next_key: TransactionKey,
    pub invites: Vec<SentRequest>,
    pub infos: Vec<SentRequest>,
    pub services: Vec<SentRequest>,
    pub responses: Vec<SentResponse>,
    pub acks: Vec<(String, u32)>,
    pub byes: Vec<String>,
}

pub struct MockTransport {
    pub log: Rc<RefCell<TransportLog>>,
}

impl SipTransport for MockTransport {
    fn invite(
        &mut self,
        dialog: &mut Dialog,
        headers: &[(String, String)],
        body: &str,
    ) -> TransactionKey {
        let mut log = self.log.borrow_mut();
        dialog.cseq += 1;
        log.next_key += 1;
        let key = log.next_key;
        log.invites.push(SentRequest {
            call_id: dialog.call_id.clone(),
            to: dialog.with.clone(),
            headers: headers.to_vec(),
            body: body.to_string(),
            key,
            cseq: dialog.cseq,
        });
        key
    }

    fn respond(
        &mut self,
        msg: &SipMessage,
        code: u16,
        reason: &str,
        extra_headers: &[(String, String)],
        body: Option<&str>,
    ) {
        self.log.borrow_mut().responses.push(SentResponse {
            call_id: msg.call_id().unwrap_or_default().to_string(),
            code,
            reason: reason.to_string(),
            headers: extra_headers.to_vec(),
            body: body.map(str::to_string),
        });
    }

    fn ack(&mut self, dialog: &mut Dialog) {
        self.log
            .borrow_mut()
            .acks
            .push((dialog.call_id.clone(), dialog.cseq));
    }

    fn info(&mut self, dialog: &mut Dialog, content_type: &str, body: &str) -> TransactionKey {
        let mut log = self.log.borrow_mut();
        dialog.cseq += 1;
        log.next_key += 1;
        let key = log.next_key;
        log.infos.push(SentRequest {
            call_id: dialog.call_id.clone(),
            to: dialog.with.clone(),
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: body.to_string(),
            key,
            cseq: dialog.cseq,
        });
        key
    }

    fn service(&mut self, uri: &str, content_type: &str, body: &str) -> TransactionKey {
        let mut log = self.log.borrow_mut();
        log.next_key += 1;
        let key = log.next_key;
        log.services.push(SentRequest {
            call_id: String::new(),
            to: uri.to_string(),
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: body.to_string(),
            key,
            cseq: 1,
        });
        key
    }

    fn bye(&mut self, dialog: &mut Dialog) {
        dialog.cseq += 1;
        self.log.borrow_mut().byes.push(dialog.call_id.clone());
    }
}

// ----------------------------------------------------------------------
// Media engine
// ----------------------------------------------------------------------

#[derive(Default)]
pub struct EngineStream {
    pub initialized: bool,
    pub held: bool,
    pub ended: bool,
    pub local_candidates: Vec<BackendCandidate>,
    pub active_local_candidates: Vec<BackendCandidate>,
    pub active_remote_candidates: Vec<BackendCandidate>,
    pub local_codecs: Vec<BackendCodec>,
    pub remote_codecs: Vec<BackendCodec>,
    pub remote_candidates: Vec<BackendCandidate>,
    pub encryption_keys: Option<(Vec<u8>, Vec<u8>)>,
    pub read_buffer: VecDeque<u8>,
    pub written: Vec<u8>,
}

#[derive(Default)]
pub struct EngineState {
    pub streams: HashMap<(String, String), EngineStream>,
    pub accepted: Vec<String>,
    pub rejections: Vec<(String, bool)>,
    pub hangups: Vec<(String, bool)>,
    pub removed_streams: Vec<(String, String)>,
    pub cnames: Vec<(String, String)>,
    /// Stream ids whose creation should fail.
    pub fail_stream_ids: Vec<String>,
    /// Reject remote codec sets for these stream ids.
    pub reject_codecs_for: Vec<String>,
    pub policy: EncryptionPolicy,
    pub network_ip: String,
    pub relay_sets_seen: Vec<usize>,
}

impl EngineState {
    pub fn stream_mut(&mut self, call_id: &str, stream_id: &str) -> &mut EngineStream {
        self.streams
            .get_mut(&(call_id.to_string(), stream_id.to_string()))
            .expect("engine stream exists")
    }

    pub fn set_initialized(&mut self, call_id: &str, stream_id: &str) {
        self.stream_mut(call_id, stream_id).initialized = true;
    }
}

pub struct MockBackend {
    pub state: Rc<RefCell<EngineState>>,
}

/// Default gathered host candidates for a stream: RTP + RTCP on one ip.
pub fn host_candidates(ip: &str, rtp_port: u16) -> Vec<BackendCandidate> {
    let mut rtp = BackendCandidate {
        foundation: "1".to_string(),
        component: 1,
        kind: CandidateType::Host,
        protocol: TransportProtocol::Udp,
        ip: ip.to_string(),
        port: rtp_port,
        priority: 2130706431,
        username: "Frag".to_string(),
        password: "Pwd".to_string(),
        ..Default::default()
    };
    rtp.base_ip = ip.to_string();
    rtp.base_port = rtp_port;

    let mut rtcp = rtp.clone();
    rtcp.component = 2;
    rtcp.port = rtp_port + 1;
    rtcp.base_port = rtp_port + 1;

    vec![rtp, rtcp]
}

pub fn pcmu_codec() -> BackendCodec {
    BackendCodec {
        id: 0,
        name: "PCMU".to_string(),
        clock_rate: 8000,
        media_type: MediaType::Audio,
        parameters: Vec::new(),
    }
}

impl MediaBackend for MockBackend {
    fn add_stream(
        &mut self,
        call_id: &str,
        stream_id: &str,
        _media_type: MediaType,
        _ice_version: IceVersion,
        _initiator: bool,
        relays: &[MediaRelay],
        _relay_username: Option<&str>,
        _relay_password: Option<&str>,
        port_range: (u16, u16),
    ) -> bool {
        let mut state = self.state.borrow_mut();
        if state.fail_stream_ids.iter().any(|id| id == stream_id) {
            return false;
        }
        state.relay_sets_seen.push(relays.len());

        let stream = EngineStream {
            local_candidates: host_candidates("10.0.0.1", port_range.0),
            local_codecs: vec![pcmu_codec()],
            ..Default::default()
        };
        state
            .streams
            .insert((call_id.to_string(), stream_id.to_string()), stream);
        true
    }

    fn remove_stream(&mut self, call_id: &str, stream_id: &str) {
        let mut state = self.state.borrow_mut();
        state
            .streams
            .remove(&(call_id.to_string(), stream_id.to_string()));
        state
            .removed_streams
            .push((call_id.to_string(), stream_id.to_string()));
    }

    fn local_codecs(&mut self, call_id: &str, stream_id: &str) -> Vec<BackendCodec> {
        self.state
            .borrow_mut()
            .stream_mut(call_id, stream_id)
            .local_codecs
            .clone()
    }

    fn local_candidates(&mut self, call_id: &str, stream_id: &str) -> Vec<BackendCandidate> {
        self.state
            .borrow_mut()
            .stream_mut(call_id, stream_id)
            .local_candidates
            .clone()
    }

    fn active_local_candidates(
        &mut self,
        call_id: &str,
        stream_id: &str,
    ) -> Vec<BackendCandidate> {
        self.state
            .borrow_mut()
            .stream_mut(call_id, stream_id)
            .active_local_candidates
            .clone()
    }

    fn active_remote_candidates(
        &mut self,
        call_id: &str,
        stream_id: &str,
    ) -> Vec<BackendCandidate> {
        self.state
            .borrow_mut()
            .stream_mut(call_id, stream_id)
            .active_remote_candidates
            .clone()
    }

    fn set_remote_codecs(
        &mut self,
        call_id: &str,
        stream_id: &str,
        codecs: Vec<BackendCodec>,
    ) -> bool {
        let mut state = self.state.borrow_mut();
        if state.reject_codecs_for.iter().any(|id| id == stream_id) {
            return false;
        }
        state.stream_mut(call_id, stream_id).remote_codecs = codecs;
        true
    }

    fn add_remote_candidates(
        &mut self,
        call_id: &str,
        stream_id: &str,
        candidates: Vec<BackendCandidate>,
    ) {
        self.state
            .borrow_mut()
            .stream_mut(call_id, stream_id)
            .remote_candidates = candidates;
    }

    fn set_encryption_keys(
        &mut self,
        call_id: &str,
        stream_id: &str,
        local_key: &[u8],
        remote_key: &[u8],
    ) {
        self.state
            .borrow_mut()
            .stream_mut(call_id, stream_id)
            .encryption_keys = Some((local_key.to_vec(), remote_key.to_vec()));
    }

    fn stream_initialized(&self, call_id: &str, stream_id: &str) -> bool {
        self.state
            .borrow()
            .streams
            .get(&(call_id.to_string(), stream_id.to_string()))
            .map_or(false, |s| s.initialized)
    }

    fn is_stream_held(&self, call_id: &str, stream_id: &str) -> bool {
        self.state
            .borrow()
            .streams
            .get(&(call_id.to_string(), stream_id.to_string()))
            .map_or(false, |s| s.held)
    }

    fn hold_stream(&mut self, call_id: &str, stream_id: &str, _local: bool) {
        self.state.borrow_mut().stream_mut(call_id, stream_id).held = true;
    }

    fn unhold_stream(&mut self, call_id: &str, stream_id: &str, _local: bool) {
        self.state.borrow_mut().stream_mut(call_id, stream_id).held = false;
    }

    fn end_stream(&mut self, call_id: &str, stream_id: &str) {
        self.state.borrow_mut().stream_mut(call_id, stream_id).ended = true;
    }

    fn accepted(&self, call_id: &str) -> bool {
        self.state.borrow().accepted.iter().any(|id| id == call_id)
    }

    fn accept(&mut self, call_id: &str, _local: bool) {
        self.state.borrow_mut().accepted.push(call_id.to_string());
    }

    fn reject(&mut self, call_id: &str, local: bool) {
        self.state
            .borrow_mut()
            .rejections
            .push((call_id.to_string(), local));
    }

    fn hangup(&mut self, call_id: &str, notify_peer: bool) {
        self.state
            .borrow_mut()
            .hangups
            .push((call_id.to_string(), notify_peer));
    }

    fn read(&mut self, call_id: &str, stream_id: &str, buf: &mut [u8], _blocking: bool) -> usize {
        let mut state = self.state.borrow_mut();
        let stream = state.stream_mut(call_id, stream_id);
        let mut n = 0;
        while n < buf.len() {
            match stream.read_buffer.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    fn write(&mut self, call_id: &str, stream_id: &str, data: &[u8], _blocking: bool) {
        self.state
            .borrow_mut()
            .stream_mut(call_id, stream_id)
            .written
            .extend_from_slice(data);
    }

    fn network_ip(&self) -> String {
        self.state.borrow().network_ip.clone()
    }

    fn encryption_policy(&self) -> EncryptionPolicy {
        self.state.borrow().policy
    }

    fn set_cname(&mut self, call_id: &str, cname: &str) {
        self.state
            .borrow_mut()
            .cnames
            .push((call_id.to_string(), cname.to_string()));
    }
}

// ----------------------------------------------------------------------
// DNS + notifications
// ----------------------------------------------------------------------

#[derive(Default)]
pub struct ResolverLog {
    next_handle: DnsQueryHandle,
    pub queries: Vec<(String, u16, DnsQueryHandle)>,
    pub cancelled: Vec<DnsQueryHandle>,
}

pub struct MockResolver {
    pub log: Rc<RefCell<ResolverLog>>,
}

impl DnsResolver for MockResolver {
    fn query_a(&mut self, hostname: &str, port: u16) -> DnsQueryHandle {
        let mut log = self.log.borrow_mut();
        log.next_handle += 1;
        let handle = log.next_handle;
        log.queries.push((hostname.to_string(), port, handle));
        handle
    }

    fn cancel(&mut self, handle: DnsQueryHandle) {
        self.log.borrow_mut().cancelled.push(handle);
    }
}

pub struct MockNotifier {
    pub notices: Rc<RefCell<Vec<(String, String)>>>,
}

impl Notifier for MockNotifier {
    fn notify_error(&mut self, title: &str, message: &str) {
        self.notices
            .borrow_mut()
            .push((title.to_string(), message.to_string()));
    }
}

// ----------------------------------------------------------------------
// Fixture
// ----------------------------------------------------------------------

pub struct Fixture {
    pub manager: MediaSessionManager,
    pub transport: Rc<RefCell<TransportLog>>,
    pub engine: Rc<RefCell<EngineState>>,
    pub resolver: Rc<RefCell<ResolverLog>>,
    pub notices: Rc<RefCell<Vec<(String, String)>>>,
}

pub fn default_config() -> MediaConfig {
    MediaConfig {
        self_uri: "sip:alice@example.com".to_string(),
        contact: "<sip:alice@10.0.0.1:5060;transport=tls>".to_string(),
        sip_domain: "example.com".to_string(),
        ..Default::default()
    }
}

pub fn fixture(config: MediaConfig) -> Fixture {
    let transport = Rc::new(RefCell::new(TransportLog::default()));
    let engine = Rc::new(RefCell::new(EngineState {
        policy: EncryptionPolicy::ObeyServer,
        network_ip: "10.0.0.1".to_string(),
        ..Default::default()
    }));
    let resolver = Rc::new(RefCell::new(ResolverLog::default()));
    let notices = Rc::new(RefCell::new(Vec::new()));

    let manager = MediaSessionManager::new(
        config,
        Box::new(MockTransport {
            log: Rc::clone(&transport),
        }),
        Box::new(MockBackend {
            state: Rc::clone(&engine),
        }),
        Box::new(MockResolver {
            log: Rc::clone(&resolver),
        }),
        Box::new(MockNotifier {
            notices: Rc::clone(&notices),
        }),
    );

    Fixture {
        manager,
        transport,
        engine,
        resolver,
        notices,
    }
}

/// Builds an inbound INVITE with an SDP (or spliced) body.
pub fn invite_msg(call_id: &str, from: &str, body: &str) -> SipMessage {
    SipMessage {
        method: Some("INVITE".to_string()),
        headers: vec![
            ("Call-ID".to_string(), call_id.to_string()),
            ("From".to_string(), format!("<{}>;tag=remote1", from)),
            ("To".to_string(), "<sip:alice@example.com>".to_string()),
            (
                "Content-Type".to_string(),
                "application/sdp".to_string(),
            ),
        ],
        body: body.to_string(),
        cseq: 1,
        ..Default::default()
    }
}

/// Builds a response message belonging to `call_id`.
pub fn response_msg(call_id: &str, code: u16, reason: &str, cseq: u32) -> SipMessage {
    SipMessage {
        response: Some(code),
        response_str: reason.to_string(),
        headers: vec![
            ("Call-ID".to_string(), call_id.to_string()),
            (
                "To".to_string(),
                "<sip:bob@example.com>;tag=remote9".to_string(),
            ),
        ],
        cseq,
        ..Default::default()
    }
}

/// A plain audio offer from the peer.
pub fn audio_offer_sdp(extra_audio_attributes: &str) -> String {
    format!(
        "v=0\r\n\
         o=- 0 0 IN IP4 192.0.2.15\r\n\
         s=session\r\n\
         c=IN IP4 192.0.2.15\r\n\
         t=0 0\r\n\
         m=audio 30000 RTP/AVP 0\r\n\
         c=IN IP4 192.0.2.15\r\n\
         a=candidate:1 1 UDP 2130706431 192.0.2.15 30000 typ host\r\n\
         a=candidate:1 2 UDP 2130705918 192.0.2.15 30001 typ host\r\n\
         a=ice-ufrag:peerFrag\r\n\
         a=ice-pwd:peerPwd\r\n\
         a=rtpmap:0 PCMU/8000\r\n\
         {}",
        extra_audio_attributes
    )
}
