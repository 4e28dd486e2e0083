//! The call manager.
//!
//! One manager serves one signed-in account. It owns the Call-ID → call
//! map, correlates SIP transactions, drives SDP offer/answer against
//! the media engine and retries failed offers across ICE revisions.
//! Every method runs to completion on the embedder's event loop; the
//! manager never blocks and never calls back into the embedder except
//! through the injected capability traits.

use std::any::Any;
use std::collections::{HashMap, VecDeque};

use rand::Rng;
use tracing::{debug, info, warn};
use ucsip_sdp_core::{
    parse_sdp, serialize_sdp, CandidateType, IceVersion, MediaType, SdpMedia, SdpMessage,
};

use crate::backend::{DnsResolver, MediaBackend, Notifier};
use crate::bridge;
use crate::call::{ExtraInviteSection, MediaCall};
use crate::config::{EncryptionPolicy, MediaConfig};
use crate::error::{Error, Result};
use crate::events::SessionEvent;
use crate::multipart;
use crate::relay::{self, MediaRelay, RelayCredentials};
use crate::stream::{self, MediaStream};
use crate::transport::{parse_uri, Dialog, SipMessage, SipTransport, TransactionKey};

/// What to do when the response to a sent request arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionHandler {
    /// Response to our initial INVITE offer.
    InviteResponse,
    /// Mid-dialog re-INVITE (hold/resume): just acknowledge.
    MediaAck,
    /// Final re-INVITE after connectivity checks: acknowledge, then the
    /// call is live.
    MediaFinalAck,
    /// SERVICE to the MRAS URI.
    AvEdgeCredentials,
}

/// Account-scoped call manager.
pub struct MediaSessionManager {
    config: MediaConfig,
    transport: Box<dyn SipTransport>,
    backend: Box<dyn MediaBackend>,
    resolver: Box<dyn DnsResolver>,
    notifier: Box<dyn Notifier>,

    /// At most one call per Call-ID.
    calls: HashMap<String, MediaCall>,
    transactions: HashMap<TransactionKey, TransactionHandler>,

    relay_credentials: Option<RelayCredentials>,
    media_relays: Vec<MediaRelay>,

    /// Monotonic file-transfer request id, account-wide.
    ft_request_id: u32,

    events: VecDeque<SessionEvent>,
}

impl MediaSessionManager {
    pub fn new(
        config: MediaConfig,
        transport: Box<dyn SipTransport>,
        backend: Box<dyn MediaBackend>,
        resolver: Box<dyn DnsResolver>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            transport,
            backend,
            resolver,
            notifier,
            calls: HashMap::new(),
            transactions: HashMap::new(),
            relay_credentials: None,
            media_relays: Vec::new(),
            ft_request_id: 0,
            events: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Next pending event, oldest first.
    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    pub fn call(&self, call_id: &str) -> Option<&MediaCall> {
        self.calls.get(call_id)
    }

    pub fn call_ids(&self) -> Vec<String> {
        self.calls.keys().cloned().collect()
    }

    /// The call currently carrying an `audio` stream, if any. Only one
    /// voice call may exist at a time.
    pub fn audio_call_id(&self) -> Option<String> {
        self.calls
            .values()
            .find(|c| c.has_stream("audio"))
            .map(|c| c.call_id.clone())
    }

    /// Whether the message belongs to the given call's session.
    pub fn is_media_session_msg(&self, call_id: &str, msg: &SipMessage) -> bool {
        msg.call_id() == Some(call_id) && self.calls.contains_key(call_id)
    }

    /// Direct engine access for layers that own a data stream.
    pub fn backend_mut(&mut self) -> &mut dyn MediaBackend {
        self.backend.as_mut()
    }

    /// Responds to an inbound request on behalf of an overlay layer.
    pub fn respond(&mut self, msg: &SipMessage, code: u16, reason: &str) {
        self.transport.respond(msg, code, reason, &[], None);
    }

    /// Surfaces a user-visible error on behalf of an overlay layer.
    pub fn notify_error(&mut self, title: &str, message: &str) {
        self.notifier.notify_error(title, message);
    }

    /// Monotonic per-account file-transfer request id.
    pub fn next_ft_request_id(&mut self) -> u32 {
        self.ft_request_id += 1;
        self.ft_request_id
    }

    // ------------------------------------------------------------------
    // Outgoing calls
    // ------------------------------------------------------------------

    /// Starts a voice call towards `with`, RFC 5245 ICE first.
    pub fn initiate_call(&mut self, with: &str, with_video: bool) -> Result<String> {
        self.initiate_call_with_version(with, IceVersion::Rfc5245, with_video)
    }

    fn initiate_call_with_version(
        &mut self,
        with: &str,
        ice_version: IceVersion,
        with_video: bool,
    ) -> Result<String> {
        if self.audio_call_id().is_some() {
            return Err(Error::AudioCallExists);
        }

        let call_id = self.new_outgoing_call(with, ice_version, false);

        if let Err(e) = self.add_stream(&call_id, "audio", MediaType::Audio, ice_version, true) {
            self.notifier
                .notify_error("Error occurred", "Error creating audio stream");
            self.backend.hangup(&call_id, false);
            self.end_call(&call_id);
            return Err(e);
        }

        if with_video {
            if let Err(e) = self.add_stream(&call_id, "video", MediaType::Video, ice_version, true)
            {
                self.notifier
                    .notify_error("Error occurred", "Error creating video stream");
                self.backend.hangup(&call_id, false);
                self.end_call(&call_id);
                return Err(e);
            }
        }

        self.append_proxy_fallback_if_needed(&call_id);

        // Processing continues in on_stream_initialized.
        Ok(call_id)
    }

    /// Starts a hidden data session towards `with` (file transfer,
    /// application sharing).
    pub fn data_session_new_outgoing(
        &mut self,
        with: &str,
        ice_version: IceVersion,
    ) -> Result<String> {
        Ok(self.new_outgoing_call(with, ice_version, true))
    }

    /// Dials a phone number through the UC gateway.
    pub fn phone_call(&mut self, phone_number: &str) -> Result<Option<String>> {
        if !phone_number_is_valid(phone_number) {
            self.notifier
                .notify_error("Unable to establish a call", "Invalid phone number");
            return Ok(None);
        }

        let uri = format!(
            "sip:{}@{};user=phone",
            phone_number, self.config.sip_domain
        );
        self.initiate_call(&uri, false).map(Some)
    }

    /// Calls the audio test service.
    pub fn test_call(&mut self) -> Result<Option<String>> {
        match self.config.test_call_bot_uri.clone() {
            Some(bot) => self.initiate_call(&bot, false).map(Some),
            None => {
                self.notifier.notify_error(
                    "Unable to establish a call",
                    "Audio Test Service is not available.",
                );
                Ok(None)
            }
        }
    }

    /// Joins the audio-video MCU of a conference focus.
    pub fn connect_conference(&mut self, focus_uri: &str) -> Result<String> {
        if self.audio_call_id().is_some() {
            return Err(Error::AudioCallExists);
        }

        let av_uri = focus_uri.replace("app:conf:focus:", "app:conf:audio-video:");
        let ice_version = if self.config.lync2013 {
            IceVersion::Rfc5245
        } else {
            IceVersion::Draft6
        };

        let call_id = self.new_outgoing_call(&av_uri, ice_version, false);

        if let Err(e) = self.add_stream(&call_id, "audio", MediaType::Audio, ice_version, true) {
            self.notifier
                .notify_error("Error occurred", "Error creating audio stream");
            self.backend.hangup(&call_id, false);
            self.end_call(&call_id);
            return Err(e);
        }

        // Processing continues in on_stream_initialized.
        Ok(call_id)
    }

    fn new_outgoing_call(&mut self, with: &str, ice_version: IceVersion, hidden: bool) -> String {
        let dialog = Dialog::new_outgoing(with);
        let call_id = dialog.call_id.clone();

        debug_assert!(!self.calls.contains_key(&call_id));

        let call = MediaCall::new(&call_id, with, true, ice_version, hidden, dialog);
        self.calls.insert(call_id.clone(), call);
        let cname = cname_from_contact(&self.config.contact);
        self.backend.set_cname(&call_id, &cname);

        call_id
    }

    /// Adds a media stream to a call, selecting the port range by
    /// (type, id) and handing the current relay set to the engine.
    pub fn add_stream(
        &mut self,
        call_id: &str,
        stream_id: &str,
        media_type: MediaType,
        ice_version: IceVersion,
        initiator: bool,
    ) -> Result<()> {
        if !self.calls.contains_key(call_id) {
            return Err(Error::UnknownCall(call_id.to_string()));
        }

        let range = stream::port_range(&self.config, media_type, stream_id);
        let (username, password) = match &self.relay_credentials {
            Some(c) => (Some(c.username.as_str()), Some(c.password.as_str())),
            None => (None, None),
        };

        let created = self.backend.add_stream(
            call_id,
            stream_id,
            media_type,
            ice_version,
            initiator,
            &self.media_relays,
            username,
            password,
            range,
        );
        if !created {
            return Err(Error::StreamCreation(stream_id.to_string()));
        }

        let stream = MediaStream::new(stream_id, media_type, self.config.srtp_enabled);
        self.calls
            .get_mut(call_id)
            .expect("checked above")
            .streams
            .push(stream);
        Ok(())
    }

    pub fn stream_add_extra_attribute(
        &mut self,
        call_id: &str,
        stream_id: &str,
        name: &str,
        value: &str,
    ) {
        if let Some(stream) = self
            .calls
            .get_mut(call_id)
            .and_then(|c| c.stream_mut(stream_id))
        {
            stream.add_extra_attribute(name, value);
        }
    }

    pub fn stream_set_data(
        &mut self,
        call_id: &str,
        stream_id: &str,
        data: Option<Box<dyn Any>>,
    ) {
        if let Some(stream) = self
            .calls
            .get_mut(call_id)
            .and_then(|c| c.stream_mut(stream_id))
        {
            stream.set_data(data);
        }
    }

    pub fn stream_data<T: 'static>(&self, call_id: &str, stream_id: &str) -> Option<&T> {
        self.calls
            .get(call_id)
            .and_then(|c| c.stream(stream_id))
            .and_then(|s| s.data())
    }

    /// Stages an extra MIME part for the next INVITE of this call.
    pub fn add_extra_invite_section(&mut self, call_id: &str, content_type: &str, body: &str) {
        if let Some(call) = self.calls.get_mut(call_id) {
            call.set_extra_invite_section(Some(ExtraInviteSection {
                content_type: content_type.to_string(),
                body: body.to_string(),
            }));
        }
    }

    fn append_proxy_fallback_if_needed(&mut self, call_id: &str) {
        let call = match self.calls.get(call_id) {
            Some(c) => c,
            None => return,
        };

        if call.dialog.cseq != 0
            || call.ice_version != IceVersion::Rfc5245
            || Some(&call.with) == self.config.test_call_bot_uri.as_ref()
        {
            return;
        }

        let ip = self.backend.network_ip();
        let body = format!(
            "Content-Type: application/sdp\r\n\
             Content-Transfer-Encoding: 7bit\r\n\
             Content-Disposition: session; handling=optional; ms-proxy-2007fallback\r\n\
             \r\n\
             o=- 0 0 IN IP4 {ip}\r\n\
             s=session\r\n\
             c=IN IP4 {ip}\r\n\
             m=audio 0 RTP/AVP\r\n",
            ip = ip
        );

        if let Some(call) = self.calls.get_mut(call_id) {
            call.set_extra_invite_section(Some(ExtraInviteSection {
                content_type: "multipart/alternative".to_string(),
                body,
            }));
        }
    }

    // ------------------------------------------------------------------
    // SDP generation
    // ------------------------------------------------------------------

    fn send_invite(&mut self, call_id: &str, handler: TransactionHandler) {
        let call = match self.calls.get_mut(call_id) {
            Some(c) => c,
            None => return,
        };

        let extra = call.extra_invite_section.take();
        let content_type = match &extra {
            Some(section) => multipart::content_type_with_boundary(&section.content_type),
            None => "application/sdp".to_string(),
        };

        let mut headers = vec![
            ("ms-keep-alive".to_string(), "UAC;hop-hop=yes".to_string()),
            ("Contact".to_string(), self.config.contact.clone()),
        ];
        if let Some(uc_line) = &self.config.uc_line_uri {
            headers.push((
                "P-Preferred-Identity".to_string(),
                format!("<{}>, <{}>", self.config.self_uri, uc_line),
            ));
        }
        headers.push(("Content-Type".to_string(), content_type));

        let sdp = build_sdp_message(&self.config, self.backend.as_mut(), call);
        let mut body = serialize_sdp(&sdp);
        if let Some(section) = extra {
            body = multipart::compose_invite_body(&section.body, &body);
        }

        let key = self.transport.invite(&mut call.dialog, &headers, &body);
        call.dialog.outgoing_invite = Some(key);
        self.transactions.insert(key, handler);
        debug!(call_id, ?handler, "sent INVITE");
    }

    fn send_response_with_sdp(&mut self, call_id: &str, code: u16, reason: &str) {
        let call = match self.calls.get_mut(call_id) {
            Some(c) => c,
            None => return,
        };

        let sdp = build_sdp_message(&self.config, self.backend.as_mut(), call);
        let body = serialize_sdp(&sdp);

        let invitation = match &call.invitation {
            Some(msg) => msg.clone(),
            None => return,
        };

        self.transport.respond(
            &invitation,
            code,
            reason,
            &[("Content-Type".to_string(), "application/sdp".to_string())],
            Some(&body),
        );
    }

    // ------------------------------------------------------------------
    // Initialization barrier
    // ------------------------------------------------------------------

    fn call_initialized(&self, call_id: &str) -> bool {
        match self.calls.get(call_id) {
            Some(call) => call
                .streams
                .iter()
                .all(|s| self.backend.stream_initialized(call_id, &s.id)),
            None => false,
        }
    }

    /// The engine finished gathering for one stream. Once every stream
    /// of the call is ready: offerers emit their INVITE, answerers apply
    /// the stashed remote description and answer if already accepted.
    pub fn on_stream_initialized(&mut self, call_id: &str, stream_id: &str) {
        debug!(call_id, stream_id, "stream initialized");
        if !self.call_initialized(call_id) {
            return;
        }

        let initiator = match self.calls.get(call_id) {
            Some(c) => c.initiator,
            None => return,
        };

        if initiator {
            self.send_invite(call_id, TransactionHandler::InviteResponse);
        } else if let Some(smsg) = self
            .calls
            .get_mut(call_id)
            .and_then(|c| c.pending_remote.take())
        {
            if self.apply_remote_message(call_id, &smsg) {
                self.send_invite_response_if_ready(call_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Applying remote descriptions
    // ------------------------------------------------------------------

    /// Applies a remote description. Returns false when every section
    /// failed, which ends the call.
    fn apply_remote_message(&mut self, call_id: &str, smsg: &SdpMessage) -> bool {
        {
            let call = match self.calls.get_mut(call_id) {
                Some(c) => c,
                None => return false,
            };
            call.failed_media.clear();
            call.encryption_compatible = true;
        }

        let policy = effective_encryption_policy(&self.config, self.backend.as_ref());
        let mut failed: Vec<SdpMedia> = Vec::new();

        for media in &smsg.media {
            if media.attribute("encryption") == Some("rejected")
                && policy == EncryptionPolicy::Required
            {
                if let Some(call) = self.calls.get_mut(call_id) {
                    call.encryption_compatible = false;
                }
            }

            if !self.update_stream_from_remote(call_id, media) {
                let mut echo = media.clone();
                echo.port = 0;
                failed.push(echo);
            }
        }

        let all_failed = failed.len() == smsg.media.len();
        if let Some(call) = self.calls.get_mut(call_id) {
            // Failed sections are echoed back with port 0 in the answer.
            call.failed_media = failed;
        }

        !smsg.media.is_empty() && !all_failed
    }

    fn update_stream_from_remote(&mut self, call_id: &str, media: &SdpMedia) -> bool {
        let has_stream = self
            .calls
            .get(call_id)
            .map_or(false, |c| c.has_stream(&media.name));

        if media.port == 0 {
            if has_stream {
                self.end_stream(call_id, &media.name);
            }
            return true;
        }

        if !has_stream {
            return false;
        }

        if media.has_attribute("inactive") {
            self.backend.hold_stream(call_id, &media.name, false);
        } else if self.backend.is_stream_held(call_id, &media.name) {
            self.backend.unhold_stream(call_id, &media.name, false);
        }

        let already_applied = self
            .calls
            .get(call_id)
            .and_then(|c| c.stream(&media.name))
            .map_or(false, |s| s.remote_applied);
        if already_applied {
            return true;
        }

        // Install both keys once each side has contributed one.
        let local_key = self
            .calls
            .get(call_id)
            .and_then(|c| c.stream(&media.name))
            .and_then(|s| s.encryption_key().map(|k| k.to_vec()));
        if let (Some(remote_key), Some(local_key)) = (&media.encryption_key, local_key) {
            self.backend
                .set_encryption_keys(call_id, &media.name, &local_key, remote_key);
            if let Some(stream) = self
                .calls
                .get_mut(call_id)
                .and_then(|c| c.stream_mut(&media.name))
            {
                stream.encryption_key_id = media.encryption_key_id;
            }
        }

        let codecs = bridge::sdp_codecs_to_backend(&media.codecs);
        if !self.backend.set_remote_codecs(call_id, &media.name, codecs) {
            self.end_stream(call_id, &media.name);
            return false;
        }

        let candidates = bridge::sdp_candidates_to_backend(&media.candidates);
        self.backend
            .add_remote_candidates(call_id, &media.name, candidates);

        if let Some(stream) = self
            .calls
            .get_mut(call_id)
            .and_then(|c| c.stream_mut(&media.name))
        {
            stream.remote_applied = true;
        }

        true
    }

    fn end_stream(&mut self, call_id: &str, stream_id: &str) {
        self.backend.end_stream(call_id, stream_id);
        if let Some(call) = self.calls.get_mut(call_id) {
            call.streams.retain(|s| s.id != stream_id);
        }
    }

    // ------------------------------------------------------------------
    // Answering
    // ------------------------------------------------------------------

    /// Answers the stashed INVITE once the call is accepted and every
    /// stream is initialized. On an encryption-policy clash the call is
    /// refused and disposed before returning. Returns true when a
    /// response went out.
    fn send_invite_response_if_ready(&mut self, call_id: &str) -> bool {
        if !self.backend.accepted(call_id) || !self.call_initialized(call_id) {
            return false;
        }

        let compatible = self
            .calls
            .get(call_id)
            .map_or(true, |c| c.encryption_compatible);

        if !compatible {
            if let Some(invitation) = self.calls.get(call_id).and_then(|c| c.invitation.clone()) {
                self.transport.respond(
                    &invitation,
                    488,
                    "Encryption Levels not compatible",
                    &[(
                        "Warning".to_string(),
                        "308 lcs.microsoft.com \"Encryption Levels not compatible\"".to_string(),
                    )],
                    None,
                );
            }
            self.backend.reject(call_id, false);
            self.notifier.notify_error(
                "Unable to establish a call",
                "Encryption settings of peer are incompatible with ours.",
            );
            self.end_call(call_id);
        } else {
            self.send_response_with_sdp(call_id, 200, "OK");
        }

        true
    }

    /// The user accepted an incoming call.
    pub fn accept_call(&mut self, call_id: &str) {
        self.backend.accept(call_id, true);
        self.events.push_back(SessionEvent::CallAccepted {
            call_id: call_id.to_string(),
            local: true,
        });
        self.send_invite_response_if_ready(call_id);
        if self.config.ocs2007 {
            self.events.push_back(SessionEvent::PhoneStatePublish);
        }
    }

    /// The user declined an incoming call.
    pub fn reject_call(&mut self, call_id: &str) {
        if let Some(invitation) = self.calls.get(call_id).and_then(|c| c.invitation.clone()) {
            self.transport.respond(&invitation, 603, "Decline", &[], None);
        }
        self.backend.reject(call_id, true);
        self.events.push_back(SessionEvent::CallRejected {
            call_id: call_id.to_string(),
            local: true,
        });
        self.end_call(call_id);
    }

    // ------------------------------------------------------------------
    // Incoming INVITE / CANCEL
    // ------------------------------------------------------------------

    /// Handles an inbound INVITE with an SDP body. Returns the call id
    /// when a call was created or updated.
    pub fn process_incoming_invite(&mut self, msg: &SipMessage) -> Option<String> {
        let call_id = msg.call_id()?.to_string();
        let body_has_data =
            msg.body.contains("m=data") || msg.body.contains("m=applicationsharing");

        // Don't allow two voice calls in parallel.
        if !body_has_data {
            if let Some(existing) = self.audio_call_id() {
                if existing != call_id {
                    self.transport.respond(msg, 486, "Busy Here", &[], None);
                    return None;
                }
            }
        }

        let from_uri = msg.header("From").map(parse_uri).unwrap_or_default();
        if from_uri == self.config.self_uri {
            self.transport
                .respond(msg, 488, "Not Acceptable Here", &[], None);
            return None;
        }

        let existing = self.calls.contains_key(&call_id);

        let smsg = match parse_sdp(&msg.body) {
            Ok(m) => m,
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "unparseable SDP offer");
                self.transport
                    .respond(msg, 488, "Not Acceptable Here", &[], None);
                if existing {
                    self.backend.hangup(&call_id, false);
                    self.end_call(&call_id);
                }
                return None;
            }
        };

        if !existing {
            let dialog = Dialog::from_invite(msg);
            let call = MediaCall::new(
                &call_id,
                &from_uri,
                false,
                smsg.ice_version,
                body_has_data,
                dialog,
            );
            self.calls.insert(call_id.clone(), call);
            let cname = cname_from_contact(&self.config.contact);
            self.backend.set_cname(&call_id, &cname);
            self.events.push_back(SessionEvent::IncomingCall {
                call_id: call_id.clone(),
                with: from_uri,
                hidden_from_ui: body_has_data,
            });
        }

        if let Some(call) = self.calls.get_mut(&call_id) {
            call.invitation = Some(msg.clone());
        }

        // Create local streams for remote sections we don't have yet.
        let mut has_new_media = false;
        for media in &smsg.media {
            if media.port == 0
                || self
                    .calls
                    .get(&call_id)
                    .map_or(true, |c| c.has_stream(&media.name))
            {
                continue;
            }

            let media_type = match media.media_type() {
                Some(t) => t,
                None => continue,
            };

            let added = self
                .add_stream(&call_id, &media.name, media_type, smsg.ice_version, false)
                .is_ok();
            if added {
                match media.name.as_str() {
                    "data" => {
                        self.stream_add_extra_attribute(&call_id, "data", "recvonly", "");
                    }
                    "applicationsharing" => {
                        self.stream_add_extra_attribute(
                            &call_id,
                            "applicationsharing",
                            "x-applicationsharing-session-id",
                            "1",
                        );
                        self.stream_add_extra_attribute(
                            &call_id,
                            "applicationsharing",
                            "x-applicationsharing-role",
                            "viewer",
                        );
                        self.stream_add_extra_attribute(
                            &call_id,
                            "applicationsharing",
                            "x-applicationsharing-media-type",
                            "rdp",
                        );
                    }
                    _ => {}
                }
            }
            has_new_media = true;
        }

        if has_new_media {
            if let Some(call) = self.calls.get_mut(&call_id) {
                call.pending_remote = Some(smsg);
            }
            if let Some(invitation) = self.calls.get(&call_id).and_then(|c| c.invitation.clone()) {
                self.transport.respond(&invitation, 180, "Ringing", &[], None);
            }
            // Processing continues in on_stream_initialized.
        } else {
            self.apply_remote_message(&call_id, &smsg);
            self.send_response_with_sdp(&call_id, 200, "OK");
        }

        Some(call_id)
    }

    /// Handles an inbound CANCEL: 200 to the CANCEL itself, 487 to the
    /// INVITE in progress, and the call is rejected remote-side.
    pub fn process_incoming_cancel(&mut self, msg: &SipMessage) {
        let call_id = match msg.call_id() {
            Some(id) => id.to_string(),
            None => return,
        };

        self.transport.respond(msg, 200, "OK", &[], None);

        if let Some(invitation) = self.calls.get(&call_id).and_then(|c| c.invitation.clone()) {
            self.transport
                .respond(&invitation, 487, "Request Terminated", &[], None);
        }

        self.backend.reject(&call_id, false);
        self.events.push_back(SessionEvent::CallRejected {
            call_id: call_id.clone(),
            local: false,
        });
        self.end_call(&call_id);
    }

    // ------------------------------------------------------------------
    // Responses to our requests
    // ------------------------------------------------------------------

    /// Feeds the response of a transaction we started. Returns false
    /// when the key belongs to someone else (e.g. the file-transfer
    /// layer's INFOs).
    pub fn process_transaction_response(&mut self, key: TransactionKey, msg: &SipMessage) -> bool {
        let handler = match self.transactions.remove(&key) {
            Some(h) => h,
            None => return false,
        };

        // Provisional responses (180 Ringing) leave the transaction
        // pending.
        if msg.response.map_or(false, |code| code < 200) {
            self.transactions.insert(key, handler);
            return true;
        }

        match handler {
            TransactionHandler::InviteResponse => self.process_invite_response(msg),
            TransactionHandler::MediaAck => {
                self.send_ack_for(msg);
            }
            TransactionHandler::MediaFinalAck => {
                if self.send_ack_for(msg) {
                    if let Some(call_id) = msg.call_id() {
                        let call_id = call_id.to_string();
                        self.backend.accept(&call_id, false);
                    }
                }
            }
            TransactionHandler::AvEdgeCredentials => self.process_av_edge_response(msg),
        }

        true
    }

    /// Acknowledges a response to a mid-dialog request. The dialog CSeq
    /// is rewound to the transaction being acknowledged and restored
    /// afterwards.
    fn send_ack_for(&mut self, msg: &SipMessage) -> bool {
        let call_id = match msg.call_id() {
            Some(id) => id.to_string(),
            None => return false,
        };

        let call = match self.calls.get_mut(&call_id) {
            Some(c) => c,
            None => return false,
        };

        let saved_cseq = call.dialog.cseq;
        call.dialog.cseq = msg.cseq;
        self.transport.ack(&mut call.dialog);
        call.dialog.cseq = saved_cseq;
        call.dialog.outgoing_invite = None;

        true
    }

    fn process_invite_response(&mut self, msg: &SipMessage) {
        let call_id = match msg.call_id() {
            Some(id) if self.calls.contains_key(id) => id.to_string(),
            _ => return,
        };
        let with = self.calls[&call_id].with.clone();
        let code = msg.response.unwrap_or(500);

        if let Some(call) = self.calls.get_mut(&call_id) {
            call.dialog.outgoing_invite = None;
        }

        if code >= 400 {
            // Call rejected by the remote peer or an error occurred.
            let (title, mut desc, append_response_str) = match code {
                480 => {
                    let desc = if msg.warning_code() == Some(391) {
                        format!("{} does not want to be disturbed", with)
                    } else {
                        format!("User {} is not available", with)
                    };
                    ("User unavailable", desc, false)
                }
                603 | 605 => ("Call rejected", format!("User {} rejected call", with), false),
                415 => {
                    // OCS/Lync really sends the response string with the
                    // 'Mutipart' typo.
                    if msg.response_str
                        == "Mutipart mime in content type not supported by Archiving CDR service"
                        && self.maybe_retry_with_ice_version(&call_id, IceVersion::Draft6, msg.cseq)
                    {
                        return;
                    }
                    ("Unsupported media type", String::new(), true)
                }
                488 => {
                    // Lync 2010 flags an encryption-policy clash with
                    // ms-client-diagnostics 52017; older clients put it
                    // in the reason string. Neither is retryable.
                    let client_diag = msg.header("ms-client-diagnostics");
                    if msg.response_str == "Encryption Levels not compatible"
                        || client_diag.map_or(false, |d| d.starts_with("52017;"))
                    {
                        (
                            "Unable to establish a call",
                            "Encryption settings of peer are incompatible with ours.".to_string(),
                            false,
                        )
                    } else {
                        // A conference refusing draft-6 ICE with
                        // ms-diagnostics 7008 wants RFC 5245 instead.
                        let retry_version = if msg
                            .header("ms-diagnostics")
                            .map_or(false, |d| d.starts_with("7008;"))
                        {
                            IceVersion::Rfc5245
                        } else {
                            IceVersion::Draft6
                        };

                        if self.maybe_retry_with_ice_version(&call_id, retry_version, msg.cseq) {
                            return;
                        }
                        ("Error occurred", "Unable to establish a call".to_string(), true)
                    }
                }
                _ => ("Error occurred", "Unable to establish a call".to_string(), true),
            };

            if append_response_str {
                desc.push_str(&format!("\n{} {}", code, msg.response_str));
                if let Some(reason) = msg.ms_diagnostics_reason() {
                    desc.push_str(&format!("\n\n{}", reason));
                }
            }

            self.notifier.notify_error(title, &desc);
            self.send_ack_for(msg);
            self.backend.hangup(&call_id, false);
            self.end_call(&call_id);
            return;
        }

        // 2xx: apply the answer and acknowledge. The call goes live
        // when the engine reports an established candidate pair.
        if let Some(to) = msg.header("To") {
            if let Some((_, tag)) = to.split_once("tag=") {
                if let Some(call) = self.calls.get_mut(&call_id) {
                    call.dialog.their_tag = Some(tag.to_string());
                }
            }
        }

        let smsg = match parse_sdp(&msg.body) {
            Ok(m) => m,
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "unparseable SDP answer");
                self.transport
                    .respond(msg, 488, "Not Acceptable Here", &[], None);
                self.backend.hangup(&call_id, false);
                self.end_call(&call_id);
                return;
            }
        };

        self.apply_remote_message(&call_id, &smsg);
        self.send_ack_for(msg);
    }

    /// Tears the call down and re-dials with another ICE revision.
    /// Only the very first offer of a dialog is retried.
    fn maybe_retry_with_ice_version(
        &mut self,
        call_id: &str,
        ice_version: IceVersion,
        cseq: u32,
    ) -> bool {
        let call = match self.calls.get(call_id) {
            Some(c) => c,
            None => return false,
        };

        if call.ice_version == ice_version || cseq != 1 {
            return false;
        }

        let with = call.with.clone();
        let with_video = call.has_stream("video");

        self.backend.hangup(call_id, false);
        self.end_call(call_id);

        info!(
            "retrying call with ICE{}",
            if ice_version == IceVersion::Draft6 { 6 } else { 19 }
        );
        let _ = self.initiate_call_with_version(&with, ice_version, with_video);

        true
    }

    // ------------------------------------------------------------------
    // Mid-call signals
    // ------------------------------------------------------------------

    /// Connectivity checks concluded on a stream. Offerers send the
    /// final re-INVITE carrying the established pairs.
    pub fn on_candidate_pair_established(&mut self, call_id: &str, stream_id: &str) {
        if self.calls.get(call_id).map_or(false, |c| c.initiator) {
            self.send_invite(call_id, TransactionHandler::MediaFinalAck);
        }

        self.events.push_back(SessionEvent::CandidatePairEstablished {
            call_id: call_id.to_string(),
            stream_id: stream_id.to_string(),
        });
    }

    /// A data stream became readable; overlays drain it.
    pub fn on_stream_readable(&mut self, call_id: &str, stream_id: &str) {
        self.events.push_back(SessionEvent::StreamReadable {
            call_id: call_id.to_string(),
            stream_id: stream_id.to_string(),
        });
    }

    /// Puts the call on hold or resumes it, then re-INVITEs with the
    /// refreshed description (held streams carry `inactive`).
    pub fn set_call_hold(&mut self, call_id: &str, hold: bool) {
        let stream_ids: Vec<String> = match self.calls.get(call_id) {
            Some(c) => c.streams.iter().map(|s| s.id.clone()).collect(),
            None => return,
        };

        for stream_id in &stream_ids {
            if hold {
                self.backend.hold_stream(call_id, stream_id, true);
            } else {
                self.backend.unhold_stream(call_id, stream_id, true);
            }
        }

        self.send_invite(call_id, TransactionHandler::MediaAck);
    }

    /// The user hung up.
    pub fn hangup_call(&mut self, call_id: &str) {
        if let Some(call) = self.calls.get_mut(call_id) {
            self.transport.bye(&mut call.dialog);
        }
        self.backend.hangup(call_id, false);
        self.end_call(call_id);
    }

    /// The engine reports the media session is over (remote BYE,
    /// transport death).
    pub fn on_media_end(&mut self, call_id: &str) {
        self.end_call(call_id);
    }

    /// The engine reports an unrecoverable error on the call.
    pub fn on_error(&mut self, call_id: &str, message: &str) {
        let (initiator, with) = match self.calls.get(call_id) {
            Some(c) => (c.initiator, c.with.clone()),
            None => return,
        };
        let accepted = self.backend.accepted(call_id);

        self.notifier
            .notify_error(&format!("Call with {} failed", with), message);

        if !initiator && !accepted {
            if let Some(invitation) = self.calls.get(call_id).and_then(|c| c.invitation.clone()) {
                self.transport
                    .respond(&invitation, 488, "Not Acceptable Here", &[], None);
            }
        }

        self.backend.hangup(call_id, initiator || accepted);
        self.end_call(call_id);
    }

    /// Account is signing off: answer pending invitations with 480,
    /// close everything else, and hang up all media.
    pub fn handle_going_offline(&mut self) {
        for call_id in self.call_ids() {
            let (initiator, invitation) = match self.calls.get(&call_id) {
                Some(c) => (c.initiator, c.invitation.clone()),
                None => continue,
            };

            if !initiator && !self.backend.accepted(&call_id) {
                if let Some(invitation) = invitation {
                    self.transport.respond(
                        &invitation,
                        480,
                        "Temporarily Unavailable",
                        &[],
                        None,
                    );
                }
            } else if let Some(call) = self.calls.get_mut(&call_id) {
                self.transport.bye(&mut call.dialog);
            }

            self.backend.hangup(&call_id, false);
            self.end_call(&call_id);
        }
    }

    /// Sends an INFO within the call's dialog. Used by overlays for
    /// their control messages; the response key is theirs to track.
    pub fn send_info(
        &mut self,
        call_id: &str,
        content_type: &str,
        body: &str,
    ) -> Result<TransactionKey> {
        let call = self
            .calls
            .get_mut(call_id)
            .ok_or_else(|| Error::UnknownCall(call_id.to_string()))?;
        Ok(self.transport.info(&mut call.dialog, content_type, body))
    }

    /// Removes the call from the account map, then releases its
    /// engine-side streams. The order matters: re-entrant notifications
    /// triggered by teardown must not rediscover the dying call.
    fn end_call(&mut self, call_id: &str) {
        if let Some(mut call) = self.calls.remove(call_id) {
            for stream in call.streams.drain(..) {
                self.backend.remove_stream(call_id, &stream.id);
            }
            self.events.push_back(SessionEvent::CallEnded {
                call_id: call_id.to_string(),
            });
            if self.config.ocs2007 {
                self.events.push_back(SessionEvent::PhoneStatePublish);
            }
            debug!(call_id, "call ended");
        }
    }

    // ------------------------------------------------------------------
    // A/V Edge credentials
    // ------------------------------------------------------------------

    /// Requests A/V Edge relay credentials from the MRAS service.
    /// No-op when the account has no MRAS URI.
    pub fn request_av_edge_credentials(&mut self) {
        let mras_uri = match self.config.mras_uri.clone() {
            Some(uri) => uri,
            None => return,
        };

        let request_id: u32 = rand::thread_rng().gen();
        let location = if self.config.remote_user {
            "internet"
        } else {
            "intranet"
        };

        let body =
            relay::build_credentials_request(request_id, &self.config.self_uri, &mras_uri, location);
        let key = self
            .transport
            .service(&mras_uri, "application/msrtc-media-relay-auth+xml", &body);
        self.transactions.insert(key, TransactionHandler::AvEdgeCredentials);
    }

    fn process_av_edge_response(&mut self, msg: &SipMessage) {
        // Stale credentials are worse than none; wipe before parsing.
        self.relay_credentials = None;
        for relay in self.media_relays.drain(..) {
            if let Some(query) = relay.dns_query {
                self.resolver.cancel(query);
            }
        }

        let code = msg.response.unwrap_or(500);
        if code >= 400 {
            info!("SERVICE response is not 200, failed to obtain A/V Edge credentials");
            return;
        }

        if code == 200 {
            if let Some(parsed) = relay::parse_credentials_response(&msg.body) {
                self.relay_credentials = Some(RelayCredentials {
                    username: parsed.username,
                    password: parsed.password,
                });

                for (hostname, udp_port, tcp_port) in parsed.relays {
                    let query = self.resolver.query_a(&hostname, udp_port);
                    info!("media relay: {} TCP: {} UDP: {}", hostname, tcp_port, udp_port);
                    self.media_relays.push(MediaRelay {
                        hostname: Some(hostname),
                        udp_port,
                        tcp_port,
                        dns_query: Some(query),
                    });
                }
            }
        }
    }

    /// Outcome of a relay A-record query: the relay's hostname is
    /// replaced by its IP, or cleared when resolution failed.
    pub fn relay_resolved(&mut self, query: crate::backend::DnsQueryHandle, ip: Option<String>) {
        for relay in &mut self.media_relays {
            if relay.dns_query == Some(query) {
                relay.dns_query = None;
                match ip {
                    Some(ip) => {
                        info!(
                            "media relay {} resolved to {}",
                            relay.hostname.as_deref().unwrap_or(""),
                            ip
                        );
                        relay.hostname = Some(ip);
                    }
                    None => {
                        info!(
                            "unable to resolve media relay {}",
                            relay.hostname.as_deref().unwrap_or("")
                        );
                        relay.hostname = None;
                    }
                }
                return;
            }
        }
    }

    pub fn media_relays(&self) -> &[MediaRelay] {
        &self.media_relays
    }

    pub fn relay_credentials(&self) -> Option<&RelayCredentials> {
        self.relay_credentials.as_ref()
    }
}

// ----------------------------------------------------------------------
// SDP construction helpers
// ----------------------------------------------------------------------

fn effective_encryption_policy(
    config: &MediaConfig,
    backend: &dyn MediaBackend,
) -> EncryptionPolicy {
    match backend.encryption_policy() {
        EncryptionPolicy::ObeyServer => config.server_av_encryption_policy,
        policy => policy,
    }
}

/// Builds the local description of a call: one section per live stream
/// plus the failed-media echo, which is drained in the process.
fn build_sdp_message(
    config: &MediaConfig,
    backend: &mut dyn MediaBackend,
    call: &mut MediaCall,
) -> SdpMessage {
    let mut msg = SdpMessage::new("", call.ice_version);
    let call_id = call.call_id.clone();

    for stream in &call.streams {
        if let Some(media) =
            stream_to_sdp_media(config, backend, &call_id, call.encryption_compatible, stream)
        {
            if msg.ip.is_empty() {
                msg.ip = media.ip.clone();
            }
            msg.media.push(media);
        }
    }

    msg.media.append(&mut call.failed_media);

    msg
}

fn stream_to_sdp_media(
    config: &MediaConfig,
    backend: &mut dyn MediaBackend,
    call_id: &str,
    encryption_compatible: bool,
    stream: &MediaStream,
) -> Option<SdpMedia> {
    let mut media = SdpMedia::new(&stream.id);
    let media_type = match media.media_type() {
        Some(t) => t,
        None => {
            warn!(stream = %stream.id, "stream name has no media type, skipping");
            return None;
        }
    };

    let policy = effective_encryption_policy(config, &*backend);

    media.codecs =
        bridge::backend_codecs_to_sdp(backend.local_codecs(call_id, &stream.id), media_type);

    // Established candidate pairs go into answers once known; before
    // that, everything the engine gathered (minus the mistagged ones).
    let mut candidates = backend.active_local_candidates(call_id, &stream.id);
    if candidates.is_empty() {
        candidates =
            bridge::remove_mistagged_tcp_candidates(backend.local_candidates(call_id, &stream.id));
    }
    media.candidates = bridge::backend_candidates_to_sdp(candidates);
    bridge::fill_zero_tcp_active_ports(&mut media.candidates);

    let (ip, port, mut rtcp_port) =
        bridge::stream_ip_and_ports(&media.candidates, CandidateType::Host);
    let mut ip = ip;
    if ip.is_none() && !media.candidates.is_empty() {
        // No usable host candidate; fall back to any type.
        let (any_ip, any_port, any_rtcp) =
            bridge::stream_ip_and_ports(&media.candidates, CandidateType::Any);
        ip = any_ip;
        media.port = any_port;
        rtcp_port = any_rtcp;
    } else {
        media.port = port;
    }
    media.ip = ip.unwrap_or_default();

    if backend.is_stream_held(call_id, &stream.id) {
        media.add_attribute("inactive", "");
    }

    if rtcp_port != 0 {
        media.add_attribute("rtcp", rtcp_port.to_string());
    }

    if policy != config.server_av_encryption_policy {
        media.add_attribute("encryption", policy.token());
    }

    media.remote_candidates =
        bridge::backend_candidates_to_sdp(backend.active_remote_candidates(call_id, &stream.id));

    media.encryption_active = stream.encryption_key().is_some()
        && encryption_compatible
        && stream.remote_applied
        && policy != EncryptionPolicy::Rejected;

    if policy != EncryptionPolicy::Rejected {
        if let Some(key) = stream.encryption_key() {
            media.encryption_key = Some(key.to_vec());
            media.encryption_key_id = stream.encryption_key_id;
        }
    }

    for attribute in &stream.extra_attributes {
        media.attributes.push(attribute.clone());
    }

    Some(media)
}

fn cname_from_contact(contact: &str) -> String {
    contact
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

fn phone_number_is_valid(phone_number: &str) -> bool {
    let digits = phone_number.strip_prefix('+').unwrap_or(phone_number);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
