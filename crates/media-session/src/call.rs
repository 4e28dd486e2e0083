//! Per-call state.

use ucsip_sdp_core::{IceVersion, SdpMedia, SdpMessage};

use crate::stream::MediaStream;
use crate::transport::{Dialog, SipMessage};

/// An extra MIME part to prepend to the next outgoing INVITE, turning
/// its body into a multipart envelope.
#[derive(Debug, Clone)]
pub struct ExtraInviteSection {
    /// Envelope content type (`multipart/mixed` or `multipart/alternative`).
    pub content_type: String,
    /// Complete MIME part: headers, blank line, payload.
    pub body: String,
}

/// One call, visible or hidden, keyed by its SIP Call-ID.
///
/// A "data session" is a call whose media is a data stream used by file
/// transfer or application sharing; it never surfaces in the UI.
pub struct MediaCall {
    pub call_id: String,
    /// Peer URI.
    pub with: String,
    pub hidden_from_ui: bool,
    /// We started this call.
    pub initiator: bool,

    pub(crate) dialog: Dialog,
    pub(crate) streams: Vec<MediaStream>,
    /// Inbound INVITE waiting for its deferred response.
    pub(crate) invitation: Option<SipMessage>,
    /// Remote description stashed until local streams finish
    /// initializing.
    pub(crate) pending_remote: Option<SdpMessage>,
    /// Remote sections we could not satisfy; echoed back with port 0.
    pub(crate) failed_media: Vec<SdpMedia>,
    pub(crate) ice_version: IceVersion,
    pub(crate) encryption_compatible: bool,
    pub(crate) extra_invite_section: Option<ExtraInviteSection>,
}

impl MediaCall {
    pub(crate) fn new(
        call_id: &str,
        with: &str,
        initiator: bool,
        ice_version: IceVersion,
        hidden_from_ui: bool,
        dialog: Dialog,
    ) -> Self {
        Self {
            call_id: call_id.to_string(),
            with: with.to_string(),
            hidden_from_ui,
            initiator,
            dialog,
            streams: Vec::new(),
            invitation: None,
            pending_remote: None,
            failed_media: Vec::new(),
            ice_version,
            encryption_compatible: true,
            extra_invite_section: None,
        }
    }

    pub fn ice_version(&self) -> IceVersion {
        self.ice_version
    }

    pub fn dialog(&self) -> &Dialog {
        &self.dialog
    }

    pub fn stream(&self, id: &str) -> Option<&MediaStream> {
        self.streams.iter().find(|s| s.id == id)
    }

    pub fn stream_mut(&mut self, id: &str) -> Option<&mut MediaStream> {
        self.streams.iter_mut().find(|s| s.id == id)
    }

    pub fn has_stream(&self, id: &str) -> bool {
        self.stream(id).is_some()
    }

    /// Conference legs dial the audio-video MCU of the focus.
    pub fn is_conference(&self) -> bool {
        self.with.contains("app:conf:audio-video:")
    }

    /// Stages an extra INVITE section, replacing any previous one.
    pub fn set_extra_invite_section(&mut self, section: Option<ExtraInviteSection>) {
        self.extra_invite_section = section;
    }
}
