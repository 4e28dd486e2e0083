//! Per-stream state and port-range selection.

use std::any::Any;

use rand::RngCore;
use ucsip_sdp_core::{MediaType, SdpAttribute};

use crate::config::MediaConfig;

/// Length of the SRTP master key carried in SDP.
pub const SRTP_KEY_LEN: usize = 16;

/// One media stream of a call.
///
/// The engine-side resources live in the backend under the same
/// (call id, stream id) address; this struct carries what negotiation
/// needs: key material, the extra SDP attributes, and an opaque slot
/// the file-transfer layer parks its state in.
pub struct MediaStream {
    /// ASCII stream identifier, unique within the call
    /// (`audio`, `video`, `data`, `applicationsharing`).
    pub id: String,
    pub media_type: MediaType,

    pub(crate) encryption_key: Option<[u8; SRTP_KEY_LEN]>,
    pub(crate) encryption_key_id: u32,
    /// Remote candidates and codecs were already applied; re-INVITEs
    /// must not apply them twice.
    pub(crate) remote_applied: bool,
    /// Extra SDP attributes in insertion order, duplicates allowed.
    pub(crate) extra_attributes: Vec<SdpAttribute>,
    /// Arbitrary data associated with the stream.
    data: Option<Box<dyn Any>>,
}

impl MediaStream {
    pub(crate) fn new(id: &str, media_type: MediaType, srtp_enabled: bool) -> Self {
        let mut encryption_key = None;
        let mut encryption_key_id = 0;

        if srtp_enabled {
            let mut key = [0u8; SRTP_KEY_LEN];
            rand::thread_rng().fill_bytes(&mut key);
            encryption_key = Some(key);
            encryption_key_id = 1;
        }

        Self {
            id: id.to_string(),
            media_type,
            encryption_key,
            encryption_key_id,
            remote_applied: false,
            extra_attributes: Vec::new(),
            data: None,
        }
    }

    /// Appends an extra SDP attribute. No de-duplication: callers that
    /// add twice get the attribute twice.
    pub fn add_extra_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.extra_attributes.push(SdpAttribute::new(name, value));
    }

    /// Replaces the opaque payload; the previous one is dropped.
    pub fn set_data(&mut self, data: Option<Box<dyn Any>>) {
        self.data = data;
    }

    pub fn data<T: 'static>(&self) -> Option<&T> {
        self.data.as_ref().and_then(|d| d.downcast_ref())
    }

    pub fn data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.data.as_mut().and_then(|d| d.downcast_mut())
    }

    pub fn encryption_key(&self) -> Option<&[u8]> {
        self.encryption_key.as_ref().map(|k| k.as_slice())
    }
}

/// Port range for a new stream, selected by (media type, stream id).
pub(crate) fn port_range(config: &MediaConfig, media_type: MediaType, id: &str) -> (u16, u16) {
    match media_type {
        MediaType::Audio => (config.min_audio_port, config.max_audio_port),
        // Upper bound intentionally mirrors the audio range; changing it
        // changes which ports video streams may bind.
        MediaType::Video => (config.min_video_port, config.max_audio_port),
        MediaType::Application => match id {
            "data" => (config.min_filetransfer_port, config.max_filetransfer_port),
            "applicationsharing" => (config.min_appsharing_port, config.max_appsharing_port),
            _ => (config.min_media_port, config.max_media_port),
        },
    }
}
