//! Media sections of a session description.

use crate::candidate::{insert_candidate_sorted, SdpCandidate};
use crate::codec::{insert_codec_unique_sorted, MediaType, SdpCodec};

/// A generic `a=` attribute. Order is preserved and duplicates are
/// allowed; an empty value serializes as a bare flag (`a=inactive`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpAttribute {
    pub name: String,
    pub value: String,
}

impl SdpAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One `m=` section.
///
/// The section name is the stream identifier the servers use on the
/// m-line itself (`audio`, `video`, `data`, `applicationsharing`); the
/// RFC media type is derived from it. A zero port marks a declined or
/// failed stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdpMedia {
    pub name: String,
    pub ip: String,
    pub port: u16,
    /// Local candidates in negotiation order.
    pub candidates: Vec<SdpCandidate>,
    /// Codecs ordered by payload id, ids unique.
    pub codecs: Vec<SdpCodec>,
    /// Candidate pairs selected by connectivity checks, when known.
    pub remote_candidates: Vec<SdpCandidate>,
    /// Generic attributes in insertion order.
    pub attributes: Vec<SdpAttribute>,
    /// SRTP is in force for this section.
    pub encryption_active: bool,
    /// Our SDES key material, when offered.
    pub encryption_key: Option<Vec<u8>>,
    pub encryption_key_id: u32,
}

impl SdpMedia {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// RFC media type for the section name, `None` for sections this
    /// client does not understand.
    pub fn media_type(&self) -> Option<MediaType> {
        match self.name.as_str() {
            "audio" => Some(MediaType::Audio),
            "video" => Some(MediaType::Video),
            "data" | "applicationsharing" => Some(MediaType::Application),
            _ => None,
        }
    }

    /// First value of the named attribute, if present. The empty string
    /// is returned for flag attributes.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    pub fn add_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.push(SdpAttribute::new(name, value));
    }

    /// RTCP port advertised via the `rtcp` attribute.
    pub fn rtcp_port(&self) -> Option<u16> {
        self.attribute("rtcp").and_then(|v| v.parse().ok())
    }

    pub fn add_candidate(&mut self, candidate: SdpCandidate) {
        insert_candidate_sorted(&mut self.candidates, candidate);
    }

    pub fn add_codec(&mut self, codec: SdpCodec) {
        insert_codec_unique_sorted(&mut self.codecs, codec);
    }
}
