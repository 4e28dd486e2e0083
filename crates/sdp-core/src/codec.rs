//! Codec descriptions carried in `a=rtpmap`/`a=fmtp` pairs.

use std::cmp::Ordering;

/// Media content type of a stream or codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Video,
    Application,
}

/// One codec entry of a media section.
///
/// `parameters` preserves the order the backend reported; each entry is a
/// (name, value) pair where an empty name stands for a bare `fmtp` token
/// such as the telephone-event range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpCodec {
    /// RTP payload type.
    pub id: u32,
    pub name: String,
    pub clock_rate: u32,
    pub media_type: MediaType,
    pub parameters: Vec<(String, String)>,
}

impl SdpCodec {
    /// `a=rtpmap` value.
    pub fn rtpmap_value(&self) -> String {
        format!("{} {}/{}", self.id, self.name, self.clock_rate)
    }

    /// `a=fmtp` value, or `None` when the codec has no parameters.
    pub fn fmtp_value(&self) -> Option<String> {
        if self.parameters.is_empty() {
            return None;
        }
        let joined = self
            .parameters
            .iter()
            .map(|(name, value)| {
                if name.is_empty() {
                    value.clone()
                } else {
                    format!("{}={}", name, value)
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        Some(format!("{} {}", self.id, joined))
    }
}

/// Inserts a codec keeping the list ordered by payload id.
///
/// Buggy backends may report two codecs with the same payload type; the
/// first one seen wins and the duplicate is dropped so the id never
/// appears twice in an outgoing description.
pub fn insert_codec_unique_sorted(codecs: &mut Vec<SdpCodec>, codec: SdpCodec) {
    for (pos, existing) in codecs.iter().enumerate() {
        match codec.id.cmp(&existing.id) {
            Ordering::Less => {
                codecs.insert(pos, codec);
                return;
            }
            Ordering::Equal => return,
            Ordering::Greater => {}
        }
    }
    codecs.push(codec);
}
