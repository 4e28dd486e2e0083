//! Model → wire-text serialization.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::media::SdpMedia;
use crate::message::{IceVersion, SdpMessage};

const SRTP_CRYPTO_SUITE: &str = "AES_CM_128_HMAC_SHA1_80";

/// Serializes a session description to wire text (CRLF line endings).
pub fn serialize_sdp(msg: &SdpMessage) -> String {
    let mut out = String::new();

    out.push_str("v=0\r\n");
    out.push_str(&format!("o=- 0 0 IN IP4 {}\r\n", msg.ip));
    out.push_str("s=session\r\n");
    out.push_str(&format!("c=IN IP4 {}\r\n", msg.ip));
    out.push_str("t=0 0\r\n");

    for media in &msg.media {
        serialize_media(&mut out, media, msg.ice_version);
    }

    out
}

fn serialize_media(out: &mut String, media: &SdpMedia, ice_version: IceVersion) {
    let proto = if media.encryption_active {
        "RTP/SAVP"
    } else {
        "RTP/AVP"
    };

    let formats = media
        .codecs
        .iter()
        .map(|c| c.id.to_string())
        .collect::<Vec<_>>()
        .join(" ");

    if formats.is_empty() {
        out.push_str(&format!("m={} {} {}\r\n", media.name, media.port, proto));
    } else {
        out.push_str(&format!(
            "m={} {} {} {}\r\n",
            media.name, media.port, proto, formats
        ));
    }

    if !media.ip.is_empty() {
        out.push_str(&format!("c=IN IP4 {}\r\n", media.ip));
    }

    for candidate in &media.candidates {
        out.push_str(&format!(
            "a=candidate:{}\r\n",
            candidate.to_attribute_value(ice_version)
        ));
    }

    if !media.remote_candidates.is_empty() {
        let pairs = media
            .remote_candidates
            .iter()
            .map(|c| format!("{} {} {}", c.component, c.ip, c.port))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!("a=remote-candidates:{}\r\n", pairs));
    }

    // RFC 5245 carries the ICE credentials once per section; draft-6
    // already has them on every candidate line.
    if ice_version == IceVersion::Rfc5245 {
        if let Some(c) = media.candidates.iter().find(|c| !c.username.is_empty()) {
            out.push_str(&format!("a=ice-ufrag:{}\r\n", c.username));
            out.push_str(&format!("a=ice-pwd:{}\r\n", c.password));
        }
    }

    if let Some(key) = &media.encryption_key {
        out.push_str(&format!(
            "a=crypto:{} {} inline:{}\r\n",
            media.encryption_key_id,
            SRTP_CRYPTO_SUITE,
            BASE64.encode(key)
        ));
    }

    for codec in &media.codecs {
        out.push_str(&format!("a=rtpmap:{}\r\n", codec.rtpmap_value()));
        if let Some(fmtp) = codec.fmtp_value() {
            out.push_str(&format!("a=fmtp:{}\r\n", fmtp));
        }
    }

    for attribute in &media.attributes {
        if attribute.value.is_empty() {
            out.push_str(&format!("a={}\r\n", attribute.name));
        } else {
            out.push_str(&format!("a={}:{}\r\n", attribute.name, attribute.value));
        }
    }
}
