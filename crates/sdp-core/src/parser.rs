//! Wire-text → model parsing.
//!
//! The parser is line-based and deliberately lenient about session-level
//! fields it does not negotiate on (`o=`, `s=`, `t=`, `b=`): servers in
//! the field disagree about them and the call layer never reads them.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::debug;

use crate::candidate::SdpCandidate;
use crate::codec::{MediaType, SdpCodec};
use crate::error::{Error, Result};
use crate::media::SdpMedia;
use crate::message::{IceVersion, SdpMessage};

/// Parses a session description.
///
/// Fails when the body is not SDP at all or a section is structurally
/// broken; unknown attributes are preserved verbatim on their section.
pub fn parse_sdp(input: &str) -> Result<SdpMessage> {
    let mut lines = input.lines().map(str::trim_end).filter(|l| !l.is_empty());

    match lines.next() {
        Some(line) if line.starts_with("v=") => {}
        _ => return Err(Error::MissingField("v=")),
    }

    let mut session_ip = String::new();
    let mut media: Vec<SdpMedia> = Vec::new();
    let mut ice_version: Option<IceVersion> = None;
    // ICE credentials of the section being parsed (RFC 5245 mode).
    let mut ufrag = String::new();
    let mut pwd = String::new();

    for line in lines {
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| Error::InvalidLine(line.to_string()))?;

        match key {
            "m" => {
                finish_media(media.last_mut(), &mut ufrag, &mut pwd);
                media.push(parse_media_line(value)?);
            }
            "c" => {
                let ip = parse_connection(value)?;
                match media.last_mut() {
                    Some(section) => section.ip = ip,
                    None => session_ip = ip,
                }
            }
            "a" => {
                if let Some(section) = media.last_mut() {
                    parse_media_attribute(
                        section,
                        value,
                        &mut ice_version,
                        &mut ufrag,
                        &mut pwd,
                    )?;
                }
                // Session-level attributes are not negotiated on.
            }
            _ => {}
        }
    }

    finish_media(media.last_mut(), &mut ufrag, &mut pwd);

    for section in &mut media {
        if section.ip.is_empty() && section.port != 0 {
            section.ip = session_ip.clone();
        }
    }

    let ice_version = ice_version.unwrap_or(IceVersion::Rfc5245);
    debug!(
        media = media.len(),
        ?ice_version,
        "parsed session description"
    );

    Ok(SdpMessage {
        ip: session_ip,
        media,
        ice_version,
    })
}

/// Applies the section's ICE credentials to its candidates once the
/// section is complete.
fn finish_media(section: Option<&mut SdpMedia>, ufrag: &mut String, pwd: &mut String) {
    if let Some(section) = section {
        if !ufrag.is_empty() {
            for candidate in &mut section.candidates {
                candidate.username = ufrag.clone();
                candidate.password = pwd.clone();
            }
        }
    }
    ufrag.clear();
    pwd.clear();
}

fn parse_media_line(value: &str) -> Result<SdpMedia> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(Error::InvalidMedia(value.to_string()));
    }

    let mut section = SdpMedia::new(parts[0]);
    section.port = parts[1]
        .parse()
        .map_err(|_| Error::InvalidMedia(value.to_string()))?;
    section.encryption_active = parts[2] == "RTP/SAVP";

    // Format ids become real codecs when their rtpmap arrives.
    Ok(section)
}

fn parse_connection(value: &str) -> Result<String> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 3 || parts[0] != "IN" {
        return Err(Error::InvalidLine(format!("c={}", value)));
    }
    Ok(parts[2].to_string())
}

fn parse_media_attribute(
    section: &mut SdpMedia,
    value: &str,
    ice_version: &mut Option<IceVersion>,
    ufrag: &mut String,
    pwd: &mut String,
) -> Result<()> {
    let (name, value) = match value.split_once(':') {
        Some((name, value)) => (name, value),
        None => (value, ""),
    };

    match name {
        "candidate" => {
            let (candidate, version) = SdpCandidate::parse_attribute_value(value)?;
            ice_version.get_or_insert(version);
            section.add_candidate(candidate);
        }
        "remote-candidates" => {
            let parts: Vec<&str> = value.split_whitespace().collect();
            for triple in parts.chunks(3) {
                if triple.len() != 3 {
                    return Err(Error::InvalidCandidate(value.to_string()));
                }
                section.remote_candidates.push(SdpCandidate {
                    component: triple[0]
                        .parse()
                        .map_err(|_| Error::InvalidCandidate(value.to_string()))?,
                    ip: triple[1].to_string(),
                    port: triple[2]
                        .parse()
                        .map_err(|_| Error::InvalidCandidate(value.to_string()))?,
                    ..Default::default()
                });
            }
        }
        "ice-ufrag" => {
            ice_version.get_or_insert(IceVersion::Rfc5245);
            *ufrag = value.to_string();
        }
        "ice-pwd" => *pwd = value.to_string(),
        "crypto" => {
            let parts: Vec<&str> = value.split_whitespace().collect();
            if parts.len() < 3 {
                return Err(Error::InvalidLine(format!("a=crypto:{}", value)));
            }
            section.encryption_key_id = parts[0]
                .parse()
                .map_err(|_| Error::InvalidLine(format!("a=crypto:{}", value)))?;
            let inline = parts[2]
                .strip_prefix("inline:")
                .ok_or_else(|| Error::InvalidLine(format!("a=crypto:{}", value)))?;
            let key = BASE64
                .decode(inline)
                .map_err(|_| Error::InvalidLine(format!("a=crypto:{}", value)))?;
            section.encryption_key = Some(key);
        }
        "rtpmap" => {
            let (id, rest) = value
                .split_once(' ')
                .ok_or_else(|| Error::InvalidLine(format!("a=rtpmap:{}", value)))?;
            let mut fields = rest.split('/');
            let codec_name = fields
                .next()
                .ok_or_else(|| Error::InvalidLine(format!("a=rtpmap:{}", value)))?;
            let clock_rate = fields
                .next()
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| Error::InvalidLine(format!("a=rtpmap:{}", value)))?;

            section.add_codec(SdpCodec {
                id: id
                    .parse()
                    .map_err(|_| Error::InvalidLine(format!("a=rtpmap:{}", value)))?,
                name: codec_name.to_string(),
                clock_rate,
                media_type: section.media_type().unwrap_or(MediaType::Application),
                parameters: Vec::new(),
            });
        }
        "fmtp" => {
            let (id, rest) = value
                .split_once(' ')
                .ok_or_else(|| Error::InvalidLine(format!("a=fmtp:{}", value)))?;
            let id: u32 = id
                .parse()
                .map_err(|_| Error::InvalidLine(format!("a=fmtp:{}", value)))?;

            if let Some(codec) = section.codecs.iter_mut().find(|c| c.id == id) {
                for token in rest.split_whitespace() {
                    match token.split_once('=') {
                        Some((pname, pvalue)) => codec
                            .parameters
                            .push((pname.to_string(), pvalue.to_string())),
                        None => codec.parameters.push((String::new(), token.to_string())),
                    }
                }
            }
        }
        _ => section.add_attribute(name, value),
    }

    Ok(())
}
