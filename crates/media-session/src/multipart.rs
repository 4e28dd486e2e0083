//! Multipart INVITE bodies.
//!
//! Outgoing envelopes always use the same boundary the reference
//! clients ship; peers key on it and nothing ever made it negotiable.

/// Boundary of every multipart INVITE body we produce.
pub const MULTIPART_BOUNDARY: &str = "----=_NextPart_000_001E_01CB4397.0B5EB570";

/// `Content-Type` header value for a multipart envelope.
pub fn content_type_with_boundary(envelope_type: &str) -> String {
    format!("{};boundary=\"{}\"", envelope_type, MULTIPART_BOUNDARY)
}

/// Assembles the multipart body: the caller-supplied extra part (a
/// complete MIME part, headers included) followed by the session
/// description.
pub fn compose_invite_body(extra_part: &str, sdp_body: &str) -> String {
    format!(
        "--{b}\r\n\
         {extra}\r\n\
         --{b}\r\n\
         Content-Type: application/sdp\r\n\
         Content-Transfer-Encoding: 7bit\r\n\
         Content-Disposition: session; handling=optional\r\n\
         \r\n\
         {sdp}\r\n\
         --{b}--\r\n",
        b = MULTIPART_BOUNDARY,
        extra = extra_part,
        sdp = sdp_body
    )
}

/// One part of a multipart body.
#[derive(Debug, Clone, Default)]
pub struct MimePart {
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Splits a multipart body along the boundary carried in the
/// `Content-Type` header value. Returns an empty list when the header
/// carries no boundary.
pub fn parse_multipart(content_type: &str, body: &str) -> Vec<MimePart> {
    let boundary = match boundary_of(content_type) {
        Some(b) => b,
        None => return Vec::new(),
    };

    let delimiter = format!("--{}", boundary);
    let mut parts = Vec::new();

    for raw in body.split(&delimiter).skip(1) {
        let raw = raw.trim_start_matches("\r\n");
        if raw.starts_with("--") {
            // Closing delimiter.
            break;
        }

        let (head, part_body) = match raw.split_once("\r\n\r\n") {
            Some(split) => split,
            None => continue,
        };

        let mut part = MimePart {
            body: part_body.trim_end_matches("\r\n").to_string(),
            ..Default::default()
        };

        for line in head.lines() {
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                let value = value.trim();
                if name.eq_ignore_ascii_case("Content-Type") {
                    part.content_type = value.to_string();
                }
                part.headers.push((name.to_string(), value.to_string()));
            }
        }

        parts.push(part);
    }

    parts
}

fn boundary_of(content_type: &str) -> Option<String> {
    let (_, rest) = content_type.split_once("boundary=")?;
    let rest = rest.trim();
    let boundary = if let Some(stripped) = rest.strip_prefix('"') {
        stripped.split_once('"')?.0
    } else {
        rest.split(';').next()?.trim()
    };
    Some(boundary.to_string())
}
