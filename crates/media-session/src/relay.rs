//! A/V Edge (MRAS) relay credentials.
//!
//! Credentials are requested with a SIP SERVICE carrying an
//! `msrtc-media-relay-auth+xml` body; the response lists media relays
//! whose hostnames are rewritten to IP addresses as asynchronous
//! A-record lookups come back. Both the credential pair and the relay
//! list are account-wide.

use std::io::Cursor;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use crate::backend::DnsQueryHandle;

/// MRAS XML namespace.
const MRASP_NS: &str = "http://schemas.microsoft.com/2006/09/sip/mrasp";

/// Credential lifetime requested from the server, in seconds.
const CREDENTIALS_DURATION_SECS: u32 = 480;

/// Account-wide relay credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCredentials {
    pub username: String,
    pub password: String,
}

/// One A/V Edge relay.
#[derive(Debug, Clone)]
pub struct MediaRelay {
    /// Relay address: the advertised hostname until resolution
    /// finishes, then the resolved IP; `None` when resolution failed.
    pub hostname: Option<String>,
    pub udp_port: u16,
    pub tcp_port: u16,
    /// In-flight A-record query, if any.
    pub(crate) dns_query: Option<DnsQueryHandle>,
}

/// Builds the `credentialsRequest` body for the SERVICE to the MRAS URI.
pub(crate) fn build_credentials_request(
    request_id: u32,
    self_uri: &str,
    mras_uri: &str,
    location: &str,
) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut request = BytesStart::new("request");
    request.push_attribute(("requestID", request_id.to_string().as_str()));
    request.push_attribute(("from", self_uri));
    request.push_attribute(("version", "1.0"));
    request.push_attribute(("to", mras_uri));
    request.push_attribute(("xmlns", MRASP_NS));
    request.push_attribute(("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"));
    writer.write_event(Event::Start(request)).unwrap();

    let mut creds = BytesStart::new("credentialsRequest");
    creds.push_attribute(("credentialsRequestID", request_id.to_string().as_str()));
    writer.write_event(Event::Start(creds)).unwrap();

    for (tag, value) in [
        ("identity", self_uri),
        ("location", location),
        ("duration", CREDENTIALS_DURATION_SECS.to_string().as_str()),
    ] {
        writer.write_event(Event::Start(BytesStart::new(tag))).unwrap();
        writer.write_event(Event::Text(BytesText::new(value))).unwrap();
        writer
            .write_event(Event::End(BytesStart::new(tag).to_end()))
            .unwrap();
    }

    writer
        .write_event(Event::End(BytesStart::new("credentialsRequest").to_end()))
        .unwrap();
    writer
        .write_event(Event::End(BytesStart::new("request").to_end()))
        .unwrap();

    String::from_utf8(writer.into_inner().into_inner()).unwrap()
}

/// Parsed `credentialsResponse`.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ParsedCredentialsResponse {
    pub username: String,
    pub password: String,
    /// (hostName, udpPort, tcpPort) triples in document order.
    pub relays: Vec<(String, u16, u16)>,
}

/// Parses a 200 SERVICE response body. Returns `None` unless the
/// document's `reasonPhrase` is `OK`.
pub(crate) fn parse_credentials_response(body: &str) -> Option<ParsedCredentialsResponse> {
    let mut reader = Reader::from_str(body);
    let mut path: Vec<String> = Vec::new();
    let mut parsed = ParsedCredentialsResponse::default();
    let mut reason_ok = false;
    let mut relay: Option<(String, u16, u16)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();

                if path.is_empty() {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"reasonPhrase" {
                            reason_ok = attr.unescape_value().ok()?.as_ref() == "OK";
                        }
                    }
                }

                if name == "mediaRelay" {
                    relay = Some((String::new(), 0, 0));
                }

                path.push(name);
            }
            Ok(Event::End(_)) => {
                if path.last().map(String::as_str) == Some("mediaRelay") {
                    if let Some(entry) = relay.take() {
                        parsed.relays.push(entry);
                    }
                }
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().ok()?.trim().to_string();
                if text.is_empty() {
                    continue;
                }

                match path_suffix(&path) {
                    ("credentials", "username") => parsed.username = text,
                    ("credentials", "password") => parsed.password = text,
                    ("mediaRelay", "hostName") => {
                        if let Some(entry) = relay.as_mut() {
                            entry.0 = text;
                        }
                    }
                    ("mediaRelay", "udpPort") => {
                        if let Some(entry) = relay.as_mut() {
                            entry.1 = text.parse().unwrap_or(0);
                        }
                    }
                    ("mediaRelay", "tcpPort") => {
                        if let Some(entry) = relay.as_mut() {
                            entry.2 = text.parse().unwrap_or(0);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    if !reason_ok {
        debug!("credentials response without OK reasonPhrase");
        return None;
    }

    Some(parsed)
}

fn path_suffix(path: &[String]) -> (&str, &str) {
    let len = path.len();
    if len < 2 {
        return ("", "");
    }
    (path[len - 2].as_str(), path[len - 1].as_str())
}
