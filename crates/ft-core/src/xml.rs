//! ms-filetransfer control documents.
//!
//! Namespace `http://schemas.microsoft.com/rtc/2009/05/filetransfer`,
//! root elements `request`, `response` and `notify`, correlated by
//! `requestId`. Documents are small and flat; both ends ignore anything
//! they don't recognize.

use std::io::Cursor;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Error, Result};

/// The ms-filetransfer XML namespace.
pub const FT_NS: &str = "http://schemas.microsoft.com/rtc/2009/05/filetransfer";

/// Fixed file id placed in outgoing publishFile offers. Peers treat it
/// as an opaque GUID and echo it back in downloadFile.
pub const OUTGOING_FILE_ID: &str = "{6244F934-2EB1-443F-8E2C-48BA64AF463D}";

fn finish(writer: Writer<Cursor<Vec<u8>>>) -> String {
    String::from_utf8(writer.into_inner().into_inner()).unwrap()
}

fn response(request_id: u32, code: &str, reason: Option<&str>) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut root = BytesStart::new("response");
    root.push_attribute(("xmlns", FT_NS));
    root.push_attribute(("requestId", request_id.to_string().as_str()));
    root.push_attribute(("code", code));
    if let Some(reason) = reason {
        root.push_attribute(("reason", reason));
    }
    writer.write_event(Event::Empty(root)).unwrap();
    finish(writer)
}

/// `<response code="success"/>`
pub fn success_response(request_id: u32) -> String {
    response(request_id, "success", None)
}

/// `<response code="pending"/>` - download request acknowledged, data
/// plane about to open.
pub fn pending_response(request_id: u32) -> String {
    response(request_id, "pending", None)
}

/// `<response code="failure" reason="requestCancelled"/>`
pub fn cancelled_response(request_id: u32) -> String {
    response(request_id, "failure", Some("requestCancelled"))
}

fn request_root(request_id: u32) -> BytesStart<'static> {
    let mut root = BytesStart::new("request");
    root.push_attribute(("xmlns", FT_NS));
    root.push_attribute(("requestId", request_id.to_string().as_str()));
    root
}

fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, value: &str) {
    writer.write_event(Event::Start(BytesStart::new(tag))).unwrap();
    writer.write_event(Event::Text(BytesText::new(value))).unwrap();
    writer
        .write_event(Event::End(BytesStart::new(tag).to_end()))
        .unwrap();
}

/// `<request><downloadFile><fileInfo>..</fileInfo></downloadFile></request>`
pub fn download_file_request(request_id: u32, file_id: &str, file_name: &str) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Start(request_root(request_id))).unwrap();
    writer
        .write_event(Event::Start(BytesStart::new("downloadFile")))
        .unwrap();
    writer
        .write_event(Event::Start(BytesStart::new("fileInfo")))
        .unwrap();
    write_text_element(&mut writer, "id", file_id);
    write_text_element(&mut writer, "name", file_name);
    writer
        .write_event(Event::End(BytesStart::new("fileInfo").to_end()))
        .unwrap();
    writer
        .write_event(Event::End(BytesStart::new("downloadFile").to_end()))
        .unwrap();
    writer
        .write_event(Event::End(BytesStart::new("request").to_end()))
        .unwrap();
    finish(writer)
}

/// `<request><publishFile><fileInfo>..</fileInfo></publishFile></request>`
pub fn publish_file_request(
    request_id: u32,
    file_id: &str,
    file_name: &str,
    file_size: u64,
) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Start(request_root(request_id))).unwrap();
    writer
        .write_event(Event::Start(BytesStart::new("publishFile")))
        .unwrap();
    writer
        .write_event(Event::Start(BytesStart::new("fileInfo")))
        .unwrap();
    write_text_element(&mut writer, "id", file_id);
    write_text_element(&mut writer, "name", file_name);
    write_text_element(&mut writer, "size", &file_size.to_string());
    writer
        .write_event(Event::End(BytesStart::new("fileInfo").to_end()))
        .unwrap();
    writer
        .write_event(Event::End(BytesStart::new("publishFile").to_end()))
        .unwrap();
    writer
        .write_event(Event::End(BytesStart::new("request").to_end()))
        .unwrap();
    finish(writer)
}

/// `<request><cancelTransfer>..</cancelTransfer></request>`
pub fn cancel_transfer_request(
    request_id: u32,
    transfer_id: u32,
    file_id: &str,
    file_name: &str,
) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Start(request_root(request_id))).unwrap();
    writer
        .write_event(Event::Start(BytesStart::new("cancelTransfer")))
        .unwrap();
    write_text_element(&mut writer, "transferId", &transfer_id.to_string());
    writer
        .write_event(Event::Start(BytesStart::new("fileInfo")))
        .unwrap();
    write_text_element(&mut writer, "id", file_id);
    write_text_element(&mut writer, "name", file_name);
    writer
        .write_event(Event::End(BytesStart::new("fileInfo").to_end()))
        .unwrap();
    writer
        .write_event(Event::End(BytesStart::new("cancelTransfer").to_end()))
        .unwrap();
    writer
        .write_event(Event::End(BytesStart::new("request").to_end()))
        .unwrap();
    finish(writer)
}

/// `<notify><fileTransferProgress>..</fileTransferProgress></notify>`
/// reporting the complete byte range `[0, file_size - 1]`.
pub fn transfer_progress_notify(notify_id: u32, transfer_id: u32, file_size: u64) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut root = BytesStart::new("notify");
    root.push_attribute(("xmlns", FT_NS));
    root.push_attribute(("notifyId", notify_id.to_string().as_str()));
    writer.write_event(Event::Start(root)).unwrap();
    writer
        .write_event(Event::Start(BytesStart::new("fileTransferProgress")))
        .unwrap();
    write_text_element(&mut writer, "transferId", &transfer_id.to_string());
    writer
        .write_event(Event::Start(BytesStart::new("bytesReceived")))
        .unwrap();
    write_text_element(&mut writer, "from", "0");
    write_text_element(&mut writer, "to", &(file_size.saturating_sub(1)).to_string());
    writer
        .write_event(Event::End(BytesStart::new("bytesReceived").to_end()))
        .unwrap();
    writer
        .write_event(Event::End(BytesStart::new("fileTransferProgress").to_end()))
        .unwrap();
    writer
        .write_event(Event::End(BytesStart::new("notify").to_end()))
        .unwrap();
    finish(writer)
}

/// Body of a `request` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    DownloadFile,
    CancelTransfer,
    PublishFile {
        file_id: String,
        file_name: String,
        file_size: u64,
    },
    Unknown,
}

/// A parsed control document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtControl {
    Request {
        request_id: u32,
        body: RequestBody,
    },
    Response {
        request_id: u32,
        code: String,
        reason: Option<String>,
    },
    Notify {
        /// `fileTransferProgress/bytesReceived/to`, when present.
        progress_to: Option<u64>,
    },
}

/// Parses a control document.
pub fn parse_control(xml: &str) -> Result<FtControl> {
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();

    let mut root: Option<String> = None;
    let mut request_id = 0u32;
    let mut code = String::new();
    let mut reason: Option<String> = None;
    let mut body = RequestBody::Unknown;
    let mut progress_to: Option<u64> = None;

    let mut publish_id = String::new();
    let mut publish_name = String::new();
    let mut publish_size = 0u64;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::Xml(e.to_string()))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();

                if root.is_none() {
                    for attr in e.attributes().flatten() {
                        let value = attr
                            .unescape_value()
                            .map_err(|err| Error::Xml(err.to_string()))?
                            .to_string();
                        match attr.key.as_ref() {
                            b"requestId" => request_id = value.parse().unwrap_or(0),
                            b"code" => code = value,
                            b"reason" => reason = Some(value),
                            _ => {}
                        }
                    }
                    root = Some(name.clone());
                } else if root.as_deref() == Some("request") {
                    match name.as_str() {
                        "downloadFile" => body = RequestBody::DownloadFile,
                        "cancelTransfer" => body = RequestBody::CancelTransfer,
                        "publishFile" => {
                            body = RequestBody::PublishFile {
                                file_id: String::new(),
                                file_name: String::new(),
                                file_size: 0,
                            }
                        }
                        _ => {}
                    }
                }

                if matches!(event, Event::Start(_)) {
                    path.push(name);
                }
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::Xml(e.to_string()))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }

                let suffix: Vec<&str> = path.iter().rev().take(2).map(String::as_str).collect();
                match suffix.as_slice() {
                    // innermost first
                    ["id", "fileInfo"] => publish_id = text,
                    ["name", "fileInfo"] => publish_name = text,
                    ["size", "fileInfo"] => publish_size = text.parse().unwrap_or(0),
                    ["to", "bytesReceived"] => progress_to = text.parse().ok(),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let RequestBody::PublishFile {
        file_id,
        file_name,
        file_size,
    } = &mut body
    {
        *file_id = publish_id;
        *file_name = publish_name;
        *file_size = publish_size;
    }

    match root.as_deref() {
        Some("request") => Ok(FtControl::Request { request_id, body }),
        Some("response") => Ok(FtControl::Response {
            request_id,
            code,
            reason,
        }),
        Some("notify") => Ok(FtControl::Notify { progress_to }),
        other => Err(Error::Xml(format!(
            "unexpected root element {:?}",
            other.unwrap_or("")
        ))),
    }
}
