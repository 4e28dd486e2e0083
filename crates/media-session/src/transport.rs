//! SIP transport capability and message/dialog views.
//!
//! The transport owns framing, transactions and retransmission; the
//! core only needs to send requests within a dialog and to see inbound
//! messages as header/body pairs. Transaction completion is correlated
//! through the [`TransactionKey`] returned by each send.

use uuid::Uuid;

/// Correlates a sent request with its eventual response.
pub type TransactionKey = u64;

/// An inbound SIP message, either a request or a response.
#[derive(Debug, Clone, Default)]
pub struct SipMessage {
    /// Request method; `None` for responses.
    pub method: Option<String>,
    /// Response status code; `None` for requests.
    pub response: Option<u16>,
    /// Response reason string, verbatim.
    pub response_str: String,
    /// Headers in wire order; names are case-insensitive on lookup and
    /// may repeat.
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// CSeq number of the transaction this message belongs to.
    pub cseq: u32,
}

impl SipMessage {
    /// First value of the named header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header("Call-ID")
    }

    /// Numeric code of the `Warning` header, when parseable.
    pub fn warning_code(&self) -> Option<u16> {
        let value = self.header("Warning")?;
        let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    /// `reason="..."` text of the `ms-diagnostics` header, if any.
    pub fn ms_diagnostics_reason(&self) -> Option<String> {
        let value = self.header("ms-diagnostics")?;
        let (_, rest) = value.split_once("reason=\"")?;
        rest.split_once('"').map(|(reason, _)| reason.to_string())
    }
}

/// Extracts the bare URI from a `From`/`To` header value.
pub fn parse_uri(header_value: &str) -> String {
    let value = header_value.trim();
    if let (Some(start), Some(end)) = (value.find('<'), value.find('>')) {
        if start < end {
            return value[start + 1..end].to_string();
        }
    }
    // No angle brackets: strip any parameters.
    value
        .split_once(';')
        .map(|(uri, _)| uri)
        .unwrap_or(value)
        .trim()
        .to_string()
}

/// One call leg: (Call-ID, local tag, remote tag) plus the CSeq counter
/// the transport advances on our behalf.
#[derive(Debug, Clone, Default)]
pub struct Dialog {
    pub call_id: String,
    /// Peer URI.
    pub with: String,
    pub our_tag: String,
    pub their_tag: Option<String>,
    /// CSeq of the last request we sent in this dialog.
    pub cseq: u32,
    /// Transaction of the INVITE currently in flight, if any.
    pub outgoing_invite: Option<TransactionKey>,
}

impl Dialog {
    /// Starts a fresh outgoing dialog towards `with`.
    pub fn new_outgoing(with: &str) -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
            with: with.to_string(),
            our_tag: gentag(),
            their_tag: None,
            cseq: 0,
            outgoing_invite: None,
        }
    }

    /// Builds the dialog for an inbound INVITE: their tag comes from
    /// `From`, ours is freshly generated and will be placed on `To`.
    pub fn from_invite(msg: &SipMessage) -> Self {
        let their_tag = msg
            .header("From")
            .and_then(|from| from.split_once("tag=").map(|(_, t)| t.to_string()));

        Self {
            call_id: msg.call_id().unwrap_or_default().to_string(),
            with: msg.header("From").map(|h| parse_uri(h)).unwrap_or_default(),
            our_tag: gentag(),
            their_tag,
            cseq: 0,
            outgoing_invite: None,
        }
    }
}

fn gentag() -> String {
    Uuid::new_v4().simple().to_string()
}

/// The SIP transport capability.
///
/// `invite`, `info`, `service` and `bye` advance `dialog.cseq`; `ack`
/// reuses the current value (the manager rewinds it when acknowledging
/// a mid-dialog response). The transport owns all transaction timers;
/// a timed-out request must be surfaced as a 5xx response.
pub trait SipTransport {
    fn invite(
        &mut self,
        dialog: &mut Dialog,
        headers: &[(String, String)],
        body: &str,
    ) -> TransactionKey;

    /// Responds to an inbound request.
    fn respond(
        &mut self,
        msg: &SipMessage,
        code: u16,
        reason: &str,
        extra_headers: &[(String, String)],
        body: Option<&str>,
    );

    fn ack(&mut self, dialog: &mut Dialog);

    fn info(&mut self, dialog: &mut Dialog, content_type: &str, body: &str) -> TransactionKey;

    fn service(&mut self, uri: &str, content_type: &str, body: &str) -> TransactionKey;

    fn bye(&mut self, dialog: &mut Dialog);
}
