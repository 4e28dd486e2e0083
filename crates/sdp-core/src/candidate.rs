//! ICE candidate model and the two candidate-attribute encodings.
//!
//! RFC 5245 mode uses the standard `a=candidate` grammar with the
//! Microsoft transport tokens (`UDP`, `TCP-ACT`, `TCP-PASS`) and carries
//! the ICE credentials in `ice-ufrag`/`ice-pwd` media attributes. Draft-6
//! mode (OCS 2007) instead puts username and password on every candidate
//! line and expresses the priority as a q-value.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};
use crate::message::IceVersion;

/// Candidate type as negotiated on the wire.
///
/// `Any` never appears in SDP; it is the wildcard used when scanning a
/// candidate list for a usable (ip, port) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateType {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
    Any,
}

impl CandidateType {
    /// SDP token for the `typ` field.
    pub fn token(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
            CandidateType::Any => "host",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "host" => Some(CandidateType::Host),
            "srflx" => Some(CandidateType::ServerReflexive),
            "prflx" => Some(CandidateType::PeerReflexive),
            "relay" => Some(CandidateType::Relay),
            _ => None,
        }
    }
}

/// Transport protocol of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Udp,
    TcpActive,
    TcpPassive,
}

impl TransportProtocol {
    /// Microsoft wire token, shared by both ICE dialects.
    pub fn token(&self) -> &'static str {
        match self {
            TransportProtocol::Udp => "UDP",
            TransportProtocol::TcpActive => "TCP-ACT",
            TransportProtocol::TcpPassive => "TCP-PASS",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "UDP" => Some(TransportProtocol::Udp),
            "TCP-ACT" => Some(TransportProtocol::TcpActive),
            "TCP-PASS" => Some(TransportProtocol::TcpPassive),
            _ => None,
        }
    }
}

/// ICE component: RTP carries the media, RTCP the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Rtp,
    Rtcp,
}

impl Component {
    pub fn id(&self) -> u16 {
        match self {
            Component::Rtp => 1,
            Component::Rtcp => 2,
        }
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            1 => Some(Component::Rtp),
            2 => Some(Component::Rtcp),
            _ => None,
        }
    }
}

/// One transport candidate of a media stream.
///
/// `base_ip`/`base_port` are the related address for reflexive and relay
/// candidates (`raddr`/`rport` on the wire); empty/zero when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdpCandidate {
    pub foundation: String,
    pub component: u16,
    pub kind: CandidateType,
    pub protocol: TransportProtocol,
    pub ip: String,
    pub port: u16,
    pub base_ip: String,
    pub base_port: u16,
    pub priority: u32,
    pub username: String,
    pub password: String,
}

impl Default for CandidateType {
    fn default() -> Self {
        CandidateType::Host
    }
}

impl Default for TransportProtocol {
    fn default() -> Self {
        TransportProtocol::Udp
    }
}

impl SdpCandidate {
    /// Negotiation ordering: candidates sort by (foundation, username,
    /// component). Two candidates with an equal key describe the same
    /// transport pair.
    pub fn cmp_negotiation(&self, other: &SdpCandidate) -> Ordering {
        self.foundation
            .cmp(&other.foundation)
            .then_with(|| self.username.cmp(&other.username))
            .then_with(|| self.component.cmp(&other.component))
    }

    /// Serializes the value part of the `a=candidate` attribute.
    pub fn to_attribute_value(&self, ice_version: IceVersion) -> String {
        match ice_version {
            IceVersion::Rfc5245 => {
                let mut line = format!(
                    "{} {} {} {} {} {} typ {}",
                    self.foundation,
                    self.component,
                    self.protocol.token(),
                    self.priority,
                    self.ip,
                    self.port,
                    self.kind.token()
                );
                if !self.base_ip.is_empty() {
                    line.push_str(&format!(" raddr {} rport {}", self.base_ip, self.base_port));
                }
                line
            }
            IceVersion::Draft6 => format!(
                "{} {} {} {} {}.{:03} {} {}",
                self.username,
                self.component,
                self.password,
                self.protocol.token(),
                self.priority / 1000,
                self.priority % 1000,
                self.ip,
                self.port
            ),
        }
    }

    /// Parses the value part of an `a=candidate` attribute.
    ///
    /// The dialect is recognized from the line itself: RFC 5245 lines
    /// carry a `typ` keyword, draft-6 lines do not.
    pub fn parse_attribute_value(value: &str) -> Result<(SdpCandidate, IceVersion)> {
        let parts: Vec<&str> = value.split_whitespace().collect();

        if parts.contains(&"typ") {
            Self::parse_rfc5245(&parts, value)
        } else {
            Self::parse_draft6(&parts, value)
        }
    }

    fn parse_rfc5245(parts: &[&str], raw: &str) -> Result<(SdpCandidate, IceVersion)> {
        if parts.len() < 8 {
            return Err(Error::InvalidCandidate(raw.to_string()));
        }

        let component = parts[1]
            .parse::<u16>()
            .map_err(|_| Error::InvalidCandidate(raw.to_string()))?;
        let protocol = TransportProtocol::from_token(parts[2])
            .ok_or_else(|| Error::InvalidCandidate(raw.to_string()))?;
        let priority = parts[3]
            .parse::<u32>()
            .map_err(|_| Error::InvalidCandidate(raw.to_string()))?;
        let port = parts[5]
            .parse::<u16>()
            .map_err(|_| Error::InvalidCandidate(raw.to_string()))?;

        if parts[6] != "typ" {
            return Err(Error::InvalidCandidate(raw.to_string()));
        }
        let kind = CandidateType::from_token(parts[7])
            .ok_or_else(|| Error::InvalidCandidate(raw.to_string()))?;

        let mut candidate = SdpCandidate {
            foundation: parts[0].to_string(),
            component,
            kind,
            protocol,
            ip: parts[4].to_string(),
            port,
            priority,
            ..Default::default()
        };

        let mut idx = 8;
        while idx + 1 < parts.len() {
            match parts[idx] {
                "raddr" => candidate.base_ip = parts[idx + 1].to_string(),
                "rport" => {
                    candidate.base_port = parts[idx + 1]
                        .parse::<u16>()
                        .map_err(|_| Error::InvalidCandidate(raw.to_string()))?;
                }
                _ => {}
            }
            idx += 2;
        }

        Ok((candidate, IceVersion::Rfc5245))
    }

    fn parse_draft6(parts: &[&str], raw: &str) -> Result<(SdpCandidate, IceVersion)> {
        if parts.len() < 7 {
            return Err(Error::InvalidCandidate(raw.to_string()));
        }

        let component = parts[1]
            .parse::<u16>()
            .map_err(|_| Error::InvalidCandidate(raw.to_string()))?;
        let protocol = TransportProtocol::from_token(parts[3])
            .ok_or_else(|| Error::InvalidCandidate(raw.to_string()))?;

        // Priority travels as a q-value with three fractional digits.
        let (whole, frac) = parts[4]
            .split_once('.')
            .ok_or_else(|| Error::InvalidCandidate(raw.to_string()))?;
        let whole = whole
            .parse::<u32>()
            .map_err(|_| Error::InvalidCandidate(raw.to_string()))?;
        let frac = frac
            .parse::<u32>()
            .map_err(|_| Error::InvalidCandidate(raw.to_string()))?;

        let port = parts[6]
            .parse::<u16>()
            .map_err(|_| Error::InvalidCandidate(raw.to_string()))?;

        Ok((
            SdpCandidate {
                // Draft-6 has no separate foundation; the username doubles
                // as the pairing key.
                foundation: parts[0].to_string(),
                component,
                kind: CandidateType::Host,
                protocol,
                ip: parts[5].to_string(),
                port,
                priority: whole * 1000 + frac,
                username: parts[0].to_string(),
                password: parts[2].to_string(),
                ..Default::default()
            },
            IceVersion::Draft6,
        ))
    }
}

impl fmt::Display for SdpCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_attribute_value(IceVersion::Rfc5245))
    }
}

/// Inserts a candidate keeping the list in negotiation order.
pub fn insert_candidate_sorted(candidates: &mut Vec<SdpCandidate>, candidate: SdpCandidate) {
    let pos = candidates
        .iter()
        .position(|c| candidate.cmp_negotiation(c) == Ordering::Less)
        .unwrap_or(candidates.len());
    candidates.insert(pos, candidate);
}
