//! Whole-message model.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::media::SdpMedia;

/// ICE protocol revision spoken by a session description.
///
/// OCS 2007 peers understand only the draft-6 dialect; Lync 2010 and
/// later expect RFC 5245. The call layer retries across the two when a
/// server rejects an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceVersion {
    Draft6,
    Rfc5245,
}

/// A parsed or generated session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpMessage {
    /// Session-level connection address.
    pub ip: String,
    pub media: Vec<SdpMedia>,
    pub ice_version: IceVersion,
}

impl SdpMessage {
    pub fn new(ip: impl Into<String>, ice_version: IceVersion) -> Self {
        Self {
            ip: ip.into(),
            media: Vec::new(),
            ice_version,
        }
    }

    /// Finds the media section with the given stream name.
    pub fn media_by_name(&self, name: &str) -> Option<&SdpMedia> {
        self.media.iter().find(|m| m.name == name)
    }
}

impl fmt::Display for SdpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::serializer::serialize_sdp(self))
    }
}

impl FromStr for SdpMessage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::parser::parse_sdp(s)
    }
}
