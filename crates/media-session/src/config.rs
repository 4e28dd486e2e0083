//! Configuration surface consumed by the call manager.
//!
//! Loading and persisting these values is the embedder's business; the
//! core only reads them.

/// SRTP negotiation policy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionPolicy {
    #[default]
    Rejected,
    Optional,
    Required,
    /// Defer to whatever the server provisioned.
    ObeyServer,
}

impl EncryptionPolicy {
    /// Wire token for the `encryption` SDP attribute.
    pub fn token(&self) -> &'static str {
        match self {
            EncryptionPolicy::Rejected => "rejected",
            EncryptionPolicy::Optional => "optional",
            EncryptionPolicy::Required | EncryptionPolicy::ObeyServer => "required",
        }
    }
}

/// Account-scoped settings for media calls.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Our own SIP URI, e.g. `sip:alice@example.com`.
    pub self_uri: String,
    /// Value of the `Contact` header, e.g. `<sip:alice@10.0.0.1:5060>`.
    pub contact: String,
    /// SIP domain used when dialing phone numbers.
    pub sip_domain: String,
    /// UC line URI advertised via `P-Preferred-Identity`, when set.
    pub uc_line_uri: Option<String>,
    /// MRAS service URI for A/V Edge credentials.
    pub mras_uri: Option<String>,
    /// URI of the audio test service bot.
    pub test_call_bot_uri: Option<String>,

    /// Encryption policy provisioned by the server.
    pub server_av_encryption_policy: EncryptionPolicy,
    /// Allocate SRTP key material for new streams.
    pub srtp_enabled: bool,

    pub min_media_port: u16,
    pub max_media_port: u16,
    pub min_audio_port: u16,
    pub max_audio_port: u16,
    pub min_video_port: u16,
    pub max_video_port: u16,
    pub min_filetransfer_port: u16,
    pub max_filetransfer_port: u16,
    pub min_appsharing_port: u16,
    pub max_appsharing_port: u16,

    /// Server is OCS 2007 or newer (enables phone-state publishing).
    pub ocs2007: bool,
    /// Server is Lync 2013 or newer (conference ICE defaults to RFC 5245).
    pub lync2013: bool,
    /// We are connected from outside the corporate network.
    pub remote_user: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            self_uri: String::new(),
            contact: String::new(),
            sip_domain: String::new(),
            uc_line_uri: None,
            mras_uri: None,
            test_call_bot_uri: None,
            server_av_encryption_policy: EncryptionPolicy::ObeyServer,
            srtp_enabled: true,
            min_media_port: 5062,
            max_media_port: 5262,
            min_audio_port: 5062,
            max_audio_port: 5262,
            min_video_port: 5062,
            max_video_port: 5262,
            min_filetransfer_port: 5062,
            max_filetransfer_port: 5262,
            min_appsharing_port: 5062,
            max_appsharing_port: 5262,
            ocs2007: true,
            lync2013: false,
            remote_user: false,
        }
    }
}
