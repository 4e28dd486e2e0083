//! Capability traits for the media engine and its neighbors.
//!
//! The ICE/RTP implementation, DNS and user notification live outside
//! this crate. The manager talks to them through these traits and is
//! driven back through its own `on_*` methods; no trait method may call
//! back into the manager.

use ucsip_sdp_core::{CandidateType, IceVersion, MediaType, TransportProtocol};

use crate::config::EncryptionPolicy;
use crate::relay::MediaRelay;

/// A transport candidate as reported by the media engine, before any
/// cleanup. The same shape as the SDP candidate but kept distinct: what
/// the engine reports is not necessarily fit for the wire.
#[derive(Debug, Clone, Default)]
pub struct BackendCandidate {
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

/// A codec as reported or consumed by the media engine.
#[derive(Debug, Clone)]
pub struct BackendCodec {
    pub id: u32,
    pub name: String,
    pub clock_rate: u32,
    pub media_type: MediaType,
    pub parameters: Vec<(String, String)>,
}

/// The ICE/RTP engine.
///
/// Streams are addressed by (call id, stream id). Methods that mirror
/// asynchronous engine work return immediately; completion is reported
/// by the embedder through the manager's `on_*` methods.
pub trait MediaBackend {
    /// Creates a stream, binding within `port_range`, using the given
    /// relay set for TURN-style allocation. Returns false when the
    /// stream cannot be created.
    #[allow(clippy::too_many_arguments)]
    fn add_stream(
        &mut self,
        call_id: &str,
        stream_id: &str,
        media_type: MediaType,
        ice_version: IceVersion,
        initiator: bool,
        relays: &[MediaRelay],
        relay_username: Option<&str>,
        relay_password: Option<&str>,
        port_range: (u16, u16),
    ) -> bool;

    /// Releases all engine resources of a stream.
    fn remove_stream(&mut self, call_id: &str, stream_id: &str);

    fn local_codecs(&mut self, call_id: &str, stream_id: &str) -> Vec<BackendCodec>;
    fn local_candidates(&mut self, call_id: &str, stream_id: &str) -> Vec<BackendCandidate>;
    /// Candidates of established pairs; empty before connectivity checks
    /// conclude.
    fn active_local_candidates(&mut self, call_id: &str, stream_id: &str)
        -> Vec<BackendCandidate>;
    fn active_remote_candidates(
        &mut self,
        call_id: &str,
        stream_id: &str,
    ) -> Vec<BackendCandidate>;

    /// Returns false when the codec set is unusable.
    fn set_remote_codecs(
        &mut self,
        call_id: &str,
        stream_id: &str,
        codecs: Vec<BackendCodec>,
    ) -> bool;
    fn add_remote_candidates(
        &mut self,
        call_id: &str,
        stream_id: &str,
        candidates: Vec<BackendCandidate>,
    );

    /// Installs both SRTP keys once each side has contributed one.
    fn set_encryption_keys(
        &mut self,
        call_id: &str,
        stream_id: &str,
        local_key: &[u8],
        remote_key: &[u8],
    );

    /// Local candidates and codecs are gathered.
    fn stream_initialized(&self, call_id: &str, stream_id: &str) -> bool;

    fn is_stream_held(&self, call_id: &str, stream_id: &str) -> bool;
    fn hold_stream(&mut self, call_id: &str, stream_id: &str, local: bool);
    fn unhold_stream(&mut self, call_id: &str, stream_id: &str, local: bool);

    /// Stops media flow on a stream (remote declined it or it failed).
    fn end_stream(&mut self, call_id: &str, stream_id: &str);

    /// Whether the call was accepted (locally or by the peer).
    fn accepted(&self, call_id: &str) -> bool;
    fn accept(&mut self, call_id: &str, local: bool);
    fn reject(&mut self, call_id: &str, local: bool);
    fn hangup(&mut self, call_id: &str, notify_peer: bool);

    /// Reads from a data stream. With `blocking` the engine must return
    /// exactly `buf.len()` bytes; otherwise it returns what is ready.
    fn read(&mut self, call_id: &str, stream_id: &str, buf: &mut [u8], blocking: bool) -> usize;
    /// Writes to a data stream.
    fn write(&mut self, call_id: &str, stream_id: &str, data: &[u8], blocking: bool);

    /// Our publicly routable IP address, as far as the engine knows.
    fn network_ip(&self) -> String;

    /// Client-side encryption preference; may defer to the server.
    fn encryption_policy(&self) -> EncryptionPolicy;

    /// RTCP CNAME for the call.
    fn set_cname(&mut self, call_id: &str, cname: &str);
}

/// Handle of an in-flight DNS query.
pub type DnsQueryHandle = u64;

/// Asynchronous A-record resolution. Outcomes are delivered to
/// `MediaSessionManager::relay_resolved`.
pub trait DnsResolver {
    fn query_a(&mut self, hostname: &str, port: u16) -> DnsQueryHandle;
    fn cancel(&mut self, handle: DnsQueryHandle);
}

/// User-visible error surface.
pub trait Notifier {
    fn notify_error(&mut self, title: &str, message: &str);
}
