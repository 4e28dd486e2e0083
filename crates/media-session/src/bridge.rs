//! Translation between engine candidate/codec objects and the SDP
//! model, including the cleanup passes the wire format needs.
//!
//! Older media engines mistag TCP candidate pairs as UDP and report
//! zero ports on TCP-active candidates; both quirks must be repaired
//! before the candidates are fit for an OCS/Lync peer. IPv6 candidates
//! are not negotiable with these servers at all and are dropped.

use std::collections::HashMap;

use tracing::warn;
use ucsip_sdp_core::{
    CandidateType, MediaType, SdpCandidate, SdpCodec, TransportProtocol,
};

use crate::backend::{BackendCandidate, BackendCodec};

/// Converts engine candidates to wire candidates in negotiation order,
/// dropping anything IPv6.
pub fn backend_candidates_to_sdp(candidates: Vec<BackendCandidate>) -> Vec<SdpCandidate> {
    let mut result = Vec::new();

    for candidate in candidates {
        if candidate.ip.is_empty()
            || candidate.ip.contains(':')
            || candidate.base_ip.contains(':')
        {
            // Ignore IPv6 candidates.
            continue;
        }

        ucsip_sdp_core::candidate::insert_candidate_sorted(
            &mut result,
            SdpCandidate {
                foundation: candidate.foundation,
                component: candidate.component,
                kind: candidate.kind,
                protocol: candidate.protocol,
                ip: candidate.ip,
                port: candidate.port,
                base_ip: candidate.base_ip,
                base_port: candidate.base_port,
                priority: candidate.priority,
                username: candidate.username,
                password: candidate.password,
            },
        );
    }

    result
}

/// Drops UDP candidate pairs that are actually mistagged TCP candidates.
///
/// RTP+RTCP UDP pairs sharing a foundation never share a port; when they
/// do (or when two non-host candidates share a base port), an old engine
/// has relabeled a TCP pair and both entries are unusable.
pub fn remove_mistagged_tcp_candidates(candidates: Vec<BackendCandidate>) -> Vec<BackendCandidate> {
    let mut kept: Vec<Option<BackendCandidate>> = candidates.into_iter().map(Some).collect();
    let mut foundation_to_idx: HashMap<String, usize> = HashMap::new();

    for i in 0..kept.len() {
        let c1 = match &kept[i] {
            Some(c) if c.protocol == TransportProtocol::Udp => c.clone(),
            _ => continue,
        };

        match foundation_to_idx.get(&c1.foundation).copied() {
            Some(j) => {
                let c2 = match &kept[j] {
                    Some(c) => c,
                    None => continue,
                };

                if c1.port == c2.port
                    || (c1.kind != CandidateType::Host && c1.base_port == c2.base_port)
                {
                    kept[i] = None;
                    kept[j] = None;
                    foundation_to_idx.remove(&c1.foundation);
                }
            }
            None => {
                foundation_to_idx.insert(c1.foundation.clone(), i);
            }
        }
    }

    kept.into_iter().flatten().collect()
}

/// Copies ports from TCP-passive candidates onto their TCP-active peers
/// where the engine reported zero, and back-fills relay base ports from
/// the host candidate listening on the same address.
pub fn fill_zero_tcp_active_ports(candidates: &mut [SdpCandidate]) {
    let ip_to_port: HashMap<String, u16> = candidates
        .iter()
        .filter(|c| {
            c.protocol == TransportProtocol::TcpPassive && c.kind == CandidateType::Host
        })
        .map(|c| (c.ip.clone(), c.port))
        .collect();

    for i in 0..candidates.len() {
        if candidates[i].protocol != TransportProtocol::TcpActive {
            continue;
        }

        let active = candidates[i].clone();
        let passive = candidates
            .iter()
            .find(|p| {
                p.protocol == TransportProtocol::TcpPassive
                    && p.kind == active.kind
                    && p.ip == active.ip
                    && p.base_ip == active.base_ip
            })
            .map(|p| (p.port, p.base_port));

        if let Some((port, base_port)) = passive {
            if candidates[i].port == 0 {
                candidates[i].port = port;
            }
            if candidates[i].base_port == 0 {
                candidates[i].base_port = base_port;
            }
        }
    }

    for candidate in candidates.iter_mut() {
        if candidate.kind == CandidateType::Relay && candidate.base_port == 0 {
            match ip_to_port.get(&candidate.base_ip) {
                Some(port) => candidate.base_port = *port,
                None => warn!(
                    foundation = %candidate.foundation,
                    "couldn't determine base port for relay candidate"
                ),
            }
        }
    }
}

/// Scans candidates of the given type for a consistent (ip, RTP port,
/// RTCP port) triple. Returns as soon as both ports are known; either
/// may stay zero when the list offers no such component.
pub fn stream_ip_and_ports(
    candidates: &[SdpCandidate],
    kind: CandidateType,
) -> (Option<String>, u16, u16) {
    let mut ip: Option<String> = None;
    let mut rtp_port = 0u16;
    let mut rtcp_port = 0u16;

    for candidate in candidates {
        if kind == CandidateType::Any || candidate.kind == kind {
            match &ip {
                None => ip = Some(candidate.ip.clone()),
                Some(current) if *current != candidate.ip => continue,
                Some(_) => {}
            }

            match candidate.component {
                1 => rtp_port = candidate.port,
                2 => rtcp_port = candidate.port,
                _ => {}
            }
        }

        if rtp_port != 0 && rtcp_port != 0 {
            break;
        }
    }

    (ip, rtp_port, rtcp_port)
}

/// Converts engine codecs to SDP codecs, forcing the stream's media
/// type and de-duplicating payload ids (first seen wins).
pub fn backend_codecs_to_sdp(codecs: Vec<BackendCodec>, media_type: MediaType) -> Vec<SdpCodec> {
    let mut result = Vec::new();
    for codec in codecs {
        ucsip_sdp_core::codec::insert_codec_unique_sorted(
            &mut result,
            SdpCodec {
                id: codec.id,
                name: codec.name,
                clock_rate: codec.clock_rate,
                media_type,
                parameters: codec.parameters,
            },
        );
    }
    result
}

/// Converts remote SDP codecs into engine codecs.
pub fn sdp_codecs_to_backend(codecs: &[SdpCodec]) -> Vec<BackendCodec> {
    codecs
        .iter()
        .map(|c| BackendCodec {
            id: c.id,
            name: c.name.clone(),
            clock_rate: c.clock_rate,
            media_type: c.media_type,
            parameters: c.parameters.clone(),
        })
        .collect()
}

/// Converts remote SDP candidates into engine candidates.
pub fn sdp_candidates_to_backend(candidates: &[SdpCandidate]) -> Vec<BackendCandidate> {
    candidates
        .iter()
        .map(|c| BackendCandidate {
            foundation: c.foundation.clone(),
            component: c.component,
            kind: c.kind,
            protocol: c.protocol,
            ip: c.ip.clone(),
            port: c.port,
            base_ip: c.base_ip.clone(),
            base_port: c.base_port,
            priority: c.priority,
            username: c.username.clone(),
            password: c.password.clone(),
        })
        .collect()
}
