//! ICE candidate classification.

use peerlink_core::IceTransportPolicy;

/// Candidate type token (`host`, `srflx`, `prflx`, `relay`): the eighth
/// space-delimited field of the candidate line.
pub fn candidate_type(candidate: &str) -> Option<&str> {
    candidate.split(' ').nth(7)
}

/// Any mention of `tcp` disqualifies the candidate, which also covers
/// `ssltcp` transports and TCP relay hosts.
fn is_tcp(candidate: &str) -> bool {
    candidate.to_ascii_lowercase().contains("tcp")
}

/// Whether a candidate may be signalled to the peer. Empty candidates and
/// TCP candidates are always rejected; a relay-only policy also rejects
/// every non-`relay` candidate.
pub fn is_acceptable_candidate(candidate: &str, policy: IceTransportPolicy) -> bool {
    let candidate = candidate.trim();
    if candidate.is_empty() || is_tcp(candidate) {
        return false;
    }
    if policy.is_relay_only() {
        return candidate_type(candidate) == Some("relay");
    }
    true
}
