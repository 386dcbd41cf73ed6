//! SDP rewriting for codec preferences, bandwidth caps and FEC.
//!
//! Every function here is a pure string transformation. A construct that is
//! missing from the description (no `m=` line for a media kind, an unknown
//! codec, an unparseable line) means "nothing to do" and the input is
//! returned unchanged.

pub mod bitrate;
pub mod candidate;
pub mod codec;
pub mod fec;
pub mod fmtp;
pub mod lines;
pub mod opus;

#[cfg(test)]
mod fixtures;

use peerlink_core::{CodecPreferences, MediaKind, SessionDescription};
use tracing::trace;

pub use bitrate::{set_bitrate, set_video_initial_bitrate};
pub use candidate::{candidate_type, is_acceptable_candidate};
pub use codec::{codec_payload_type, prefer_codec, RtpMap};
pub use fec::remove_video_fec;
pub use fmtp::{remove_codec_param, set_codec_param, FmtpEntry};
pub use lines::SdpLines;

fn prefer(lines: &mut SdpLines, kind: MediaKind, codec: Option<&str>) -> bool {
    match codec {
        Some(codec) => codec::prefer_codec_lines(lines, kind, codec),
        None => {
            trace!(kind = kind.as_str(), "no codec preference");
            false
        }
    }
}

fn bandwidth(lines: &mut SdpLines, kind: MediaKind, kbps: Option<&str>) -> bool {
    match CodecPreferences::bitrate(kbps) {
        Some(kbps) => bitrate::set_bitrate_lines(lines, kind, kbps),
        None => false,
    }
}

fn finish(desc: &SessionDescription, lines: SdpLines, changed: bool) -> SessionDescription {
    if changed {
        desc.with_sdp(lines.to_sdp())
    } else {
        desc.clone()
    }
}

/// Rewrites a description for the side that sends the media it describes:
/// Opus options, send codec promotion, send bandwidth caps, initial video
/// bitrate hints and optional FEC removal.
pub fn prepare_for_sending(
    desc: &SessionDescription,
    prefs: &CodecPreferences,
) -> SessionDescription {
    let mut lines = SdpLines::parse(&desc.sdp);

    let mut changed = opus::apply_opus_options(&mut lines, prefs);
    changed |= prefer(&mut lines, MediaKind::Audio, prefs.audio_send_codec.as_deref());
    changed |= prefer(&mut lines, MediaKind::Video, prefs.video_send_codec.as_deref());
    changed |= bandwidth(&mut lines, MediaKind::Audio, prefs.audio_send_bitrate.as_deref());
    changed |= bandwidth(&mut lines, MediaKind::Video, prefs.video_send_bitrate.as_deref());

    if let Some(initial) = CodecPreferences::bitrate(prefs.video_initial_bitrate.as_deref()) {
        changed |= bitrate::set_video_initial_bitrate_lines(
            &mut lines,
            initial,
            CodecPreferences::bitrate(prefs.video_send_bitrate.as_deref()),
            prefs.video_send_codec.as_deref(),
        );
    }

    if prefs.strips_video_fec() {
        changed |= fec::remove_video_fec_lines(&mut lines);
    }

    finish(desc, lines, changed)
}

/// Rewrites a description this side commits to receive media with: receive
/// codec promotion, receive bandwidth caps and optional FEC removal.
pub fn prepare_for_receiving(
    desc: &SessionDescription,
    prefs: &CodecPreferences,
) -> SessionDescription {
    let mut lines = SdpLines::parse(&desc.sdp);

    let mut changed = prefer(&mut lines, MediaKind::Audio, prefs.audio_recv_codec.as_deref());
    changed |= prefer(&mut lines, MediaKind::Video, prefs.video_recv_codec.as_deref());
    changed |= bandwidth(&mut lines, MediaKind::Audio, prefs.audio_recv_bitrate.as_deref());
    changed |= bandwidth(&mut lines, MediaKind::Video, prefs.video_recv_bitrate.as_deref());

    if prefs.strips_video_fec() {
        changed |= fec::remove_video_fec_lines(&mut lines);
    }

    finish(desc, lines, changed)
}
