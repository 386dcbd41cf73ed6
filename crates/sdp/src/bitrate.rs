//! Bandwidth (`b=AS`) injection and Google bitrate hints.

use peerlink_core::MediaKind;
use tracing::debug;

use crate::{
    codec::{m_line_payloads, rtpmap_line_in, RtpMap},
    fmtp::set_codec_param_in,
    lines::SdpLines,
};

pub(crate) fn set_bitrate_lines(lines: &mut SdpLines, kind: MediaKind, kbps: u32) -> bool {
    let Some(section) = lines.media_section(kind) else {
        debug!(kind = kind.as_str(), "no m-line; bandwidth line not added");
        return false;
    };
    let Some(c_line) = lines.find_line_in_range(section.start + 1..section.end, "c=", None) else {
        debug!(kind = kind.as_str(), "no c-line; bandwidth line not added");
        return false;
    };

    let bandwidth = format!("b=AS:{kbps}");
    let existing = lines.find_line_in_range(c_line + 1..section.end, "b=AS", None);
    if existing == Some(c_line + 1) && lines.line(c_line + 1) == Some(bandwidth.as_str()) {
        return false;
    }
    if let Some(index) = existing {
        lines.remove(index);
    }
    lines.insert(c_line + 1, bandwidth);
    debug!(kind = kind.as_str(), kbps, "set bandwidth");
    true
}

/// Places a single `b=AS:<kbps>` line right after the section's `c=` line,
/// replacing any `b=AS` line already in that section.
pub fn set_bitrate(sdp: &str, kind: MediaKind, kbps: u32) -> String {
    let mut lines = SdpLines::parse(sdp);
    if set_bitrate_lines(&mut lines, kind, kbps) {
        lines.to_sdp()
    } else {
        sdp.to_string()
    }
}

pub(crate) fn set_video_initial_bitrate_lines(
    lines: &mut SdpLines,
    initial_kbps: u32,
    max_kbps: Option<u32>,
    codec: Option<&str>,
) -> bool {
    let mut initial = initial_kbps;
    let max = match max_kbps {
        Some(max) => {
            if initial > max {
                debug!(max, "clamping initial bitrate to send bitrate cap");
                initial = max;
            }
            max
        }
        None => initial,
    };

    let Some(section) = lines.media_section(MediaKind::Video) else {
        debug!("no video m-line; initial bitrate not set");
        return false;
    };

    let codec = match codec {
        Some(codec) => codec.to_string(),
        None => {
            let first = lines
                .line(section.start)
                .and_then(|m_line| m_line_payloads(m_line).first().map(|pt| pt.to_string()));
            let rtpmap = first
                .and_then(|pt| rtpmap_line_in(lines, section.clone(), &pt))
                .and_then(|index| lines.line(index))
                .and_then(RtpMap::parse);
            match rtpmap {
                Some(rtpmap) => rtpmap.encoding,
                None => {
                    debug!("first video payload has no rtpmap; initial bitrate not set");
                    return false;
                }
            }
        }
    };

    let min_set = set_codec_param_in(
        lines,
        section.clone(),
        &codec,
        "x-google-min-bitrate",
        &initial.to_string(),
    );
    // The min-bitrate line may have been synthesized inside the section.
    let section = lines.media_section(MediaKind::Video).unwrap_or(section);
    let max_set = set_codec_param_in(
        lines,
        section,
        &codec,
        "x-google-max-bitrate",
        &max.to_string(),
    );
    min_set || max_set
}

/// Adds `x-google-min-bitrate`/`x-google-max-bitrate` to the video send
/// codec. `codec` defaults to the first payload on the `m=video` line.
pub fn set_video_initial_bitrate(
    sdp: &str,
    initial_kbps: u32,
    max_kbps: Option<u32>,
    codec: Option<&str>,
) -> String {
    let mut lines = SdpLines::parse(sdp);
    if set_video_initial_bitrate_lines(&mut lines, initial_kbps, max_kbps, codec) {
        lines.to_sdp()
    } else {
        sdp.to_string()
    }
}
