//! Removal of the red/ulpfec forward-error-correction codecs.

use std::collections::HashSet;

use peerlink_core::MediaKind;
use tracing::debug;

use crate::{
    codec::{remove_payload_type_from_m_line, RtpMap},
    fmtp::FmtpEntry,
    lines::SdpLines,
};

fn attribute_payload_type(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix("a=rtpmap:")
        .or_else(|| line.strip_prefix("a=fmtp:"))
        .or_else(|| line.strip_prefix("a=rtcp-fb:"))?;
    rest.split(' ').next()
}

pub(crate) fn remove_video_fec_lines(lines: &mut SdpLines) -> bool {
    let Some(section) = lines.media_section(MediaKind::Video) else {
        return false;
    };

    let rtpmaps: Vec<RtpMap> = (section.start..section.end)
        .filter_map(|index| lines.line(index).and_then(RtpMap::parse))
        .collect();
    let Some(red) = rtpmaps.iter().find(|rtpmap| rtpmap.matches("red")) else {
        debug!("no red codec in video section; fec left in place");
        return false;
    };

    let mut removed: HashSet<String> = HashSet::new();
    removed.insert(red.payload_type.clone());
    removed.extend(
        rtpmaps
            .iter()
            .filter(|rtpmap| rtpmap.matches("ulpfec"))
            .map(|rtpmap| rtpmap.payload_type.clone()),
    );

    // Retransmission payloads paired with a removed codec through `apt=`.
    let paired: Vec<String> = (section.start..section.end)
        .filter_map(|index| lines.line(index).and_then(FmtpEntry::parse))
        .filter(|entry| entry.get("apt").is_some_and(|apt| removed.contains(apt)))
        .map(|entry| entry.payload_type)
        .collect();
    removed.extend(paired);

    let m_line = lines.line(section.start).unwrap_or_default().to_string();
    let stripped = removed
        .iter()
        .fold(m_line, |line, pt| remove_payload_type_from_m_line(&line, pt));
    lines.replace(section.start, stripped);

    let dropped = lines.retain_in_range(section.start + 1..section.end, |line| {
        attribute_payload_type(line).map_or(true, |pt| !removed.contains(pt))
    });

    let mut payloads: Vec<&String> = removed.iter().collect();
    payloads.sort();
    debug!(?payloads, dropped, "removed video fec codecs");
    true
}

/// Strips `red`, `ulpfec` and their RTX companions from the video section:
/// payload list entries, `rtpmap`, `fmtp` and `rtcp-fb` lines.
pub fn remove_video_fec(sdp: &str) -> String {
    let mut lines = SdpLines::parse(sdp);
    if remove_video_fec_lines(&mut lines) {
        lines.to_sdp()
    } else {
        sdp.to_string()
    }
}
