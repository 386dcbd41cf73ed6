//! Payload-type lookup and `m=` line reordering.

use std::ops::Range;

use peerlink_core::MediaKind;
use tracing::debug;

use crate::lines::SdpLines;

/// Parsed `a=rtpmap:<pt> <name>/<clock>[/<channels>]` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    pub payload_type: String,
    pub encoding: String,
    pub clock_rate: String,
    pub channels: Option<String>,
}

impl RtpMap {
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix("a=rtpmap:")?;
        let (payload_type, codec) = rest.split_once(' ')?;
        if !is_payload_type(payload_type) {
            return None;
        }

        let mut parts = codec.trim().split('/');
        let encoding = parts.next()?;
        let clock_rate = parts.next()?;
        let valid_name = !encoding.is_empty()
            && encoding
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid_name || clock_rate.is_empty() || !clock_rate.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        Some(Self {
            payload_type: payload_type.to_string(),
            encoding: encoding.to_string(),
            clock_rate: clock_rate.to_string(),
            channels: parts.next().map(str::to_string),
        })
    }

    /// `codec` is either `name/clock` or a bare encoding name.
    pub fn matches(&self, codec: &str) -> bool {
        match codec.trim().split_once('/') {
            Some((name, rest)) => {
                let clock = rest.split('/').next().unwrap_or_default();
                name.eq_ignore_ascii_case(&self.encoding) && clock == self.clock_rate
            }
            None => codec.trim().eq_ignore_ascii_case(&self.encoding),
        }
    }
}

pub(crate) fn is_payload_type(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

/// Payload types mapped to `codec` within `range`, in `a=rtpmap` order.
pub fn codec_payload_types_in(lines: &SdpLines, range: Range<usize>, codec: &str) -> Vec<String> {
    let end = range.end.min(lines.len());
    (range.start..end)
        .filter_map(|index| lines.line(index).and_then(RtpMap::parse))
        .filter(|rtpmap| rtpmap.matches(codec))
        .map(|rtpmap| rtpmap.payload_type)
        .collect()
}

/// Index of the `a=rtpmap` line for `payload_type` within `range`.
pub fn rtpmap_line_in(lines: &SdpLines, range: Range<usize>, payload_type: &str) -> Option<usize> {
    let end = range.end.min(lines.len());
    (range.start..end).find(|&index| {
        lines
            .line(index)
            .and_then(RtpMap::parse)
            .is_some_and(|rtpmap| rtpmap.payload_type == payload_type)
    })
}

/// First payload type mapped to `codec` anywhere in the description.
pub fn codec_payload_type(sdp: &str, codec: &str) -> Option<String> {
    let lines = SdpLines::parse(sdp);
    codec_payload_types_in(&lines, 0..lines.len(), codec)
        .into_iter()
        .next()
}

/// Payload list of an `m=` line (fourth token onwards).
pub fn m_line_payloads(m_line: &str) -> Vec<&str> {
    m_line.split(' ').skip(3).collect()
}

/// Moves `payload_type` to the front of the `m=` line's payload list,
/// keeping the relative order of the rest. Lines that do not list the
/// payload are returned unchanged.
pub fn set_default_codec(m_line: &str, payload_type: &str) -> String {
    let elements: Vec<&str> = m_line.split(' ').collect();
    if elements.len() <= 3 || !elements[3..].contains(&payload_type) {
        return m_line.to_string();
    }

    let mut reordered: Vec<&str> = elements[..3].to_vec();
    reordered.push(payload_type);
    reordered.extend(elements[3..].iter().filter(|pt| **pt != payload_type));
    reordered.join(" ")
}

pub fn remove_payload_type_from_m_line(m_line: &str, payload_type: &str) -> String {
    let elements: Vec<&str> = m_line.split(' ').collect();
    if elements.len() <= 3 {
        return m_line.to_string();
    }

    let mut kept: Vec<&str> = elements[..3].to_vec();
    kept.extend(elements[3..].iter().filter(|pt| **pt != payload_type));
    kept.join(" ")
}

/// Promotes `codec` to the front of the `m=` line of its own media section.
pub(crate) fn prefer_codec_lines(lines: &mut SdpLines, kind: MediaKind, codec: &str) -> bool {
    let Some(section) = lines.media_section(kind) else {
        debug!(kind = kind.as_str(), codec, "no m-line for codec preference");
        return false;
    };

    let payloads = codec_payload_types_in(lines, section.clone(), codec);
    if payloads.is_empty() {
        debug!(kind = kind.as_str(), codec, "preferred codec not offered");
        return false;
    }

    let original = lines.line(section.start).unwrap_or_default().to_string();
    let mut m_line = original.clone();
    for payload in payloads.iter().rev() {
        m_line = set_default_codec(&m_line, payload);
    }

    if m_line == original {
        return false;
    }
    debug!(kind = kind.as_str(), codec, %m_line, "promoted preferred codec");
    lines.replace(section.start, m_line);
    true
}

pub fn prefer_codec(sdp: &str, kind: MediaKind, codec: &str) -> String {
    let mut lines = SdpLines::parse(sdp);
    if prefer_codec_lines(&mut lines, kind, codec) {
        lines.to_sdp()
    } else {
        sdp.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::CHROME_OFFER;

    fn m_line(sdp: &str, kind: MediaKind) -> String {
        let lines = SdpLines::parse(sdp);
        let section = lines.media_section(kind).expect("section");
        lines.line(section.start).expect("m-line").to_string()
    }

    #[test]
    fn parses_rtpmap_with_channels() {
        let rtpmap = RtpMap::parse("a=rtpmap:111 opus/48000/2").expect("rtpmap");
        assert_eq!(rtpmap.payload_type, "111");
        assert_eq!(rtpmap.encoding, "opus");
        assert_eq!(rtpmap.clock_rate, "48000");
        assert_eq!(rtpmap.channels.as_deref(), Some("2"));
        assert!(rtpmap.matches("OPUS/48000"));
        assert!(rtpmap.matches("opus"));
        assert!(!rtpmap.matches("opus/16000"));
    }

    #[test]
    fn rejects_malformed_rtpmap() {
        assert!(RtpMap::parse("a=rtpmap:abc opus/48000").is_none());
        assert!(RtpMap::parse("a=rtpmap:111 opus").is_none());
        assert!(RtpMap::parse("a=fmtp:111 minptime=10").is_none());
    }

    #[test]
    fn promotes_pcmu_in_audio_section() {
        let sdp = "m=audio 9 UDP/TLS/RTP/SAVPF 111 0 8\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:111 opus/48000/2\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\n";
        let rewritten = prefer_codec(sdp, MediaKind::Audio, "PCMU/8000");
        assert!(rewritten.starts_with("m=audio 9 UDP/TLS/RTP/SAVPF 0 111 8\r\n"));
    }

    #[test]
    fn promotion_never_crosses_sections() {
        let rewritten = prefer_codec(CHROME_OFFER, MediaKind::Video, "PCMU/8000");
        assert_eq!(rewritten, CHROME_OFFER);
    }

    #[test]
    fn promotes_every_payload_of_codec_in_rtpmap_order() {
        let sdp = "m=video 9 RTP/AVP 96 102 100 104\r\na=rtpmap:96 VP8/90000\r\na=rtpmap:102 H264/90000\r\na=rtpmap:100 VP9/90000\r\na=rtpmap:104 H264/90000";
        let rewritten = prefer_codec(sdp, MediaKind::Video, "H264/90000");
        assert_eq!(m_line(&rewritten, MediaKind::Video), "m=video 9 RTP/AVP 102 104 96 100");
    }

    #[test]
    fn unknown_codec_is_noop() {
        assert_eq!(
            prefer_codec(CHROME_OFFER, MediaKind::Audio, "G722/8000"),
            CHROME_OFFER
        );
    }

    #[test]
    fn finds_payload_type_by_name() {
        assert_eq!(codec_payload_type(CHROME_OFFER, "VP8/90000").as_deref(), Some("96"));
        assert_eq!(codec_payload_type(CHROME_OFFER, "red").as_deref(), Some("116"));
        assert_eq!(codec_payload_type(CHROME_OFFER, "AV1X/90000"), None);
    }

    #[test]
    fn removes_payload_from_m_line() {
        assert_eq!(
            remove_payload_type_from_m_line("m=video 9 RTP/AVP 96 116 97", "116"),
            "m=video 9 RTP/AVP 96 97"
        );
    }
}
