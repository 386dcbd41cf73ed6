//! `a=fmtp` parsing and per-codec parameter edits.

use std::ops::Range;

use tracing::debug;

use crate::{
    codec::{codec_payload_types_in, is_payload_type, rtpmap_line_in},
    lines::SdpLines,
};

const FMTP_PREFIX: &str = "a=fmtp:";

/// One `a=fmtp` line. Parameters keep the order they were parsed or
/// inserted in. Bare tokens such as `0-16` or `120/120` are kept as keys
/// with an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmtpEntry {
    pub payload_type: String,
    params: Vec<(String, String)>,
}

impl FmtpEntry {
    pub fn new(payload_type: impl Into<String>) -> Self {
        Self {
            payload_type: payload_type.into(),
            params: Vec::new(),
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix(FMTP_PREFIX)?;
        let (payload_type, raw_params) = match rest.split_once(' ') {
            Some((pt, params)) => (pt, params),
            None => (rest, ""),
        };
        if !is_payload_type(payload_type) {
            return None;
        }

        let mut entry = Self::new(payload_type);
        for pair in raw_params.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) => entry.set(key.trim(), value.trim()),
                None => entry.set(pair, ""),
            }
        }
        Some(entry)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.params.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.params.iter().position(|(k, _)| k == key)?;
        Some(self.params.remove(index).1)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Serialized line, or `None` when no parameters remain.
    pub fn to_line(&self) -> Option<String> {
        if self.params.is_empty() {
            return None;
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{key}={value}")
                }
            })
            .collect();
        Some(format!("{FMTP_PREFIX}{} {}", self.payload_type, params.join(";")))
    }
}

/// Index of the `a=fmtp` line for `payload_type` within `range`.
pub fn fmtp_line_in(lines: &SdpLines, range: Range<usize>, payload_type: &str) -> Option<usize> {
    let end = range.end.min(lines.len());
    (range.start..end).find(|&index| {
        lines
            .line(index)
            .and_then(FmtpEntry::parse)
            .is_some_and(|entry| entry.payload_type == payload_type)
    })
}

pub(crate) fn set_codec_param_in(
    lines: &mut SdpLines,
    range: Range<usize>,
    codec: &str,
    key: &str,
    value: &str,
) -> bool {
    let Some(payload_type) = codec_payload_types_in(lines, range.clone(), codec)
        .into_iter()
        .next()
    else {
        debug!(codec, key, "codec not found; fmtp parameter not set");
        return false;
    };

    match fmtp_line_in(lines, range.clone(), &payload_type) {
        Some(index) => {
            let Some(mut entry) = lines.line(index).and_then(FmtpEntry::parse) else {
                return false;
            };
            if entry.get(key) == Some(value) {
                return false;
            }
            entry.set(key, value);
            let Some(line) = entry.to_line() else {
                return false;
            };
            lines.replace(index, line);
        }
        None => {
            let Some(rtpmap) = rtpmap_line_in(lines, range, &payload_type) else {
                return false;
            };
            let mut entry = FmtpEntry::new(payload_type);
            entry.set(key, value);
            let Some(line) = entry.to_line() else {
                return false;
            };
            lines.insert(rtpmap + 1, line);
        }
    }
    debug!(codec, key, value, "set fmtp parameter");
    true
}

pub(crate) fn remove_codec_param_in(
    lines: &mut SdpLines,
    range: Range<usize>,
    codec: &str,
    key: &str,
) -> bool {
    let Some(payload_type) = codec_payload_types_in(lines, range.clone(), codec)
        .into_iter()
        .next()
    else {
        return false;
    };
    let Some(index) = fmtp_line_in(lines, range, &payload_type) else {
        return false;
    };
    let Some(mut entry) = lines.line(index).and_then(FmtpEntry::parse) else {
        return false;
    };
    if entry.remove(key).is_none() {
        return false;
    }

    match entry.to_line() {
        Some(line) => lines.replace(index, line),
        None => {
            lines.remove(index);
        }
    }
    debug!(codec, key, "removed fmtp parameter");
    true
}

/// Sets `key=value` on the fmtp line of the first payload mapped to `codec`,
/// creating the line right after its `a=rtpmap` when missing.
pub fn set_codec_param(sdp: &str, codec: &str, key: &str, value: &str) -> String {
    let mut lines = SdpLines::parse(sdp);
    let range = 0..lines.len();
    if set_codec_param_in(&mut lines, range, codec, key, value) {
        lines.to_sdp()
    } else {
        sdp.to_string()
    }
}

/// Removes `key` from the codec's fmtp line, dropping the line once empty.
pub fn remove_codec_param(sdp: &str, codec: &str, key: &str) -> String {
    let mut lines = SdpLines::parse(sdp);
    let range = 0..lines.len();
    if remove_codec_param_in(&mut lines, range, codec, key) {
        lines.to_sdp()
    } else {
        sdp.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::CHROME_OFFER;

    #[test]
    fn fmtp_round_trip_keeps_pairs() {
        let entry = FmtpEntry::parse("a=fmtp:111 minptime=10; useinbandfec=1").expect("fmtp");
        assert_eq!(entry.payload_type, "111");
        assert_eq!(entry.get("minptime"), Some("10"));
        assert_eq!(entry.get("useinbandfec"), Some("1"));

        let line = entry.to_line().expect("line");
        let reparsed = FmtpEntry::parse(&line).expect("reparse");
        assert_eq!(reparsed, entry);
        assert_eq!(line, "a=fmtp:111 minptime=10;useinbandfec=1");
    }

    #[test]
    fn bare_tokens_survive() {
        let entry = FmtpEntry::parse("a=fmtp:126 0-16").expect("fmtp");
        assert_eq!(entry.get("0-16"), Some(""));
        assert_eq!(entry.to_line().as_deref(), Some("a=fmtp:126 0-16"));
    }

    #[test]
    fn empty_entry_has_no_line() {
        assert_eq!(FmtpEntry::new("96").to_line(), None);
        assert!(FmtpEntry::parse("a=fmtp:x apt=1").is_none());
    }

    #[test]
    fn set_overwrites_existing_key() {
        let rewritten = set_codec_param(CHROME_OFFER, "opus/48000", "useinbandfec", "0");
        assert!(rewritten.contains("\r\na=fmtp:111 minptime=10;useinbandfec=0\r\n"));
    }

    #[test]
    fn set_appends_new_key() {
        let rewritten = set_codec_param(CHROME_OFFER, "opus/48000", "stereo", "1");
        assert!(rewritten.contains("\r\na=fmtp:111 minptime=10;useinbandfec=1;stereo=1\r\n"));
    }

    #[test]
    fn set_synthesizes_line_after_rtpmap() {
        let rewritten = set_codec_param(CHROME_OFFER, "ISAC/16000", "maxaveragebitrate", "32000");
        assert!(rewritten
            .contains("a=rtpmap:103 ISAC/16000\r\na=fmtp:103 maxaveragebitrate=32000\r\n"));
    }

    #[test]
    fn set_on_missing_codec_is_noop() {
        assert_eq!(set_codec_param(CHROME_OFFER, "G722/8000", "a", "b"), CHROME_OFFER);
    }

    #[test]
    fn remove_keeps_remaining_keys() {
        let rewritten = remove_codec_param(CHROME_OFFER, "opus/48000", "useinbandfec");
        assert!(rewritten.contains("\r\na=fmtp:111 minptime=10\r\n"));
    }

    #[test]
    fn remove_last_key_drops_line() {
        let once = remove_codec_param(CHROME_OFFER, "opus/48000", "useinbandfec");
        let twice = remove_codec_param(&once, "opus/48000", "minptime");
        assert!(!twice.contains("a=fmtp:111"));
        assert!(twice.contains("a=rtcp-fb:111 transport-cc\r\na=rtpmap:103 ISAC/16000"));
    }

    #[test]
    fn remove_absent_key_is_noop() {
        assert_eq!(
            remove_codec_param(CHROME_OFFER, "opus/48000", "stereo"),
            CHROME_OFFER
        );
    }
}
