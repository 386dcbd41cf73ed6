//! Line-oriented view over an SDP blob.
//!
//! SDP produced by WebRTC stacks is CRLF-terminated. Splitting on the exact
//! `\r\n` token and joining with the same token reproduces the input byte
//! for byte, which is what keeps untouched descriptions identical.

use std::ops::Range;

use peerlink_core::MediaKind;

pub const LINE_BREAK: &str = "\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpLines {
    lines: Vec<String>,
}

impl SdpLines {
    pub fn parse(sdp: &str) -> Self {
        Self {
            lines: sdp.split(LINE_BREAK).map(str::to_owned).collect(),
        }
    }

    pub fn to_sdp(&self) -> String {
        self.lines.join(LINE_BREAK)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn insert(&mut self, index: usize, line: impl Into<String>) {
        self.lines.insert(index, line.into());
    }

    pub fn remove(&mut self, index: usize) -> String {
        self.lines.remove(index)
    }

    pub fn replace(&mut self, index: usize, line: impl Into<String>) {
        self.lines[index] = line.into();
    }

    /// First line starting with `prefix` (and containing `substr`,
    /// case-insensitively, when given).
    pub fn find_line(&self, prefix: &str, substr: Option<&str>) -> Option<usize> {
        self.find_line_in_range(0..self.lines.len(), prefix, substr)
    }

    pub fn find_line_in_range(
        &self,
        range: Range<usize>,
        prefix: &str,
        substr: Option<&str>,
    ) -> Option<usize> {
        let end = range.end.min(self.lines.len());
        let needle = substr.map(str::to_ascii_lowercase);
        (range.start..end).find(|&index| {
            let line = &self.lines[index];
            line.starts_with(prefix)
                && needle
                    .as_deref()
                    .map_or(true, |needle| line.to_ascii_lowercase().contains(needle))
        })
    }

    /// Line range covering one media section: its `m=` line up to (not
    /// including) the next `m=` line or the end of the description.
    pub fn media_section(&self, kind: MediaKind) -> Option<Range<usize>> {
        let header = format!("m={} ", kind.as_str());
        let start = self.lines.iter().position(|line| line.starts_with(&header))?;
        let end = self
            .find_line_in_range(start + 1..self.lines.len(), "m=", None)
            .unwrap_or(self.lines.len());
        Some(start..end)
    }

    /// Removes every line in `range` rejected by `keep`. Returns how many
    /// lines were dropped so callers can adjust their own ranges.
    pub fn retain_in_range<F>(&mut self, range: Range<usize>, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.lines.len();
        let end = range.end.min(before);
        let mut index = 0;
        self.lines.retain(|line| {
            let current = index;
            index += 1;
            current < range.start || current >= end || keep(line)
        });
        before - self.lines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\nm=audio 9 RTP/AVP 0\r\nc=IN IP4 0.0.0.0\r\nm=video 9 RTP/AVP 96\r\na=rtpmap:96 VP8/90000\r\n";

    #[test]
    fn parse_and_join_round_trip_exactly() {
        let lines = SdpLines::parse(SDP);
        assert_eq!(lines.to_sdp(), SDP);
        assert_eq!(lines.line(lines.len() - 1), Some(""));
    }

    #[test]
    fn lf_only_input_is_one_line() {
        let lines = SdpLines::parse("v=0\nm=audio 9 RTP/AVP 0\n");
        assert_eq!(lines.len(), 1);
        assert!(lines.media_section(MediaKind::Audio).is_none());
    }

    #[test]
    fn finds_media_sections() {
        let lines = SdpLines::parse(SDP);
        assert_eq!(lines.media_section(MediaKind::Audio), Some(1..3));
        assert_eq!(lines.media_section(MediaKind::Video), Some(3..6));
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let lines = SdpLines::parse(SDP);
        assert_eq!(lines.find_line("a=rtpmap", Some("vp8")), Some(4));
        assert_eq!(lines.find_line_in_range(0..4, "a=rtpmap", None), None);
    }

    #[test]
    fn retain_only_touches_range() {
        let mut lines = SdpLines::parse("a=x\r\na=x\r\na=y\r\na=x");
        let removed = lines.retain_in_range(1..3, |line| line != "a=x");
        assert_eq!(removed, 1);
        assert_eq!(lines.to_sdp(), "a=x\r\na=y\r\na=x");
    }
}
