//! Opus fmtp knobs.

use peerlink_core::{CodecPreferences, MediaKind};

use crate::{
    fmtp::{remove_codec_param_in, set_codec_param_in},
    lines::SdpLines,
};

pub const OPUS_CODEC: &str = "opus/48000";

fn toggle_param(lines: &mut SdpLines, flag: Option<&str>, key: &str) -> bool {
    let Some(section) = lines.media_section(MediaKind::Audio) else {
        return false;
    };
    match CodecPreferences::flag(flag) {
        Some(true) => set_codec_param_in(lines, section, OPUS_CODEC, key, "1"),
        Some(false) => remove_codec_param_in(lines, section, OPUS_CODEC, key),
        None => false,
    }
}

/// Applies stereo, in-band FEC, DTX and max playback rate preferences to the
/// Opus payload of the audio section. Unset knobs leave the line alone.
pub(crate) fn apply_opus_options(lines: &mut SdpLines, prefs: &CodecPreferences) -> bool {
    let mut changed = toggle_param(lines, prefs.opus_stereo.as_deref(), "stereo");
    changed |= toggle_param(lines, prefs.opus_fec.as_deref(), "useinbandfec");
    changed |= toggle_param(lines, prefs.opus_dtx.as_deref(), "usedtx");

    if let Some(rate) = prefs.opus_max_playback_rate.as_deref() {
        if let Some(section) = lines.media_section(MediaKind::Audio) {
            changed |= set_codec_param_in(lines, section, OPUS_CODEC, "maxplaybackrate", rate.trim());
        }
    }
    changed
}
