use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreferenceError {
    #[error("{field} must be a positive integer bitrate in kbps, got '{value}'")]
    InvalidBitrate { field: &'static str, value: String },
    #[error("{field} must be 'true' or 'false', got '{value}'")]
    InvalidFlag { field: &'static str, value: String },
}

/// Optional knobs applied when rewriting SDP. An absent field leaves the
/// corresponding aspect of the description untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_send_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_recv_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_send_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_recv_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus_stereo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus_fec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus_dtx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus_max_playback_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_send_bitrate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_recv_bitrate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_send_bitrate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_recv_bitrate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_initial_bitrate: Option<String>,
    /// `"false"` strips the red/ulpfec codecs from the video section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_fec: Option<String>,
}

impl CodecPreferences {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Tri-state reading of a boolean knob: `None` when absent or not a
    /// recognised literal.
    pub fn flag(value: Option<&str>) -> Option<bool> {
        match value.map(str::trim) {
            Some("true") => Some(true),
            Some("false") => Some(false),
            _ => None,
        }
    }

    /// Parses a kbps knob, treating zero and garbage as absent.
    pub fn bitrate(value: Option<&str>) -> Option<u32> {
        value
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|kbps| *kbps > 0)
    }

    pub fn strips_video_fec(&self) -> bool {
        Self::flag(self.video_fec.as_deref()) == Some(false)
    }

    /// Strict check used when preferences come from configuration. The
    /// rewriter itself never calls this and ignores malformed values.
    pub fn validate(&self) -> Result<(), PreferenceError> {
        let bitrates = [
            ("audio_send_bitrate", &self.audio_send_bitrate),
            ("audio_recv_bitrate", &self.audio_recv_bitrate),
            ("video_send_bitrate", &self.video_send_bitrate),
            ("video_recv_bitrate", &self.video_recv_bitrate),
            ("video_initial_bitrate", &self.video_initial_bitrate),
            ("opus_max_playback_rate", &self.opus_max_playback_rate),
        ];
        for (field, value) in bitrates {
            if let Some(raw) = value {
                if Self::bitrate(Some(raw)).is_none() {
                    return Err(PreferenceError::InvalidBitrate {
                        field,
                        value: raw.clone(),
                    });
                }
            }
        }

        let flags = [
            ("opus_stereo", &self.opus_stereo),
            ("opus_fec", &self.opus_fec),
            ("opus_dtx", &self.opus_dtx),
            ("video_fec", &self.video_fec),
        ];
        for (field, value) in flags {
            if let Some(raw) = value {
                if Self::flag(Some(raw)).is_none() {
                    return Err(PreferenceError::InvalidFlag {
                        field,
                        value: raw.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
