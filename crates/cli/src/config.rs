use std::str::FromStr;

use peerlink_core::{CodecPreferences, IceTransportPolicy, PreferenceError};
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid codec preferences: {0}")]
    InvalidPreference(#[from] PreferenceError),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    pub log_format: LogFormat,
    pub ice_transport_policy: IceTransportPolicy,
    pub preferences: CodecPreferences,
}

/// Values given on the command line; they win over files and environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub log_format: Option<LogFormat>,
    pub ice_transport_policy: Option<IceTransportPolicy>,
    pub preferences: CodecPreferences,
}

fn merge(target: &mut Option<String>, value: &Option<String>) {
    if value.is_some() {
        target.clone_from(value);
    }
}

impl ToolConfig {
    const ENV_PREFIX: &'static str = "PEERLINK";

    pub fn load() -> Result<Self, ConfigError> {
        let defaults = ToolConfig::default();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/peerlink").required(false))
            .add_source(config::File::with_name("config/peerlink.local").required(false))
            .add_source(
                config::Environment::with_prefix(Self::ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("log_format", defaults.log_format.as_str())?
            .set_default(
                "ice_transport_policy",
                defaults.ice_transport_policy.as_str(),
            )?;

        let settings: ToolConfig = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) -> Result<(), ConfigError> {
        if let Some(format) = overrides.log_format {
            self.log_format = format;
        }
        if let Some(policy) = overrides.ice_transport_policy {
            self.ice_transport_policy = policy;
        }

        let from = &overrides.preferences;
        let into = &mut self.preferences;
        merge(&mut into.audio_send_codec, &from.audio_send_codec);
        merge(&mut into.audio_recv_codec, &from.audio_recv_codec);
        merge(&mut into.video_send_codec, &from.video_send_codec);
        merge(&mut into.video_recv_codec, &from.video_recv_codec);
        merge(&mut into.opus_stereo, &from.opus_stereo);
        merge(&mut into.opus_fec, &from.opus_fec);
        merge(&mut into.opus_dtx, &from.opus_dtx);
        merge(&mut into.opus_max_playback_rate, &from.opus_max_playback_rate);
        merge(&mut into.audio_send_bitrate, &from.audio_send_bitrate);
        merge(&mut into.audio_recv_bitrate, &from.audio_recv_bitrate);
        merge(&mut into.video_send_bitrate, &from.video_send_bitrate);
        merge(&mut into.video_recv_bitrate, &from.video_recv_bitrate);
        merge(&mut into.video_initial_bitrate, &from.video_initial_bitrate);
        merge(&mut into.video_fec, &from.video_fec);

        self.validate()
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.preferences.validate()?;
        Ok(())
    }
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unsupported log format '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for LogFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        LogFormat::from_str(&value).map_err(D::Error::custom)
    }
}
