use std::{fmt, str::FromStr};

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

/// Which candidate types the local side may use.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}

impl IceTransportPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IceTransportPolicy::All => "all",
            IceTransportPolicy::Relay => "relay",
        }
    }

    pub fn is_relay_only(&self) -> bool {
        matches!(self, IceTransportPolicy::Relay)
    }
}

impl fmt::Display for IceTransportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IceTransportPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(IceTransportPolicy::All),
            "relay" => Ok(IceTransportPolicy::Relay),
            other => Err(format!("unsupported ice transport policy '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for IceTransportPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        IceTransportPolicy::from_str(&value).map_err(D::Error::custom)
    }
}

/// Opaque ICE candidate as surfaced by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, m_line_index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_m_line_index = Some(m_line_index);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults_to_all() {
        assert_eq!(IceTransportPolicy::default(), IceTransportPolicy::All);
        assert!(!IceTransportPolicy::default().is_relay_only());
    }

    #[test]
    fn policy_deserializes_from_string() {
        let policy: IceTransportPolicy = serde_json::from_str(r#""RELAY""#).expect("policy");
        assert!(policy.is_relay_only());
        assert!(serde_json::from_str::<IceTransportPolicy>(r#""nohost""#).is_err());
    }

    #[test]
    fn candidate_uses_browser_field_names() {
        let candidate = IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host")
            .with_mid("0", 0);
        let json = serde_json::to_value(&candidate).expect("serialize");
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }
}
