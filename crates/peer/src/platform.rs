//! Seam between the controller and the platform's peer connection.

use std::sync::Arc;

use async_trait::async_trait;
use peerlink_core::{IceCandidate, IceTransportPolicy, MediaKind, SessionDescription};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: MediaKind,
    pub ended: bool,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            ended: false,
        }
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self::new(id, MediaKind::Audio)
    }

    pub fn video(id: impl Into<String>) -> Self {
        Self::new(id, MediaKind::Video)
    }

    pub fn stop(&mut self) {
        self.ended = true;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_track(mut self, track: MediaTrack) -> Self {
        self.add_track(track);
        self
    }

    pub fn contains_track(&self, track_id: &str) -> bool {
        self.tracks.iter().any(|track| track.id == track_id)
    }

    /// Adds the track unless one with the same id is already present.
    pub fn add_track(&mut self, track: MediaTrack) -> bool {
        if self.contains_track(&track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn remove_track(&mut self, track_id: &str) -> bool {
        let before = self.tracks.len();
        self.tracks.retain(|track| track.id != track_id);
        before != self.tracks.len()
    }
}

/// Outbound sender slot on the platform connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpSender {
    pub id: String,
    pub track: Option<MediaTrack>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl From<IceConnectionState> for ConnectionState {
    fn from(state: IceConnectionState) -> Self {
        match state {
            IceConnectionState::New => ConnectionState::New,
            IceConnectionState::Checking => ConnectionState::Connecting,
            IceConnectionState::Connected | IceConnectionState::Completed => {
                ConnectionState::Connected
            }
            IceConnectionState::Disconnected => ConnectionState::Disconnected,
            IceConnectionState::Failed => ConnectionState::Failed,
            IceConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateError {
    pub url: Option<String>,
    pub error_code: u16,
    pub error_text: String,
}

/// Everything the platform connection reports to its observer.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    SignalingStateChanged(SignalingState),
    ConnectionStateChanged(ConnectionState),
    IceConnectionStateChanged(IceConnectionState),
    TrackAdded {
        track: MediaTrack,
        streams: Vec<MediaStream>,
    },
    TrackRemoved {
        track_id: String,
    },
    NegotiationNeeded,
    /// `None` marks the end of candidate gathering.
    IceCandidate(Option<IceCandidate>),
    IceCandidateError(CandidateError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("session description rejected: {0}")]
    InvalidDescription(String),
    #[error("{operation} is not valid in signaling state {state:?}")]
    InvalidSignalingState {
        operation: &'static str,
        state: SignalingState,
    },
    #[error("ice candidate rejected: {0}")]
    InvalidCandidate(String),
    #[error("unknown sender '{0}'")]
    UnknownSender(String),
    #[error("connection closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

/// One platform peer connection. Implementations report state through the
/// receiver handed out by [`PlatformConnection::subscribe`].
#[async_trait]
pub trait PlatformConnection: Send + Sync {
    /// Whether `ConnectionStateChanged` is reported. When `false` the
    /// controller tracks connectivity from `IceConnectionStateChanged`.
    fn supports_connection_state(&self) -> bool {
        true
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<PlatformEvent>;

    async fn create_offer(&self) -> Result<SessionDescription, PlatformError>;

    async fn create_answer(&self) -> Result<SessionDescription, PlatformError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PlatformError>;

    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), PlatformError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PlatformError>;

    fn senders(&self) -> Vec<RtpSender>;

    async fn add_track(
        &self,
        track: MediaTrack,
        stream: &MediaStream,
    ) -> Result<RtpSender, PlatformError>;

    async fn remove_track(&self, sender: &RtpSender) -> Result<(), PlatformError>;

    async fn send_data(&self, payload: &[u8]) -> Result<(), PlatformError>;

    async fn close(&self);
}

/// Creates platform connections, both initially and on reconnect.
pub trait ConnectionFactory: Send + Sync {
    fn connect(
        &self,
        policy: IceTransportPolicy,
    ) -> Result<Arc<dyn PlatformConnection>, PlatformError>;
}
