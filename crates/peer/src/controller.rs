use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use peerlink_core::{CodecPreferences, IceCandidate, IceTransportPolicy, SessionDescription};
use peerlink_sdp::{is_acceptable_candidate, prepare_for_receiving, prepare_for_sending};
use serde::Serialize;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    error::NegotiationError,
    events::{EventHub, PeerEvent},
    platform::{
        ConnectionFactory, ConnectionState, MediaStream, PlatformConnection, PlatformEvent,
        SignalingState,
    },
};

/// Controller view of the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeerState {
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    /// Descriptions exchanged, transport not connected yet.
    Negotiating,
    Connected,
    Disconnected,
    Closed,
}

impl PeerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerState::New => "new",
            PeerState::HaveLocalOffer => "have-local-offer",
            PeerState::HaveRemoteOffer => "have-remote-offer",
            PeerState::Negotiating => "negotiating",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Closed => "closed",
        }
    }

    fn is_established(&self) -> bool {
        matches!(self, PeerState::Connected | PeerState::Disconnected)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_transport_policy: IceTransportPolicy,
    pub preferences: CodecPreferences,
}

/// Drives offer/answer against one platform connection, rewriting every
/// committed description with the configured codec preferences.
///
/// Platform events are consumed by a spawned listener task, so construction
/// outside a Tokio runtime fails with [`NegotiationError::NoRuntime`].
/// Callers serialize negotiation calls themselves.
pub struct PeerController {
    config: PeerConfig,
    factory: Arc<dyn ConnectionFactory>,
    shared: Arc<Shared>,
}

struct Shared {
    policy: IceTransportPolicy,
    events: EventHub,
    inner: Mutex<Inner>,
}

struct Inner {
    handle: Arc<dyn PlatformConnection>,
    generation: u64,
    state: PeerState,
    closed_reported: bool,
    remote_stream: Option<MediaStream>,
    listener: Option<JoinHandle<()>>,
}

impl Inner {
    fn detach(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }

    fn transition(&mut self, next: PeerState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "peer state changed");
            self.state = next;
        }
    }
}

impl Shared {
    fn attach(self: &Arc<Self>, inner: &mut Inner) {
        inner.detach();
        let mut events = inner.handle.subscribe();
        let generation = inner.generation;
        let shared: Weak<Shared> = Arc::downgrade(self);
        inner.listener = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.on_platform_event(generation, event);
            }
        }));
    }

    fn on_platform_event(&self, generation: u64, event: PlatformEvent) {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state == PeerState::Closed {
            return;
        }

        match event {
            PlatformEvent::SignalingStateChanged(state) => self.on_signaling_state(&mut inner, state),
            PlatformEvent::ConnectionStateChanged(state) => {
                if inner.handle.supports_connection_state() {
                    self.on_connection_state(&mut inner, state);
                }
            }
            PlatformEvent::IceConnectionStateChanged(state) => {
                if !inner.handle.supports_connection_state() {
                    self.on_connection_state(&mut inner, state.into());
                }
            }
            PlatformEvent::TrackAdded { track, streams } => {
                let incoming = streams
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| MediaStream::new(track.id.clone()));
                let remote = inner
                    .remote_stream
                    .get_or_insert_with(|| MediaStream::new(incoming.id.clone()));
                if remote.id != incoming.id {
                    *remote = MediaStream::new(incoming.id.clone());
                }
                for existing in incoming.tracks {
                    remote.add_track(existing);
                }
                remote.add_track(track);
                let snapshot = remote.clone();
                self.events.emit(PeerEvent::RemoteStreamChanged(snapshot));
            }
            PlatformEvent::TrackRemoved { track_id } => {
                if let Some(remote) = inner.remote_stream.as_mut() {
                    if remote.remove_track(&track_id) {
                        let snapshot = remote.clone();
                        self.events.emit(PeerEvent::RemoteStreamChanged(snapshot));
                    }
                }
            }
            PlatformEvent::NegotiationNeeded => {
                if inner.state == PeerState::Connected {
                    self.events.emit(PeerEvent::NegotiationNeeded);
                } else {
                    debug!(state = %inner.state, "negotiation request before connection ignored");
                }
            }
            PlatformEvent::IceCandidate(Some(candidate)) => {
                if is_acceptable_candidate(&candidate.candidate, self.policy) {
                    self.events.emit(PeerEvent::IceCandidate(candidate));
                } else {
                    debug!(candidate = %candidate.candidate, policy = %self.policy, "local candidate filtered");
                }
            }
            PlatformEvent::IceCandidate(None) => {
                self.events.emit(PeerEvent::EndOfCandidates);
            }
            PlatformEvent::IceCandidateError(error) => {
                warn!(
                    url = error.url.as_deref().unwrap_or("-"),
                    code = error.error_code,
                    text = %error.error_text,
                    "ice candidate error"
                );
            }
        }
    }

    fn on_signaling_state(&self, inner: &mut Inner, state: SignalingState) {
        match state {
            SignalingState::Closed => self.enter_closed(inner),
            _ if inner.state.is_established() => {}
            SignalingState::HaveLocalOffer | SignalingState::HaveLocalPranswer => {
                inner.transition(PeerState::HaveLocalOffer)
            }
            SignalingState::HaveRemoteOffer | SignalingState::HaveRemotePranswer => {
                inner.transition(PeerState::HaveRemoteOffer)
            }
            SignalingState::Stable => {
                if matches!(
                    inner.state,
                    PeerState::HaveLocalOffer | PeerState::HaveRemoteOffer
                ) {
                    inner.transition(PeerState::Negotiating);
                }
            }
        }
    }

    fn on_connection_state(&self, inner: &mut Inner, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                if inner.state != PeerState::Connected {
                    inner.transition(PeerState::Connected);
                    info!("peer connected");
                    self.events.emit(PeerEvent::Connected);
                }
            }
            ConnectionState::Disconnected => self.leave_connected(inner),
            ConnectionState::Failed => {
                warn!("peer transport failed");
                self.leave_connected(inner);
                self.events
                    .emit(PeerEvent::Error("peer transport failed".to_string()));
            }
            ConnectionState::Closed => self.enter_closed(inner),
            ConnectionState::New | ConnectionState::Connecting => {}
        }
    }

    fn leave_connected(&self, inner: &mut Inner) {
        if inner.state == PeerState::Connected {
            inner.transition(PeerState::Disconnected);
            info!("peer disconnected");
            self.events.emit(PeerEvent::Disconnected);
        }
    }

    fn enter_closed(&self, inner: &mut Inner) {
        inner.detach();
        inner.transition(PeerState::Closed);
        self.report_closed(inner);
    }

    fn report_closed(&self, inner: &mut Inner) {
        if !inner.closed_reported {
            inner.closed_reported = true;
            info!("peer connection closed");
            self.events.emit(PeerEvent::Closed);
        }
    }
}

impl PeerController {
    pub fn new(
        config: PeerConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self, NegotiationError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(NegotiationError::NoRuntime);
        }
        let handle = factory.connect(config.ice_transport_policy)?;
        let shared = Arc::new(Shared {
            policy: config.ice_transport_policy,
            events: EventHub::default(),
            inner: Mutex::new(Inner {
                handle,
                generation: 0,
                state: PeerState::New,
                closed_reported: false,
                remote_stream: None,
                listener: None,
            }),
        });
        shared.attach(&mut shared.inner.lock());

        Ok(Self {
            config,
            factory,
            shared,
        })
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn state(&self) -> PeerState {
        self.shared.inner.lock().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.shared.events.subscribe()
    }

    /// Inbound tracks received so far, batched into one stream.
    pub fn remote_stream(&self) -> Option<MediaStream> {
        self.shared.inner.lock().remote_stream.clone()
    }

    fn handle(&self) -> Result<Arc<dyn PlatformConnection>, NegotiationError> {
        let inner = self.shared.inner.lock();
        if inner.state == PeerState::Closed {
            return Err(NegotiationError::Closed);
        }
        Ok(inner.handle.clone())
    }

    /// Creates a platform offer, rewrites it with the receive preferences and
    /// commits it as the local description.
    pub async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let handle = self.handle()?;
        let offer = handle.create_offer().await?;
        let offer = prepare_for_receiving(&offer, &self.config.preferences);
        handle.set_local_description(offer.clone()).await?;
        info!(sdp_len = offer.sdp.len(), "local offer committed");
        Ok(offer)
    }

    /// Commits the remote offer (send preferences applied), then creates,
    /// rewrites (receive preferences) and commits the local answer.
    pub async fn create_answer(
        &self,
        remote_offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        let handle = self.handle()?;
        let remote_offer = prepare_for_sending(&remote_offer, &self.config.preferences);
        handle.set_remote_description(remote_offer).await?;
        debug!("remote offer committed");

        let answer = handle.create_answer().await?;
        let answer = prepare_for_receiving(&answer, &self.config.preferences);
        handle.set_local_description(answer.clone()).await?;
        info!(sdp_len = answer.sdp.len(), "local answer committed");
        Ok(answer)
    }

    /// Commits the peer's answer with the send preferences applied.
    pub async fn apply_answer(
        &self,
        remote_answer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        let handle = self.handle()?;
        let remote_answer = prepare_for_sending(&remote_answer, &self.config.preferences);
        handle.set_remote_description(remote_answer.clone()).await?;
        info!("remote answer committed");
        Ok(remote_answer)
    }

    /// Adds every live track of `stream` that has no sender yet. Returns the
    /// number of tracks added.
    pub async fn attach_stream(&self, stream: &MediaStream) -> Result<usize, NegotiationError> {
        let handle = self.handle()?;
        let attached: HashSet<String> = handle
            .senders()
            .into_iter()
            .filter_map(|sender| sender.track)
            .map(|track| track.id)
            .collect();

        let mut added = 0;
        for track in stream
            .tracks
            .iter()
            .filter(|track| !track.ended && !attached.contains(&track.id))
        {
            handle.add_track(track.clone(), stream).await?;
            added += 1;
        }
        if added > 0 {
            debug!(stream = %stream.id, added, "attached tracks");
        }
        Ok(added)
    }

    /// Drops senders whose track ended or is missing from `stream`, then
    /// attaches the rest. `None` clears every outbound track. Allowed while
    /// `new`, `connected` or `disconnected` (awaiting a reconnect).
    pub async fn reattach_stream(
        &self,
        stream: Option<&MediaStream>,
    ) -> Result<(), NegotiationError> {
        let state = self.state();
        if !matches!(
            state,
            PeerState::New | PeerState::Connected | PeerState::Disconnected
        ) {
            return Err(NegotiationError::InvalidState {
                operation: "reattach_stream",
                state,
            });
        }

        let handle = self.handle()?;
        for sender in handle.senders() {
            let Some(track) = &sender.track else {
                continue;
            };
            let keep = !track.ended
                && stream.is_some_and(|stream| {
                    stream
                        .tracks
                        .iter()
                        .any(|candidate| candidate.id == track.id && !candidate.ended)
                });
            if !keep {
                debug!(track = %track.id, "removing outbound track");
                handle.remove_track(&sender).await?;
            }
        }

        if let Some(stream) = stream {
            self.attach_stream(stream).await?;
        }
        Ok(())
    }

    /// Forwards a remote candidate to the platform untouched.
    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let handle = self.handle()?;
        handle.add_ice_candidate(candidate).await?;
        Ok(())
    }

    pub async fn send_data(&self, payload: &[u8]) -> Result<(), NegotiationError> {
        let handle = {
            let inner = self.shared.inner.lock();
            match inner.state {
                PeerState::Connected => inner.handle.clone(),
                PeerState::Closed => return Err(NegotiationError::Closed),
                _ => return Err(NegotiationError::NotConnected),
            }
        };
        handle.send_data(payload).await?;
        Ok(())
    }

    /// Replaces the platform connection with a fresh one in state `new`. The
    /// old connection is closed without a `Closed` notification.
    pub async fn reconnect(&self) -> Result<(), NegotiationError> {
        let stale = {
            let mut inner = self.shared.inner.lock();
            inner.detach();
            inner.generation += 1;
            inner.handle.clone()
        };
        stale.close().await;

        let fresh = match self.factory.connect(self.config.ice_transport_policy) {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(error = %err, "failed to recreate peer connection");
                let mut inner = self.shared.inner.lock();
                inner.transition(PeerState::Closed);
                self.shared.report_closed(&mut inner);
                return Err(err.into());
            }
        };

        let mut inner = self.shared.inner.lock();
        inner.handle = fresh;
        inner.transition(PeerState::New);
        inner.closed_reported = false;
        inner.remote_stream = None;
        self.shared.attach(&mut inner);
        info!(generation = inner.generation, "peer connection recreated");
        Ok(())
    }

    /// Closes the connection. `Closed` is emitted once however often this
    /// is called.
    pub async fn close(&self) {
        let handle = {
            let mut inner = self.shared.inner.lock();
            if inner.state == PeerState::Closed {
                return;
            }
            inner.detach();
            inner.transition(PeerState::Closed);
            inner.handle.clone()
        };
        handle.close().await;

        let mut inner = self.shared.inner.lock();
        self.shared.report_closed(&mut inner);
    }
}

impl Drop for PeerController {
    fn drop(&mut self) {
        self.shared.inner.lock().detach();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use peerlink_core::MediaKind;
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::{
        loopback::LoopbackNetwork,
        platform::{CandidateError, IceConnectionState, MediaTrack},
    };

    const WAIT: Duration = Duration::from_secs(2);

    async fn next_matching<F>(events: &mut broadcast::Receiver<PeerEvent>, mut pred: F) -> PeerEvent
    where
        F: FnMut(&PeerEvent) -> bool,
    {
        timeout(WAIT, async {
            loop {
                let event = events.recv().await.expect("event stream open");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("expected event before timeout")
    }

    async fn wait_for_state(controller: &PeerController, state: PeerState) {
        timeout(WAIT, async {
            while controller.state() != state {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("state reached before timeout");
    }

    async fn drain(events: &mut broadcast::Receiver<PeerEvent>) -> Vec<PeerEvent> {
        sleep(Duration::from_millis(50)).await;
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    fn controller(network: &LoopbackNetwork, config: PeerConfig) -> PeerController {
        PeerController::new(config, Arc::new(network.factory("local", "remote")))
            .expect("controller")
    }

    fn local_stream() -> MediaStream {
        MediaStream::new("local-stream")
            .with_track(MediaTrack::audio("mic"))
            .with_track(MediaTrack::video("cam"))
    }

    #[tokio::test]
    async fn starts_new() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        assert_eq!(controller.state(), PeerState::New);
        assert!(controller.remote_stream().is_none());
    }

    #[tokio::test]
    async fn offer_is_rewritten_with_receive_preferences() {
        let network = LoopbackNetwork::new();
        let config = PeerConfig {
            preferences: CodecPreferences {
                audio_recv_codec: Some("PCMU/8000".into()),
                video_recv_bitrate: Some("750".into()),
                ..CodecPreferences::default()
            },
            ..PeerConfig::default()
        };
        let controller = controller(&network, config);

        let offer = controller.create_offer().await.expect("offer");
        assert!(offer.sdp.contains("m=audio 9 UDP/TLS/RTP/SAVPF 0 "));
        assert!(offer.sdp.contains("b=AS:750"));

        let endpoint = network.endpoint("local").expect("endpoint");
        assert_eq!(endpoint.local_description(), Some(offer));
        wait_for_state(&controller, PeerState::HaveLocalOffer).await;
    }

    #[tokio::test]
    async fn relay_policy_filters_local_candidates() {
        let network = LoopbackNetwork::new();
        let config = PeerConfig {
            ice_transport_policy: IceTransportPolicy::Relay,
            ..PeerConfig::default()
        };
        let controller = controller(&network, config);
        let mut events = controller.subscribe();

        controller.create_offer().await.expect("offer");
        let gathered = drain(&mut events).await;
        let relayed: Vec<&PeerEvent> = gathered
            .iter()
            .filter(|e| matches!(e, PeerEvent::IceCandidate(_)))
            .collect();
        assert_eq!(relayed.len(), 1);
        assert!(gathered.contains(&PeerEvent::EndOfCandidates));

        let mut relay_only = controller.subscribe();
        let endpoint = network.endpoint("local").expect("endpoint");
        endpoint.inject(PlatformEvent::IceCandidate(Some(IceCandidate::new(
            "candidate:9 1 udp 2122260223 10.0.0.9 5000 typ host",
        ))));
        endpoint.inject(PlatformEvent::IceCandidate(Some(IceCandidate::new(
            "candidate:8 1 udp 41885439 203.0.113.8 6000 typ relay raddr 10.0.0.9 rport 5000",
        ))));
        let event = next_matching(&mut relay_only, |e| matches!(e, PeerEvent::IceCandidate(_))).await;
        match event {
            PeerEvent::IceCandidate(candidate) => {
                assert!(candidate.candidate.contains("typ relay"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn gathered_candidates_skip_tcp() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        let mut events = controller.subscribe();

        controller.create_offer().await.expect("offer");
        let candidates: Vec<IceCandidate> = drain(&mut events)
            .await
            .into_iter()
            .filter_map(|event| match event {
                PeerEvent::IceCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| !c.candidate.contains(" tcp ")));
    }

    #[tokio::test]
    async fn renegotiation_is_suppressed_until_connected() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        let mut events = controller.subscribe();
        let endpoint = network.endpoint("local").expect("endpoint");

        endpoint.inject(PlatformEvent::NegotiationNeeded);
        endpoint.inject(PlatformEvent::ConnectionStateChanged(ConnectionState::Connected));
        next_matching(&mut events, |e| matches!(e, PeerEvent::Connected)).await;
        let before = drain(&mut events).await;
        assert!(!before.contains(&PeerEvent::NegotiationNeeded));

        endpoint.inject(PlatformEvent::NegotiationNeeded);
        next_matching(&mut events, |e| matches!(e, PeerEvent::NegotiationNeeded)).await;
    }

    #[tokio::test]
    async fn disconnect_and_recover() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        let mut events = controller.subscribe();
        let endpoint = network.endpoint("local").expect("endpoint");

        endpoint.inject(PlatformEvent::ConnectionStateChanged(ConnectionState::Connected));
        next_matching(&mut events, |e| matches!(e, PeerEvent::Connected)).await;
        endpoint.inject(PlatformEvent::ConnectionStateChanged(ConnectionState::Disconnected));
        next_matching(&mut events, |e| matches!(e, PeerEvent::Disconnected)).await;
        assert_eq!(controller.state(), PeerState::Disconnected);

        endpoint.inject(PlatformEvent::ConnectionStateChanged(ConnectionState::Connected));
        next_matching(&mut events, |e| matches!(e, PeerEvent::Connected)).await;
        assert_eq!(controller.state(), PeerState::Connected);
    }

    #[tokio::test]
    async fn transport_failure_emits_error() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        let mut events = controller.subscribe();
        let endpoint = network.endpoint("local").expect("endpoint");

        endpoint.inject(PlatformEvent::ConnectionStateChanged(ConnectionState::Connected));
        endpoint.inject(PlatformEvent::ConnectionStateChanged(ConnectionState::Failed));
        next_matching(&mut events, |e| matches!(e, PeerEvent::Error(_))).await;
        assert_eq!(controller.state(), PeerState::Disconnected);
    }

    #[tokio::test]
    async fn ice_state_is_used_when_connection_state_is_unsupported() {
        let network = LoopbackNetwork::new();
        let factory = network.factory("legacy", "remote").with_ice_state_only();
        let controller =
            PeerController::new(PeerConfig::default(), Arc::new(factory)).expect("controller");
        let mut events = controller.subscribe();
        let endpoint = network.endpoint("legacy").expect("endpoint");

        endpoint.inject(PlatformEvent::ConnectionStateChanged(ConnectionState::Connected));
        let ignored = drain(&mut events).await;
        assert!(ignored.is_empty());

        endpoint.inject(PlatformEvent::IceConnectionStateChanged(
            IceConnectionState::Completed,
        ));
        next_matching(&mut events, |e| matches!(e, PeerEvent::Connected)).await;
    }

    #[tokio::test]
    async fn candidate_errors_do_not_surface_as_events() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        let mut events = controller.subscribe();
        let endpoint = network.endpoint("local").expect("endpoint");

        endpoint.inject(PlatformEvent::IceCandidateError(CandidateError {
            url: Some("turn:turn.example.org:3478".into()),
            error_code: 701,
            error_text: "TURN allocate request timed out".into(),
        }));
        assert!(drain(&mut events).await.is_empty());
        assert_eq!(controller.state(), PeerState::New);
    }

    #[tokio::test]
    async fn close_emits_closed_once() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        let mut events = controller.subscribe();

        controller.close().await;
        controller.close().await;

        let seen = drain(&mut events).await;
        assert_eq!(seen, vec![PeerEvent::Closed]);
        assert_eq!(controller.state(), PeerState::Closed);
        assert!(matches!(
            controller.create_offer().await,
            Err(NegotiationError::Closed)
        ));
    }

    #[tokio::test]
    async fn platform_close_is_observed() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        let mut events = controller.subscribe();
        let endpoint = network.endpoint("local").expect("endpoint");

        endpoint.inject(PlatformEvent::SignalingStateChanged(SignalingState::Closed));
        next_matching(&mut events, |e| matches!(e, PeerEvent::Closed)).await;
        assert_eq!(controller.state(), PeerState::Closed);

        controller.close().await;
        assert!(drain(&mut events).await.is_empty());
    }

    #[tokio::test]
    async fn send_before_connect_is_rejected() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        assert!(matches!(
            controller.send_data(b"ping").await,
            Err(NegotiationError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn attach_skips_tracks_already_sent() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        let stream = local_stream();

        assert_eq!(controller.attach_stream(&stream).await.expect("attach"), 2);
        assert_eq!(controller.attach_stream(&stream).await.expect("attach"), 0);
        let endpoint = network.endpoint("local").expect("endpoint");
        assert_eq!(endpoint.senders().len(), 2);
    }

    #[tokio::test]
    async fn reattach_replaces_ended_tracks() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        controller.attach_stream(&local_stream()).await.expect("attach");

        let mut camera = MediaTrack::video("cam");
        camera.stop();
        let replacement = MediaStream::new("local-stream")
            .with_track(MediaTrack::audio("mic"))
            .with_track(camera)
            .with_track(MediaTrack::new("screen", MediaKind::Video));
        controller
            .reattach_stream(Some(&replacement))
            .await
            .expect("reattach");

        let endpoint = network.endpoint("local").expect("endpoint");
        let mut ids: Vec<String> = endpoint
            .senders()
            .into_iter()
            .filter_map(|sender| sender.track.map(|track| track.id))
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["mic".to_string(), "screen".to_string()]);

        controller.reattach_stream(None).await.expect("clear");
        assert!(endpoint.senders().is_empty());
    }

    #[tokio::test]
    async fn reattach_is_refused_mid_negotiation() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        controller.create_offer().await.expect("offer");
        wait_for_state(&controller, PeerState::HaveLocalOffer).await;

        let err = controller
            .reattach_stream(None)
            .await
            .expect_err("must be refused");
        assert!(matches!(
            err,
            NegotiationError::InvalidState {
                operation: "reattach_stream",
                state: PeerState::HaveLocalOffer
            }
        ));
    }

    #[tokio::test]
    async fn reattach_is_allowed_while_disconnected() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        let mut events = controller.subscribe();
        let endpoint = network.endpoint("local").expect("endpoint");
        controller.attach_stream(&local_stream()).await.expect("attach");

        endpoint.inject(PlatformEvent::ConnectionStateChanged(ConnectionState::Connected));
        endpoint.inject(PlatformEvent::ConnectionStateChanged(ConnectionState::Disconnected));
        next_matching(&mut events, |e| matches!(e, PeerEvent::Disconnected)).await;

        let audio_only = MediaStream::new("local-stream").with_track(MediaTrack::audio("mic"));
        controller
            .reattach_stream(Some(&audio_only))
            .await
            .expect("reattach while disconnected");
        let ids: Vec<String> = endpoint
            .senders()
            .into_iter()
            .filter_map(|sender| sender.track.map(|track| track.id))
            .collect();
        assert_eq!(ids, vec!["mic".to_string()]);
    }

    #[test]
    fn construction_outside_runtime_is_an_error() {
        let network = LoopbackNetwork::new();
        let result = PeerController::new(
            PeerConfig::default(),
            Arc::new(network.factory("local", "remote")),
        );
        assert!(matches!(result, Err(NegotiationError::NoRuntime)));
        assert!(network.endpoint("local").is_none());
    }

    #[tokio::test]
    async fn reconnect_returns_to_new_without_closed_event() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        let mut events = controller.subscribe();
        let first = network.endpoint("local").expect("endpoint");

        controller.create_offer().await.expect("offer");
        wait_for_state(&controller, PeerState::HaveLocalOffer).await;
        controller.reconnect().await.expect("reconnect");

        assert_eq!(controller.state(), PeerState::New);
        assert!(first.is_closed());
        let second = network.endpoint("local").expect("endpoint");
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.local_description().is_none());

        let seen = drain(&mut events).await;
        assert!(!seen.contains(&PeerEvent::Closed));

        first.inject(PlatformEvent::ConnectionStateChanged(ConnectionState::Connected));
        assert!(!drain(&mut events).await.contains(&PeerEvent::Connected));
    }

    #[tokio::test]
    async fn malformed_answer_is_rejected() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        controller.create_offer().await.expect("offer");

        let bogus = SessionDescription::answer("m=video 9 RTP/AVP 96\r\n");
        let err = controller.apply_answer(bogus).await.expect_err("rejected");
        assert!(matches!(err, NegotiationError::Platform(_)));
    }

    #[tokio::test]
    async fn candidate_failures_propagate() {
        let network = LoopbackNetwork::new();
        let controller = controller(&network, PeerConfig::default());
        let err = controller
            .add_ice_candidate(IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 9 typ host"))
            .await
            .expect_err("no remote description yet");
        assert!(matches!(err, NegotiationError::Platform(_)));
    }
}
