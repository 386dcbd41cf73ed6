//! In-process platform connections wired back to back.
//!
//! A [`LoopbackNetwork`] pairs endpoints by label. Each endpoint produces
//! browser-shaped descriptions, enforces the offer/answer signaling rules,
//! gathers a fixed set of candidates and reports itself connected once both
//! descriptions are committed. Tracks added on one side show up on the other.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use peerlink_core::{IceCandidate, IceTransportPolicy, MediaKind, SdpType, SessionDescription};
use peerlink_sdp::{
    codec::{m_line_payloads, rtpmap_line_in},
    RtpMap, SdpLines,
};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::platform::{
    ConnectionFactory, ConnectionState, IceConnectionState, MediaStream, MediaTrack,
    PlatformConnection, PlatformError, PlatformEvent, RtpSender, SignalingState,
};

struct Codec {
    payload_type: &'static str,
    kind: MediaKind,
    rtpmap: &'static str,
    fmtp: Option<&'static str>,
}

const CODECS: &[Codec] = &[
    Codec { payload_type: "111", kind: MediaKind::Audio, rtpmap: "opus/48000/2", fmtp: Some("minptime=10;useinbandfec=1") },
    Codec { payload_type: "103", kind: MediaKind::Audio, rtpmap: "ISAC/16000", fmtp: None },
    Codec { payload_type: "0", kind: MediaKind::Audio, rtpmap: "PCMU/8000", fmtp: None },
    Codec { payload_type: "8", kind: MediaKind::Audio, rtpmap: "PCMA/8000", fmtp: None },
    Codec { payload_type: "126", kind: MediaKind::Audio, rtpmap: "telephone-event/8000", fmtp: None },
    Codec { payload_type: "96", kind: MediaKind::Video, rtpmap: "VP8/90000", fmtp: None },
    Codec { payload_type: "97", kind: MediaKind::Video, rtpmap: "rtx/90000", fmtp: Some("apt=96") },
    Codec {
        payload_type: "98",
        kind: MediaKind::Video,
        rtpmap: "H264/90000",
        fmtp: Some("level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"),
    },
    Codec { payload_type: "99", kind: MediaKind::Video, rtpmap: "rtx/90000", fmtp: Some("apt=98") },
    Codec { payload_type: "116", kind: MediaKind::Video, rtpmap: "red/90000", fmtp: None },
    Codec { payload_type: "117", kind: MediaKind::Video, rtpmap: "ulpfec/90000", fmtp: None },
    Codec { payload_type: "118", kind: MediaKind::Video, rtpmap: "rtx/90000", fmtp: Some("apt=116") },
];

const MEDIA_KINDS: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

const HOST_CANDIDATE: &str = "candidate:1 1 udp 2122260223 192.0.2.10 50000 typ host generation 0";
const TCP_CANDIDATE: &str =
    "candidate:2 1 tcp 1518280447 192.0.2.10 9 typ host tcptype active generation 0";
const RELAY_CANDIDATE: &str = "candidate:3 1 udp 41885439 203.0.113.7 60000 typ relay raddr 192.0.2.10 rport 50000 generation 0";

/// Registry pairing loopback endpoints by label.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    endpoints: Arc<Mutex<HashMap<String, Weak<LoopbackConnection>>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory for endpoint `local`, whose peer is whatever endpoint is
    /// currently registered as `remote`.
    pub fn factory(&self, local: &str, remote: &str) -> LoopbackFactory {
        LoopbackFactory {
            network: self.clone(),
            local: local.to_string(),
            remote: remote.to_string(),
            ice_state_only: false,
        }
    }

    /// Most recently created live endpoint registered under `label`.
    pub fn endpoint(&self, label: &str) -> Option<Arc<LoopbackConnection>> {
        self.endpoints.lock().get(label).and_then(Weak::upgrade)
    }

    fn register(&self, connection: &Arc<LoopbackConnection>) {
        let mut endpoints = self.endpoints.lock();
        endpoints.retain(|_, endpoint| endpoint.strong_count() > 0);
        endpoints.insert(connection.label.clone(), Arc::downgrade(connection));
    }
}

pub struct LoopbackFactory {
    network: LoopbackNetwork,
    local: String,
    remote: String,
    ice_state_only: bool,
}

impl LoopbackFactory {
    /// Endpoints created by this factory report only ICE connection state.
    pub fn with_ice_state_only(mut self) -> Self {
        self.ice_state_only = true;
        self
    }
}

impl ConnectionFactory for LoopbackFactory {
    fn connect(
        &self,
        policy: IceTransportPolicy,
    ) -> Result<Arc<dyn PlatformConnection>, PlatformError> {
        let connection = Arc::new(LoopbackConnection::new(
            self.network.clone(),
            &self.local,
            &self.remote,
            !self.ice_state_only,
        ));
        self.network.register(&connection);
        debug!(label = %self.local, policy = %policy, "loopback endpoint created");
        Ok(connection)
    }
}

struct Sender {
    sender: RtpSender,
    stream_id: String,
}

struct EndpointState {
    signaling: SignalingState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    senders: Vec<Sender>,
    listeners: Vec<mpsc::UnboundedSender<PlatformEvent>>,
    connected: bool,
    closed: bool,
    gathered: bool,
    session_version: u64,
    delivered: HashSet<String>,
    remote_candidates: Vec<IceCandidate>,
    received: Vec<Vec<u8>>,
}

pub struct LoopbackConnection {
    label: String,
    remote_label: String,
    network: LoopbackNetwork,
    unified_state: bool,
    session_id: u64,
    ice_ufrag: String,
    state: Mutex<EndpointState>,
}

impl LoopbackConnection {
    fn new(network: LoopbackNetwork, label: &str, remote_label: &str, unified_state: bool) -> Self {
        let seed = Uuid::new_v4();
        Self {
            label: label.to_string(),
            remote_label: remote_label.to_string(),
            network,
            unified_state,
            session_id: (seed.as_u128() as u64) >> 1,
            ice_ufrag: seed.simple().to_string()[..8].to_string(),
            state: Mutex::new(EndpointState {
                signaling: SignalingState::Stable,
                local: None,
                remote: None,
                senders: Vec::new(),
                listeners: Vec::new(),
                connected: false,
                closed: false,
                gathered: false,
                session_version: 1,
                delivered: HashSet::new(),
                remote_candidates: Vec::new(),
                received: Vec::new(),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Pushes `event` to every subscriber as if the platform raised it.
    pub fn inject(&self, event: PlatformEvent) {
        let mut state = self.state.lock();
        emit(&mut state, event);
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().remote_candidates.clone()
    }

    /// Payloads sent by the peer over the data path.
    pub fn received_data(&self) -> Vec<Vec<u8>> {
        self.state.lock().received.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn peer(&self) -> Option<Arc<LoopbackConnection>> {
        self.network
            .endpoint(&self.remote_label)
            .filter(|peer| !peer.is_closed())
    }

    /// Outbound tracks batched into one stream, as the peer would see them.
    fn outbound_stream(&self) -> Option<MediaStream> {
        let state = self.state.lock();
        let first = state.senders.iter().find(|s| s.sender.track.is_some())?;
        let mut stream = MediaStream::new(first.stream_id.clone());
        for track in state.senders.iter().filter_map(|s| s.sender.track.clone()) {
            stream.add_track(track);
        }
        Some(stream)
    }

    fn report_connection(&self, state: &mut EndpointState, connection: ConnectionState) {
        let event = if self.unified_state {
            PlatformEvent::ConnectionStateChanged(connection)
        } else {
            PlatformEvent::IceConnectionStateChanged(ice_state(connection))
        };
        emit(state, event);
    }

    fn gather(&self, state: &mut EndpointState) {
        if state.gathered {
            return;
        }
        state.gathered = true;
        for candidate in [HOST_CANDIDATE, TCP_CANDIDATE, RELAY_CANDIDATE] {
            emit(
                state,
                PlatformEvent::IceCandidate(Some(IceCandidate::new(candidate).with_mid("0", 0))),
            );
        }
        emit(state, PlatformEvent::IceCandidate(None));
    }

    /// Connects once both descriptions are committed and signaling is
    /// stable, then mirrors the peer's current outbound tracks.
    fn settle(&self, state: &mut EndpointState, peer_stream: Option<MediaStream>) {
        let ready = state.signaling == SignalingState::Stable
            && state.local.is_some()
            && state.remote.is_some();
        if !ready {
            return;
        }

        if !state.connected {
            state.connected = true;
            self.report_connection(state, ConnectionState::Connecting);
            self.report_connection(state, ConnectionState::Connected);
            debug!(label = %self.label, "loopback endpoint connected");
        }

        let current: Vec<MediaTrack> = peer_stream
            .as_ref()
            .map(|stream| stream.tracks.clone())
            .unwrap_or_default();
        let stale: Vec<String> = state
            .delivered
            .iter()
            .filter(|id| !current.iter().any(|track| &&track.id == id))
            .cloned()
            .collect();
        for track_id in stale {
            state.delivered.remove(&track_id);
            emit(state, PlatformEvent::TrackRemoved { track_id });
        }

        if let Some(stream) = peer_stream {
            for track in current {
                if state.delivered.insert(track.id.clone()) {
                    emit(
                        state,
                        PlatformEvent::TrackAdded {
                            track,
                            streams: vec![stream.clone()],
                        },
                    );
                }
            }
        }
    }

    fn on_peer_closed(&self) {
        let mut state = self.state.lock();
        if state.connected && !state.closed {
            state.connected = false;
            self.report_connection(&mut state, ConnectionState::Disconnected);
        }
    }

    fn deliver(&self, payload: &[u8]) {
        self.state.lock().received.push(payload.to_vec());
    }

    fn render_offer(&self, state: &EndpointState) -> String {
        let mut sdp = self.render_session(state);
        for (mid, kind) in MEDIA_KINDS.iter().enumerate() {
            let codecs: Vec<&Codec> = CODECS.iter().filter(|codec| codec.kind == *kind).collect();
            let payloads: Vec<&str> = codecs.iter().map(|codec| codec.payload_type).collect();
            self.render_media(&mut sdp, state, *kind, mid, &payloads);
            for codec in codecs {
                push_codec(&mut sdp, codec);
            }
        }
        sdp
    }

    fn render_answer(&self, state: &EndpointState, offer: &str) -> String {
        let offer = SdpLines::parse(offer);
        let mut sdp = self.render_session(state);
        for (mid, kind) in MEDIA_KINDS.iter().enumerate() {
            let Some(section) = offer.media_section(*kind) else {
                continue;
            };
            let offered = offer.line(section.start).map(m_line_payloads).unwrap_or_default();
            let accepted: Vec<&Codec> = offered
                .iter()
                .filter_map(|pt| supported_codec(&offer, section.clone(), *kind, pt))
                .collect();
            let payloads: Vec<&str> = accepted.iter().map(|codec| codec.payload_type).collect();
            self.render_media(&mut sdp, state, *kind, mid, &payloads);
            for codec in accepted {
                push_codec(&mut sdp, codec);
            }
        }
        sdp
    }

    fn render_session(&self, state: &EndpointState) -> String {
        let stream_id = state
            .senders
            .first()
            .map(|s| s.stream_id.as_str())
            .unwrap_or("*");
        format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE 0 1\r\na=msid-semantic: WMS {}\r\n",
            self.session_id, state.session_version, stream_id
        )
    }

    fn render_media(
        &self,
        sdp: &mut String,
        state: &EndpointState,
        kind: MediaKind,
        mid: usize,
        payloads: &[&str],
    ) {
        let (port, payloads) = if payloads.is_empty() {
            ("0", "0".to_string())
        } else {
            ("9", payloads.join(" "))
        };
        sdp.push_str(&format!("m={kind} {port} UDP/TLS/RTP/SAVPF {payloads}\r\n"));
        sdp.push_str("c=IN IP4 0.0.0.0\r\n");
        sdp.push_str("a=rtcp:9 IN IP4 0.0.0.0\r\n");
        sdp.push_str(&format!("a=ice-ufrag:{}\r\n", self.ice_ufrag));
        sdp.push_str(&format!("a=mid:{mid}\r\n"));

        let outbound: Vec<(&str, &MediaTrack)> = state
            .senders
            .iter()
            .filter_map(|s| s.sender.track.as_ref().map(|t| (s.stream_id.as_str(), t)))
            .filter(|(_, track)| track.kind == kind)
            .collect();
        if outbound.is_empty() {
            sdp.push_str("a=recvonly\r\n");
        } else {
            sdp.push_str("a=sendrecv\r\n");
            for (stream_id, track) in outbound {
                sdp.push_str(&format!("a=msid:{stream_id} {}\r\n", track.id));
            }
        }
        sdp.push_str("a=rtcp-mux\r\n");
    }
}

fn push_codec(sdp: &mut String, codec: &Codec) {
    sdp.push_str(&format!("a=rtpmap:{} {}\r\n", codec.payload_type, codec.rtpmap));
    if let Some(fmtp) = codec.fmtp {
        sdp.push_str(&format!("a=fmtp:{} {fmtp}\r\n", codec.payload_type));
    }
}

/// Local codec for an offered payload type, provided the offer maps it to
/// the same encoding.
fn supported_codec(
    offer: &SdpLines,
    section: std::ops::Range<usize>,
    kind: MediaKind,
    payload_type: &str,
) -> Option<&'static Codec> {
    let codec = CODECS
        .iter()
        .find(|codec| codec.kind == kind && codec.payload_type == payload_type)?;
    match rtpmap_line_in(offer, section, payload_type) {
        Some(index) => {
            let offered = offer.line(index).and_then(RtpMap::parse)?;
            offered.matches(codec.rtpmap).then_some(codec)
        }
        None => Some(codec),
    }
}

fn validate(desc: &SessionDescription) -> Result<(), PlatformError> {
    if desc.kind == SdpType::Rollback {
        return Ok(());
    }
    if !desc.sdp.starts_with("v=0\r\n") {
        return Err(PlatformError::InvalidDescription(
            "description must start with a version line".to_string(),
        ));
    }

    let lines = SdpLines::parse(&desc.sdp);
    for kind in MEDIA_KINDS {
        let Some(section) = lines.media_section(kind) else {
            continue;
        };
        let payloads = lines.line(section.start).map(m_line_payloads).unwrap_or_default();
        if payloads.is_empty() {
            return Err(PlatformError::InvalidDescription(format!(
                "{kind} section lists no payload types"
            )));
        }
        for payload_type in payloads {
            let dynamic = payload_type.parse::<u8>().map_or(true, |pt| pt >= 96);
            if dynamic && rtpmap_line_in(&lines, section.clone(), payload_type).is_none() {
                return Err(PlatformError::InvalidDescription(format!(
                    "{kind} payload type {payload_type} has no rtpmap"
                )));
            }
        }
    }
    Ok(())
}

fn emit(state: &mut EndpointState, event: PlatformEvent) {
    trace!(?event, "loopback event");
    state
        .listeners
        .retain(|listener| listener.send(event.clone()).is_ok());
}

fn ice_state(state: ConnectionState) -> IceConnectionState {
    match state {
        ConnectionState::New => IceConnectionState::New,
        ConnectionState::Connecting => IceConnectionState::Checking,
        ConnectionState::Connected => IceConnectionState::Connected,
        ConnectionState::Disconnected => IceConnectionState::Disconnected,
        ConnectionState::Failed => IceConnectionState::Failed,
        ConnectionState::Closed => IceConnectionState::Closed,
    }
}

fn ensure_open(state: &EndpointState) -> Result<(), PlatformError> {
    if state.closed {
        Err(PlatformError::Closed)
    } else {
        Ok(())
    }
}

#[async_trait]
impl PlatformConnection for LoopbackConnection {
    fn supports_connection_state(&self) -> bool {
        self.unified_state
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<PlatformEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state.lock().listeners.push(sender);
        receiver
    }

    async fn create_offer(&self) -> Result<SessionDescription, PlatformError> {
        let mut state = self.state.lock();
        ensure_open(&state)?;
        state.session_version += 1;
        Ok(SessionDescription::offer(self.render_offer(&state)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PlatformError> {
        let mut state = self.state.lock();
        ensure_open(&state)?;
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(PlatformError::InvalidSignalingState {
                operation: "create_answer",
                state: state.signaling,
            });
        }
        let offer = state
            .remote
            .as_ref()
            .map(|remote| remote.sdp.clone())
            .unwrap_or_default();
        state.session_version += 1;
        Ok(SessionDescription::answer(self.render_answer(&state, &offer)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PlatformError> {
        validate(&desc)?;
        let peer_stream = self.peer().and_then(|peer| peer.outbound_stream());

        let mut state = self.state.lock();
        ensure_open(&state)?;
        let next = match (desc.kind, state.signaling) {
            (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                SignalingState::HaveLocalOffer
            }
            (
                SdpType::Answer,
                SignalingState::HaveRemoteOffer | SignalingState::HaveLocalPranswer,
            ) => SignalingState::Stable,
            (SdpType::Pranswer, SignalingState::HaveRemoteOffer) => {
                SignalingState::HaveLocalPranswer
            }
            (SdpType::Rollback, _) => SignalingState::Stable,
            (_, current) => {
                return Err(PlatformError::InvalidSignalingState {
                    operation: "set_local_description",
                    state: current,
                })
            }
        };

        state.local = (desc.kind != SdpType::Rollback).then_some(desc);
        if state.signaling != next {
            state.signaling = next;
            emit(&mut state, PlatformEvent::SignalingStateChanged(next));
        }
        self.gather(&mut state);
        self.settle(&mut state, peer_stream);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PlatformError> {
        validate(&desc)?;
        let peer_stream = self.peer().and_then(|peer| peer.outbound_stream());

        let mut state = self.state.lock();
        ensure_open(&state)?;
        let next = match (desc.kind, state.signaling) {
            (SdpType::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                SignalingState::HaveRemoteOffer
            }
            (
                SdpType::Answer,
                SignalingState::HaveLocalOffer | SignalingState::HaveRemotePranswer,
            ) => SignalingState::Stable,
            (SdpType::Pranswer, SignalingState::HaveLocalOffer) => {
                SignalingState::HaveRemotePranswer
            }
            (SdpType::Rollback, _) => SignalingState::Stable,
            (_, current) => {
                return Err(PlatformError::InvalidSignalingState {
                    operation: "set_remote_description",
                    state: current,
                })
            }
        };

        state.remote = (desc.kind != SdpType::Rollback).then_some(desc);
        if state.signaling != next {
            state.signaling = next;
            emit(&mut state, PlatformEvent::SignalingStateChanged(next));
        }
        self.settle(&mut state, peer_stream);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        ensure_open(&state)?;
        if state.remote.is_none() {
            return Err(PlatformError::InvalidSignalingState {
                operation: "add_ice_candidate",
                state: state.signaling,
            });
        }
        if !candidate.candidate.is_empty() && !candidate.candidate.starts_with("candidate:") {
            return Err(PlatformError::InvalidCandidate(candidate.candidate));
        }
        state.remote_candidates.push(candidate);
        Ok(())
    }

    fn senders(&self) -> Vec<RtpSender> {
        self.state
            .lock()
            .senders
            .iter()
            .map(|s| s.sender.clone())
            .collect()
    }

    async fn add_track(
        &self,
        track: MediaTrack,
        stream: &MediaStream,
    ) -> Result<RtpSender, PlatformError> {
        let mut state = self.state.lock();
        ensure_open(&state)?;
        let sender = RtpSender {
            id: Uuid::new_v4().to_string(),
            track: Some(track),
        };
        state.senders.push(Sender {
            sender: sender.clone(),
            stream_id: stream.id.clone(),
        });
        emit(&mut state, PlatformEvent::NegotiationNeeded);
        Ok(sender)
    }

    async fn remove_track(&self, sender: &RtpSender) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        ensure_open(&state)?;
        let before = state.senders.len();
        state.senders.retain(|s| s.sender.id != sender.id);
        if state.senders.len() == before {
            return Err(PlatformError::UnknownSender(sender.id.clone()));
        }
        emit(&mut state, PlatformEvent::NegotiationNeeded);
        Ok(())
    }

    async fn send_data(&self, payload: &[u8]) -> Result<(), PlatformError> {
        {
            let state = self.state.lock();
            ensure_open(&state)?;
            if !state.connected {
                return Err(PlatformError::Other("data path is not open".to_string()));
            }
        }
        let peer = self
            .peer()
            .ok_or_else(|| PlatformError::Other("peer endpoint is gone".to_string()))?;
        peer.deliver(payload);
        Ok(())
    }

    async fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.connected = false;
            state.signaling = SignalingState::Closed;
            emit(&mut state, PlatformEvent::SignalingStateChanged(SignalingState::Closed));
            state.listeners.clear();
        }
        debug!(label = %self.label, "loopback endpoint closed");

        if let Some(peer) = self.network.endpoint(&self.remote_label) {
            peer.on_peer_closed();
        }
    }
}
