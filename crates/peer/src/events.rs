use peerlink_core::IceCandidate;
use tokio::sync::broadcast;

use crate::platform::MediaStream;

const EVENT_CAPACITY: usize = 256;

/// Lifecycle notifications emitted by a [`crate::PeerController`].
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local candidate that passed the transport policy filter.
    IceCandidate(IceCandidate),
    EndOfCandidates,
    Connected,
    Disconnected,
    /// Inbound tracks changed; carries the full remote stream.
    RemoteStreamChanged(MediaStream),
    /// The platform asked for renegotiation on an established connection.
    NegotiationNeeded,
    Closed,
    /// Background failure not tied to a caller's operation.
    Error(String),
}

impl PeerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PeerEvent::IceCandidate(_) => "ice_candidate",
            PeerEvent::EndOfCandidates => "end_of_candidates",
            PeerEvent::Connected => "connected",
            PeerEvent::Disconnected => "disconnected",
            PeerEvent::RemoteStreamChanged(_) => "remote_stream_changed",
            PeerEvent::NegotiationNeeded => "negotiation_needed",
            PeerEvent::Closed => "closed",
            PeerEvent::Error(_) => "error",
        }
    }
}

/// Fan-out of [`PeerEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<PeerEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.sender.subscribe()
    }

    /// Delivers `event` to current subscribers; returns how many received it.
    pub fn emit(&self, event: PeerEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!(event = name, "no subscribers for peer event");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let hub = EventHub::default();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        assert_eq!(hub.emit(PeerEvent::Connected), 2);
        assert_eq!(first.recv().await.expect("event"), PeerEvent::Connected);
        assert_eq!(second.recv().await.expect("event"), PeerEvent::Connected);
    }

    #[test]
    fn emit_without_subscribers_is_harmless() {
        let hub = EventHub::new(4);
        assert_eq!(hub.emit(PeerEvent::Closed), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
