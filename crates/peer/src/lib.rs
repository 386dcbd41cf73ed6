//! Offer/answer negotiation on top of a platform peer connection.
//!
//! [`PeerController`] owns one [`PlatformConnection`], runs every local and
//! remote description through the SDP rewriter before committing it, filters
//! outgoing candidates by transport policy and republishes platform activity
//! as [`PeerEvent`]s. The [`loopback`] module provides an in-process platform
//! used by tests and the CLI demo.

pub mod controller;
pub mod error;
pub mod events;
pub mod loopback;
pub mod platform;

pub use controller::{PeerConfig, PeerController, PeerState};
pub use error::NegotiationError;
pub use events::{EventHub, PeerEvent};
pub use loopback::{LoopbackConnection, LoopbackFactory, LoopbackNetwork};
pub use platform::{
    CandidateError, ConnectionFactory, ConnectionState, IceConnectionState, MediaStream,
    MediaTrack, PlatformConnection, PlatformError, PlatformEvent, RtpSender, SignalingState,
};
