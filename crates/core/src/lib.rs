//! Core domain types shared by the SDP rewriter and the negotiation controller.

pub mod candidate;
pub mod description;
pub mod preferences;

pub use candidate::{IceCandidate, IceTransportPolicy};
pub use description::{MediaKind, SdpType, SessionDescription};
pub use preferences::{CodecPreferences, PreferenceError};
