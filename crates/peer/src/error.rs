use thiserror::Error;

use crate::{controller::PeerState, platform::PlatformError};

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("peer connection is not connected")]
    NotConnected,
    #[error("peer connection is closed")]
    Closed,
    #[error("peer controller requires a running tokio runtime")]
    NoRuntime,
    #[error("{operation} is not permitted while {state}")]
    InvalidState {
        operation: &'static str,
        state: PeerState,
    },
}
