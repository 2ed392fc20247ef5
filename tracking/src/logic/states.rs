use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a tracking session.
#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum TrackingState {
    Uninitialized,
    LoadingCapabilities,
    Ready,
    Tracking,
    Error,
}

impl TrackingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingState::Uninitialized => "Uninitialized",
            TrackingState::LoadingCapabilities => "LoadingCapabilities",
            TrackingState::Ready => "Ready",
            TrackingState::Tracking => "Tracking",
            TrackingState::Error => "Error",
        }
    }
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
