//! Transition table of the tracking session: events in, decisions out.
//! The session executes the intents carried by a decision before it
//! commits the new state.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::logic::states::TrackingState;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    LoadStarted,
    CapabilitiesLoaded,
    LoadFailed(String),
    Activate,
    Deactivate,
    CreationFailed(String),
}

/// Side effects that must succeed for a transition to complete.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Intent {
    CreateEngine,
    StartCapture,
    StopCapture,
}

#[derive(Debug, PartialEq)]
pub(crate) enum TransitionDecision {
    Stay,
    Transition {
        to: TrackingState,
        reason: String,
        intents: Vec<Intent>,
    },
}

pub(crate) fn decide(state: TrackingState, event: &SessionEvent) -> TransitionDecision {
    use TrackingState::*;

    let (to, reason, intents) = match (state, event) {
        // Terminal for this session.
        (Error, _) => return TransitionDecision::Stay,

        (_, SessionEvent::CreationFailed(e)) => {
            let intents = if state == Tracking {
                vec![Intent::StopCapture]
            } else {
                vec![]
            };
            (Error, format!("instance creation failed: {e}"), intents)
        }

        (Uninitialized, SessionEvent::LoadStarted) => (
            LoadingCapabilities,
            "loading capability modules".to_string(),
            vec![],
        ),
        (LoadingCapabilities, SessionEvent::CapabilitiesLoaded) => (
            Ready,
            "capabilities loaded".to_string(),
            vec![Intent::CreateEngine],
        ),
        (LoadingCapabilities, SessionEvent::LoadFailed(e)) => {
            (Uninitialized, format!("load failed: {e}"), vec![])
        }
        (Ready, SessionEvent::Activate) => {
            (Tracking, "activated".to_string(), vec![Intent::StartCapture])
        }
        (Tracking, SessionEvent::Deactivate) => {
            (Ready, "deactivated".to_string(), vec![Intent::StopCapture])
        }

        _ => return TransitionDecision::Stay,
    };

    TransitionDecision::Transition {
        to,
        reason,
        intents,
    }
}
