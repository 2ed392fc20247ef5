//! Hand landmarks to steering input.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::REFERENCE_LANDMARK;
use crate::frame::HandFrame;
use serde::Serialize;

/// Steering input for the guest. `x` is in [-1, 1], 0 when inactive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlSignal {
    pub x: f32,
    pub active: bool,
}

impl ControlSignal {
    pub const NEUTRAL: ControlSignal = ControlSignal {
        x: 0.0,
        active: false,
    };

    pub fn new(x: f32, active: bool) -> Self {
        if !active || !x.is_finite() {
            return Self::NEUTRAL;
        }
        Self {
            x: x.clamp(-1.0, 1.0),
            active,
        }
    }
}

/// Maps the reference landmark to a signal. The x axis is mirrored so that
/// moving the hand right steers right for a user facing the camera.
/// A hand without a usable reference landmark counts as no hand.
pub fn normalize(frame: &HandFrame) -> ControlSignal {
    match frame.landmark(REFERENCE_LANDMARK) {
        Some(reference) if reference.x.is_finite() => {
            let raw_x = 1.0 - reference.x;
            ControlSignal::new((raw_x - 0.5) * 2.0, true)
        }
        _ => ControlSignal::NEUTRAL,
    }
}
