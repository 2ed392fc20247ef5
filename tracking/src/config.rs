//! SPDX-License-Identifier: GPL-3.0-or-later

// Capture resolution handed to the camera.
pub const CAPTURE_WIDTH: u32 = 320;
pub const CAPTURE_HEIGHT: u32 = 240;

// Size of the preview/overlay canvas.
pub const DISPLAY_WIDTH: u32 = 160;
pub const DISPLAY_HEIGHT: u32 = 120;
pub const GRID_SPACING: u32 = 20;

/// Base of the middle finger. Drives the control signal.
pub const REFERENCE_LANDMARK: usize = 9;

// Vision engine configuration surface.
pub const MAX_NUM_HANDS: u32 = 1;
pub const MODEL_COMPLEXITY: u8 = 1;
pub const MIN_DETECTION_CONFIDENCE: f32 = 0.5;
pub const MIN_TRACKING_CONFIDENCE: f32 = 0.5;

pub const MODULE_FETCH_TIMEOUT_SECS: u64 = 30;
