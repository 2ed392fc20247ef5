//! Diagnostic overlay: mirrored camera preview with the HUD grid,
//! hand skeleton and steering cursor drawn on top.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::{DISPLAY_HEIGHT, DISPLAY_WIDTH, GRID_SPACING, REFERENCE_LANDMARK};
use crate::frame::{HandFrame, Landmark, VideoFrame, HAND_CONNECTIONS};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{
    draw_cross_mut, draw_filled_circle_mut, draw_hollow_circle_mut, draw_line_segment_mut,
};

pub const GRID_COLOR: Rgb<u8> = Rgb([0, 96, 64]);
pub const BONE_COLOR: Rgb<u8> = Rgb([0, 255, 136]);
pub const JOINT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub const CURSOR_COLOR: Rgb<u8> = Rgb([255, 48, 48]);
pub const SEARCH_COLOR: Rgb<u8> = Rgb([255, 200, 0]);

const CURSOR_RADIUS: i32 = 5;
const SEARCH_RADIUS: i32 = 14;

pub struct Overlay {
    canvas: RgbImage,
    enabled: bool,
}

impl Default for Overlay {
    fn default() -> Self {
        Self::new()
    }
}

impl Overlay {
    pub fn new() -> Self {
        Self {
            canvas: RgbImage::new(DISPLAY_WIDTH, DISPLAY_HEIGHT),
            enabled: true,
        }
    }

    /// With the overlay disabled only the preview is drawn.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn canvas(&self) -> &RgbImage {
        &self.canvas
    }

    pub fn render(&mut self, video: Option<&VideoFrame>, hand: &HandFrame) {
        self.canvas = preview(video);
        if !self.enabled {
            return;
        }

        self.draw_grid();
        match hand.landmark(REFERENCE_LANDMARK) {
            Some(reference) => {
                self.draw_skeleton(hand.landmarks());
                let (x, y) = to_screen(reference);
                draw_filled_circle_mut(
                    &mut self.canvas,
                    (x as i32, y as i32),
                    CURSOR_RADIUS,
                    CURSOR_COLOR,
                );
            }
            None => self.draw_searching(),
        }
    }

    fn draw_grid(&mut self) {
        let (w, h) = (DISPLAY_WIDTH as f32, DISPLAY_HEIGHT as f32);
        for x in (0..DISPLAY_WIDTH).step_by(GRID_SPACING as usize) {
            draw_line_segment_mut(&mut self.canvas, (x as f32, 0.0), (x as f32, h), GRID_COLOR);
        }
        for y in (0..DISPLAY_HEIGHT).step_by(GRID_SPACING as usize) {
            draw_line_segment_mut(&mut self.canvas, (0.0, y as f32), (w, y as f32), GRID_COLOR);
        }
    }

    fn draw_skeleton(&mut self, landmarks: &[Landmark]) {
        for (a, b) in HAND_CONNECTIONS {
            if let (Some(a), Some(b)) = (landmarks.get(a), landmarks.get(b)) {
                draw_line_segment_mut(&mut self.canvas, to_screen(a), to_screen(b), BONE_COLOR);
            }
        }
        for landmark in landmarks {
            let (x, y) = to_screen(landmark);
            draw_filled_circle_mut(&mut self.canvas, (x as i32, y as i32), 1, JOINT_COLOR);
        }
    }

    fn draw_searching(&mut self) {
        let center = ((DISPLAY_WIDTH / 2) as i32, (DISPLAY_HEIGHT / 2) as i32);
        draw_hollow_circle_mut(&mut self.canvas, center, SEARCH_RADIUS, SEARCH_COLOR);
        draw_cross_mut(&mut self.canvas, SEARCH_COLOR, center.0, center.1);
    }
}

/// Mirrors x so the preview behaves like a mirror for the user.
fn to_screen(landmark: &Landmark) -> (f32, f32) {
    (
        (1.0 - landmark.x) * DISPLAY_WIDTH as f32,
        landmark.y * DISPLAY_HEIGHT as f32,
    )
}

fn preview(video: Option<&VideoFrame>) -> RgbImage {
    match video.and_then(VideoFrame::to_gray_image) {
        Some(gray) => {
            let small = imageops::resize(&gray, DISPLAY_WIDTH, DISPLAY_HEIGHT, FilterType::Triangle);
            DynamicImage::ImageLuma8(imageops::flip_horizontal(&small)).to_rgb8()
        }
        None => RgbImage::new(DISPLAY_WIDTH, DISPLAY_HEIGHT),
    }
}
