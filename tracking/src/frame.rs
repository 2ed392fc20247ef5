//! Frames flowing through a tracking session: captured video and the hand
//! landmarks the vision engine found in it.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Bones of the 21-point hand skeleton, as pairs of landmark indices.
pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (5, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (9, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (13, 17),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
];

/// A tracked point of the hand in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// Raw result of one engine invocation: one landmark list per detected hand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub hands: Vec<Vec<Landmark>>,
}

/// One analyzed frame. Only the first hand is kept.
#[derive(Debug, Clone, PartialEq)]
pub enum HandFrame {
    NoHand,
    Hand(Vec<Landmark>),
}

impl HandFrame {
    pub fn from_detection(detection: Detection) -> Self {
        match detection.hands.into_iter().next() {
            Some(landmarks) if !landmarks.is_empty() => HandFrame::Hand(landmarks),
            _ => HandFrame::NoHand,
        }
    }

    pub fn landmark(&self, index: usize) -> Option<&Landmark> {
        match self {
            HandFrame::Hand(landmarks) => landmarks.get(index),
            HandFrame::NoHand => None,
        }
    }

    pub fn landmarks(&self) -> &[Landmark] {
        match self {
            HandFrame::Hand(landmarks) => landmarks,
            HandFrame::NoHand => &[],
        }
    }

    pub fn is_hand(&self) -> bool {
        matches!(self, HandFrame::Hand(_))
    }
}

/// 8-bit luma frame as delivered by a capture device.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub captured_at: Instant,
}

impl VideoFrame {
    pub fn new(index: u64, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            index,
            width,
            height,
            data,
            captured_at: Instant::now(),
        }
    }

    pub fn blank(index: u64, width: u32, height: u32) -> Self {
        Self::new(index, width, height, vec![0; (width * height) as usize])
    }

    /// None when the buffer doesn't match the declared dimensions.
    pub fn to_gray_image(&self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_first_hand() {
        let detection = Detection {
            hands: vec![vec![Landmark::new(0.1, 0.1)], vec![Landmark::new(0.9, 0.9)]],
        };
        let frame = HandFrame::from_detection(detection);
        assert_eq!(frame.landmark(0), Some(&Landmark::new(0.1, 0.1)));
        assert_eq!(frame.landmarks().len(), 1);
    }

    #[test]
    fn empty_detection_is_no_hand() {
        assert_eq!(HandFrame::from_detection(Detection::default()), HandFrame::NoHand);
        let empty_hand = Detection { hands: vec![vec![]] };
        assert_eq!(HandFrame::from_detection(empty_hand), HandFrame::NoHand);
    }

    #[test]
    fn detection_deserializes_without_z() {
        let d: Detection = serde_json::from_str(r#"{"hands":[[{"x":0.5,"y":0.25}]]}"#).unwrap();
        assert_eq!(d.hands[0][0], Landmark::new(0.5, 0.25));
    }

    #[test]
    fn gray_image_requires_matching_buffer() {
        assert!(VideoFrame::blank(0, 4, 2).to_gray_image().is_some());
        assert!(VideoFrame::new(0, 4, 2, vec![0; 3]).to_gray_image().is_none());
    }
}
