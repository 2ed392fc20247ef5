//! Handsteer host configuration.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use serde::Deserialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Environment variable carrying the text-generation API credential.
pub const API_KEY_VAR: &str = "API_KEY";

pub const DEFAULT_CAPABILITY_URLS: [&str; 4] = [
    "https://cdn.jsdelivr.net/npm/@mediapipe/camera_utils/camera_utils.js",
    "https://cdn.jsdelivr.net/npm/@mediapipe/control_utils/control_utils.js",
    "https://cdn.jsdelivr.net/npm/@mediapipe/drawing_utils/drawing_utils.js",
    "https://cdn.jsdelivr.net/npm/@mediapipe/hands/hands.js",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub guest: GuestConfig,
    pub tracking: TrackingConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    pub addr: String,
    /// Only messages from this origin are accepted when set.
    pub origin: Option<String>,
    pub pause_debounce_ms: u64,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7878".to_string(),
            origin: None,
            pause_debounce_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub capability_urls: Vec<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            capability_urls: DEFAULT_CAPABILITY_URLS.iter().map(|u| u.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            timeout_secs: 30,
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> io::Result<Self> {
        serde_yml::from_reader(reader).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn api_key() -> Option<String> {
        std::env::var(API_KEY_VAR)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}
