//! Handsteer bridge messages.
//! Every message crosses the host/guest boundary as one JSON object:
//! {"type": TAG, "payload": {...}}
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Telemetry metrics are percentages.
pub const MAX_METRIC: u32 = 100;
/// The guest reports at most this many timeline events.
pub const MAX_TIMELINE_ENTRIES: usize = 3;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("metric {field} out of range: {value}")]
    MetricOutOfRange { field: &'static str, value: u32 },
    #[error("timeline has {0} entries (max 3)")]
    TimelineTooLong(usize),
    #[error("input x is not a finite number")]
    NonFiniteInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub inst: u32,
    pub net: u32,
    pub acad: u32,
    pub hist: u32,
    pub disc: u32,
}

impl Metrics {
    fn fields(&self) -> [(&'static str, u32); 5] {
        [
            ("inst", self.inst),
            ("net", self.net),
            ("acad", self.acad),
            ("hist", self.hist),
            ("disc", self.disc),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub event: String,
}

/// Counts of the three artifact tiers collected during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    pub t1: u64,
    pub t2: u64,
    pub t3: u64,
}

/// Summary the guest reports when a run completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telemetry {
    pub metrics: Metrics,
    pub timeline: Vec<TimelineEntry>,
    pub artifacts: Artifacts,
}

impl Telemetry {
    /// Range checks that serde's type checks don't cover.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        for (field, value) in self.metrics.fields() {
            if value > MAX_METRIC {
                return Err(ProtocolError::MetricOutOfRange { field, value });
            }
        }
        if self.timeline.len() > MAX_TIMELINE_ENTRIES {
            return Err(ProtocolError::TimelineTooLong(self.timeline.len()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub archetype: String,
    pub r#match: String,
    pub narrative: String,
}

impl Report {
    pub fn is_complete(&self) -> bool {
        !self.archetype.trim().is_empty()
            && !self.r#match.trim().is_empty()
            && !self.narrative.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeMessage {
    PauseGame { paused: bool },
    InputUpdate { x: f32, active: bool },
    GameOver(Telemetry),
    ReportGenerated(Report),
}

impl BridgeMessage {
    /// Parses and structurally validates a message from the other side.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let msg: BridgeMessage = serde_json::from_str(raw)?;
        match &msg {
            BridgeMessage::GameOver(telemetry) => telemetry.validate()?,
            BridgeMessage::InputUpdate { x, .. } if !x.is_finite() => {
                return Err(ProtocolError::NonFiniteInput)
            }
            _ => {}
        }
        Ok(msg)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BridgeMessage::PauseGame { .. } => "PAUSE_GAME",
            BridgeMessage::InputUpdate { .. } => "INPUT_UPDATE",
            BridgeMessage::GameOver(_) => "GAME_OVER",
            BridgeMessage::ReportGenerated(_) => "REPORT_GENERATED",
        }
    }

    /// Kinds the guest is allowed to send to the host.
    pub fn is_guest_bound(&self) -> bool {
        !matches!(self, BridgeMessage::GameOver(_))
    }
}
