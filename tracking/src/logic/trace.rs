use serde::Serialize;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// Structured record of what a tracking session did, one JSON object per line.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TracePacket<'a> {
    // Session state machine change
    Transition {
        from: &'a str,
        to: &'a str,
        reason: &'a str,
        ts: u128,
    },
    // One frame went through the engine
    FrameAnalyzed {
        frame_idx: u64,
        hand: bool,
        latency_ms: u32,
        ts: u128,
    },
    // Frame analyzed but its result was thrown away
    DroppedFrame {
        frame_idx: u64,
        reason: &'a str,
        ts: u128,
    },
    LoadFailure {
        reason: &'a str,
        ts: u128,
    },
    CaptureStopped {
        frames: u64,
        ts: u128,
    },
}

/// Trace log of one host run. Writes nothing unless activated.
pub struct TraceRun {
    pub run_id: String,
    log: Option<File>,
}

impl TraceRun {
    /// Creates `output/runs/<run id>/trace.log` when activated.
    pub fn new(activated: bool) -> Result<Self, anyhow::Error> {
        if !activated {
            return Ok(Self::disabled());
        }
        Self::new_in(&Path::new("output").join("runs"))
    }

    pub fn new_in(base: &Path) -> Result<Self, anyhow::Error> {
        let run_id = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
        let dir = base.join(&run_id);
        std::fs::create_dir_all(&dir)?;

        let log = OpenOptions::new()
            .append(true)
            .create(true)
            .open(dir.join("trace.log"))?;

        Ok(Self {
            run_id,
            log: Some(log),
        })
    }

    pub fn disabled() -> Self {
        Self {
            run_id: String::new(),
            log: None,
        }
    }

    pub fn write(&mut self, pkt: &TracePacket) -> Result<(), anyhow::Error> {
        if let Some(log) = &mut self.log {
            let line = serde_json::to_string(pkt)?;
            writeln!(log, "{line}")?;
        }
        Ok(())
    }
}

pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
