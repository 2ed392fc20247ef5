//! Headless vision backend: replays recorded detections against a
//! synthetic camera.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{anyhow, Context, Error};
use handsteer_tracking::{
    CapabilityFactory, CapabilityModule, CaptureDevice, CaptureDeviceFactory, Detection,
    HandEngine, VideoFrame, VisionCapability, VisionOptions,
};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// One detection per line, e.g. `{"hands":[[{"x":0.4,"y":0.5}, ...]]}`.
/// `{}` or `{"hands":[]}` records a frame without a hand.
pub fn load_detections(path: &Path) -> Result<Vec<Detection>, Error> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading replay file {}", path.display()))?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{} line {}", path.display(), i + 1))
        })
        .collect()
}

pub struct ReplayFactory {
    detections: Option<Arc<Vec<Detection>>>,
}

impl ReplayFactory {
    pub fn new(detections: Option<Vec<Detection>>) -> Self {
        Self {
            detections: detections.map(Arc::new),
        }
    }
}

impl CapabilityFactory for ReplayFactory {
    fn build(&self, modules: &[Arc<CapabilityModule>]) -> Result<Arc<dyn VisionCapability>, Error> {
        let detections = self.detections.as_ref().ok_or_else(|| {
            anyhow!(
                "no native hand engine for the {} loaded modules, run with --replay",
                modules.len()
            )
        })?;
        Ok(Arc::new(ReplayCapability {
            detections: Arc::clone(detections),
        }))
    }
}

struct ReplayCapability {
    detections: Arc<Vec<Detection>>,
}

impl VisionCapability for ReplayCapability {
    fn name(&self) -> String {
        format!("replay ({} frames)", self.detections.len())
    }

    fn create_engine(&self, _options: &VisionOptions) -> Result<Box<dyn HandEngine>, Error> {
        if self.detections.is_empty() {
            return Err(anyhow!("replay file has no frames"));
        }
        Ok(Box::new(ReplayEngine {
            detections: Arc::clone(&self.detections),
            next: 0,
        }))
    }
}

/// Loops over the recording.
struct ReplayEngine {
    detections: Arc<Vec<Detection>>,
    next: usize,
}

impl HandEngine for ReplayEngine {
    fn process(&mut self, _frame: &VideoFrame) -> Result<Detection, Error> {
        let detection = self.detections[self.next % self.detections.len()].clone();
        self.next += 1;
        Ok(detection)
    }
}

#[derive(Default)]
pub struct SyntheticCameras;

impl CaptureDeviceFactory for SyntheticCameras {
    fn open(&self, width: u32, height: u32) -> io::Result<Box<dyn CaptureDevice>> {
        if width == 0 || height == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported resolution {width}x{height}"),
            ));
        }
        Ok(Box::new(SyntheticCamera {
            width,
            height,
            index: 0,
            last: None,
        }))
    }
}

/// Paces frames at roughly 30 fps. The picture is a scrolling gradient.
struct SyntheticCamera {
    width: u32,
    height: u32,
    index: u64,
    last: Option<Instant>,
}

impl CaptureDevice for SyntheticCamera {
    fn capture(&mut self) -> io::Result<VideoFrame> {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < FRAME_INTERVAL {
                thread::sleep(FRAME_INTERVAL - elapsed);
            }
        }
        self.last = Some(Instant::now());
        self.index += 1;

        let shift = self.index as u32;
        let data = (0..self.height)
            .flat_map(|_| (0..self.width).map(move |x| (x.wrapping_add(shift) % 256) as u8))
            .collect();
        Ok(VideoFrame::new(self.index, self.width, self.height, data))
    }

    fn get_name(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }
}
