//! Tracking session: owns the vision engine instance and the camera capture
//! loop, and hands every analyzed frame to a sink.
//!
//! Copyright (C) 2025  Ardalan Amiri Sani
//!
//! This program is free software: you can redistribute it and/or modify
//! it under the terms of the GNU General Public License as published by
//! the Free Software Foundation, either version 3 of the License, or
//! (at your option) any later version.
//!
//! This program is distributed in the hope that it will be useful,
//! but WITHOUT ANY WARRANTY; without even the implied warranty of
//! MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//! GNU General Public License for more details.
//!
//! You should have received a copy of the GNU General Public License
//! along with this program.  If not, see <https://www.gnu.org/licenses/>.

use crate::camera::{CaptureDevice, CaptureDeviceFactory, DeviceLease, DeviceSlot};
use crate::capability::{CapabilityLoader, HandEngine, LoadError, VisionCapability, VisionOptions};
use crate::config::{CAPTURE_HEIGHT, CAPTURE_WIDTH};
use crate::frame::{HandFrame, VideoFrame};
use crate::logic::fsm::{decide, Intent, SessionEvent, TransitionDecision};
use crate::logic::states::TrackingState;
use crate::logic::trace::{now_ms, TracePacket, TraceRun};
use log::{debug, error, info, warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("vision engine could not be created: {0}")]
    EngineCreation(String),
    #[error("capture device could not be opened: {0}")]
    DeviceOpen(#[source] io::Error),
    #[error("capture device is held by another session")]
    DeviceBusy,
    #[error("no frame sink given for activation")]
    MissingSink,
}

/// Receives every analyzed frame on the capture thread.
/// Implementations must return quickly; the next frame waits on them.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, video: &VideoFrame, hand: &HandFrame);
}

impl<F> FrameSink for F
where
    F: Fn(&VideoFrame, &HandFrame) + Send + Sync,
{
    fn on_frame(&self, video: &VideoFrame, hand: &HandFrame) {
        self(video, hand)
    }
}

type SharedEngine = Arc<Mutex<Box<dyn HandEngine>>>;
type SharedTrace = Arc<Mutex<TraceRun>>;

struct CaptureLoop {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    // Released only after the capture thread has been joined.
    _lease: DeviceLease,
}

pub struct TrackingSession {
    state: TrackingState,
    options: VisionOptions,
    capability: Option<Arc<dyn VisionCapability>>,
    engine: Option<SharedEngine>,
    devices: Box<dyn CaptureDeviceFactory>,
    slot: DeviceSlot,
    capture: Option<CaptureLoop>,
    trace: SharedTrace,
}

impl TrackingSession {
    pub fn new(devices: Box<dyn CaptureDeviceFactory>, slot: DeviceSlot) -> Self {
        Self {
            state: TrackingState::Uninitialized,
            options: VisionOptions::default(),
            capability: None,
            engine: None,
            devices,
            slot,
            capture: None,
            trace: Arc::new(Mutex::new(TraceRun::disabled())),
        }
    }

    pub fn with_trace(mut self, trace: TraceRun) -> Self {
        self.trace = Arc::new(Mutex::new(trace));
        self
    }

    pub fn with_options(mut self, options: VisionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// False once the capture thread has exited on its own (device failure).
    pub fn is_capturing(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|capture| !capture.handle.is_finished())
    }

    /// Resolves the vision capability and creates the engine instance.
    /// A load failure leaves the session Uninitialized; nothing retries on its own.
    pub fn initialize(
        &mut self,
        loader: &CapabilityLoader,
        urls: &[String],
    ) -> Result<(), TrackingError> {
        if self.state != TrackingState::Uninitialized {
            debug!("Tracking session already initialized ({})", self.state);
            return Ok(());
        }
        self.handle(SessionEvent::LoadStarted, None)?;

        match loader.resolve(urls) {
            Ok(capability) => self.finish_loading(capability),
            Err(e) => {
                warn!("Hand tracking unavailable: {e}");
                let reason = e.to_string();
                self.write_trace(&TracePacket::LoadFailure {
                    reason: &reason,
                    ts: now_ms(),
                });
                self.handle(SessionEvent::LoadFailed(reason), None)?;
                Err(e.into())
            }
        }
    }

    /// Same as `initialize`, for a capability that is already resolved.
    pub fn initialize_with(
        &mut self,
        capability: Arc<dyn VisionCapability>,
    ) -> Result<(), TrackingError> {
        if self.state != TrackingState::Uninitialized {
            debug!("Tracking session already initialized ({})", self.state);
            return Ok(());
        }
        self.handle(SessionEvent::LoadStarted, None)?;
        self.finish_loading(capability)
    }

    fn finish_loading(&mut self, capability: Arc<dyn VisionCapability>) -> Result<(), TrackingError> {
        self.capability = Some(capability);
        self.handle(SessionEvent::CapabilitiesLoaded, None)
    }

    /// Starts capturing. A no-op unless the session is Ready.
    pub fn activate(&mut self, sink: Arc<dyn FrameSink>) -> Result<(), TrackingError> {
        self.handle(SessionEvent::Activate, Some(sink))
    }

    /// Stops capturing and releases the camera. A no-op unless Tracking.
    /// No sink call happens after this returns.
    pub fn deactivate(&mut self) -> Result<(), TrackingError> {
        self.handle(SessionEvent::Deactivate, None)
    }

    fn handle(
        &mut self,
        event: SessionEvent,
        sink: Option<Arc<dyn FrameSink>>,
    ) -> Result<(), TrackingError> {
        match decide(self.state, &event) {
            TransitionDecision::Stay => {
                debug!("Ignoring {:?} in {} state", event, self.state);
                Ok(())
            }
            TransitionDecision::Transition {
                to,
                reason,
                intents,
            } => {
                for intent in &intents {
                    if let Err(e) = self.execute(intent, sink.clone()) {
                        error!("Tracking session failed: {e}");
                        self.fail(e.to_string());
                        return Err(e);
                    }
                }
                self.commit(to, &reason);
                Ok(())
            }
        }
    }

    fn fail(&mut self, reason: String) {
        if let TransitionDecision::Transition {
            to,
            reason,
            intents,
        } = decide(self.state, &SessionEvent::CreationFailed(reason))
        {
            if intents.contains(&Intent::StopCapture) {
                self.stop_capture();
            }
            self.commit(to, &reason);
        }
    }

    fn commit(&mut self, to: TrackingState, reason: &str) {
        info!("Tracking session: {} -> {} ({})", self.state, to, reason);
        self.write_trace(&TracePacket::Transition {
            from: self.state.as_str(),
            to: to.as_str(),
            reason,
            ts: now_ms(),
        });
        self.state = to;
    }

    fn execute(
        &mut self,
        intent: &Intent,
        sink: Option<Arc<dyn FrameSink>>,
    ) -> Result<(), TrackingError> {
        match intent {
            Intent::CreateEngine => {
                if self.engine.is_some() {
                    return Ok(());
                }
                let capability = self
                    .capability
                    .as_ref()
                    .ok_or_else(|| TrackingError::EngineCreation("no capability".to_string()))?;
                let engine = capability
                    .create_engine(&self.options)
                    .map_err(|e| TrackingError::EngineCreation(e.to_string()))?;
                info!("Created {} engine ({:?})", capability.name(), self.options);
                self.engine = Some(Arc::new(Mutex::new(engine)));
            }

            Intent::StartCapture => {
                let sink = sink.ok_or(TrackingError::MissingSink)?;
                let engine = self
                    .engine
                    .clone()
                    .ok_or_else(|| TrackingError::EngineCreation("no engine".to_string()))?;
                let lease = self.slot.try_claim().ok_or(TrackingError::DeviceBusy)?;
                let device = self
                    .devices
                    .open(CAPTURE_WIDTH, CAPTURE_HEIGHT)
                    .map_err(TrackingError::DeviceOpen)?;

                let stop = Arc::new(AtomicBool::new(false));
                let stop_clone = Arc::clone(&stop);
                let trace = Arc::clone(&self.trace);
                let handle = thread::spawn(move || {
                    capture_loop(device, engine, sink, stop_clone, trace);
                });

                self.capture = Some(CaptureLoop {
                    stop,
                    handle,
                    _lease: lease,
                });
            }

            Intent::StopCapture => self.stop_capture(),
        }

        Ok(())
    }

    fn stop_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop.store(true, Ordering::SeqCst);
            if capture.handle.join().is_err() {
                error!("Capture thread panicked");
            }
            debug!("Capture thread joined, releasing device");
        }
    }

    fn write_trace(&self, pkt: &TracePacket) {
        let mut trace = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = trace.write(pkt) {
            debug!("Failed to write trace: {e}");
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

/// Runs on its own thread. Frames are handled one at a time in capture order;
/// the next frame is not read before the engine has answered.
fn capture_loop(
    mut device: Box<dyn CaptureDevice>,
    engine: SharedEngine,
    sink: Arc<dyn FrameSink>,
    stop: Arc<AtomicBool>,
    trace: SharedTrace,
) {
    info!("Capture started on {}", device.get_name());
    let mut frames: u64 = 0;

    while !stop.load(Ordering::SeqCst) {
        let video = match device.capture() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Capture device {} failed: {e}", device.get_name());
                break;
            }
        };

        let start = Instant::now();
        let result = engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .process(&video);
        let latency_ms = start.elapsed().as_millis() as u32;

        // A result that lands after deactivation must not reach the sink.
        if stop.load(Ordering::SeqCst) {
            write(&trace, &TracePacket::DroppedFrame {
                frame_idx: video.index,
                reason: "deactivated",
                ts: now_ms(),
            });
            break;
        }

        let hand = match result {
            Ok(detection) => HandFrame::from_detection(detection),
            Err(e) => {
                debug!("Malformed result for frame {}: {e}", video.index);
                HandFrame::NoHand
            }
        };

        write(&trace, &TracePacket::FrameAnalyzed {
            frame_idx: video.index,
            hand: hand.is_hand(),
            latency_ms,
            ts: now_ms(),
        });

        sink.on_frame(&video, &hand);
        frames += 1;
    }

    device.release();
    write(&trace, &TracePacket::CaptureStopped {
        frames,
        ts: now_ms(),
    });
    info!("Capture stopped after {frames} frames");
}

fn write(trace: &SharedTrace, pkt: &TracePacket) {
    let mut trace = trace.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = trace.write(pkt) {
        debug!("Failed to write trace: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityFactory, CapabilityModule, ModuleFetcher};
    use crate::frame::{Detection, Landmark};
    use anyhow::{anyhow, Error};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        engines: AtomicUsize,
        opens: AtomicUsize,
        releases: AtomicUsize,
        processed: AtomicUsize,
    }

    struct FakeEngine {
        counters: Arc<Counters>,
        fail: bool,
    }

    impl HandEngine for FakeEngine {
        fn process(&mut self, _frame: &VideoFrame) -> Result<Detection, Error> {
            self.counters.processed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("garbled result"));
            }
            Ok(Detection {
                hands: vec![vec![Landmark::new(0.25, 0.5); 21]],
            })
        }
    }

    struct FakeCapability {
        counters: Arc<Counters>,
        engine_fails: bool,
        creation_fails: bool,
    }

    impl VisionCapability for FakeCapability {
        fn name(&self) -> String {
            "fake".to_string()
        }

        fn create_engine(&self, options: &VisionOptions) -> Result<Box<dyn HandEngine>, Error> {
            assert_eq!(options.max_num_hands, 1);
            if self.creation_fails {
                return Err(anyhow!("no WebGL context"));
            }
            self.counters.engines.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeEngine {
                counters: Arc::clone(&self.counters),
                fail: self.engine_fails,
            }))
        }
    }

    struct FakeDevice {
        counters: Arc<Counters>,
        next: u64,
    }

    impl CaptureDevice for FakeDevice {
        fn capture(&mut self) -> io::Result<VideoFrame> {
            thread::sleep(Duration::from_millis(2));
            self.next += 1;
            Ok(VideoFrame::blank(self.next, 8, 6))
        }

        fn release(&mut self) {
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
        }

        fn get_name(&self) -> String {
            "fake camera".to_string()
        }
    }

    struct FakeDevices(Arc<Counters>);

    impl CaptureDeviceFactory for FakeDevices {
        fn open(&self, width: u32, height: u32) -> io::Result<Box<dyn CaptureDevice>> {
            assert_eq!((width, height), (CAPTURE_WIDTH, CAPTURE_HEIGHT));
            self.0.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeDevice {
                counters: Arc::clone(&self.0),
                next: 0,
            }))
        }
    }

    /// Fails every read after the first `frames` captures.
    struct FlakyDevices {
        counters: Arc<Counters>,
        frames: u64,
    }

    impl CaptureDeviceFactory for FlakyDevices {
        fn open(&self, _width: u32, _height: u32) -> io::Result<Box<dyn CaptureDevice>> {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FlakyDevice {
                inner: FakeDevice {
                    counters: Arc::clone(&self.counters),
                    next: 0,
                },
                frames: self.frames,
            }))
        }
    }

    struct FlakyDevice {
        inner: FakeDevice,
        frames: u64,
    }

    impl CaptureDevice for FlakyDevice {
        fn capture(&mut self) -> io::Result<VideoFrame> {
            if self.inner.next >= self.frames {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "camera unplugged"));
            }
            self.inner.capture()
        }

        fn release(&mut self) {
            self.inner.release()
        }

        fn get_name(&self) -> String {
            "flaky camera".to_string()
        }
    }

    struct Recorder(Mutex<Vec<HandFrame>>);

    impl FrameSink for Recorder {
        fn on_frame(&self, _video: &VideoFrame, hand: &HandFrame) {
            self.0.lock().unwrap().push(hand.clone());
        }
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Recorder(Mutex::new(Vec::new())))
        }

        fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }

        fn wait_for(&self, n: usize) {
            for _ in 0..500 {
                if self.len() >= n {
                    return;
                }
                thread::sleep(Duration::from_millis(2));
            }
            panic!("sink never received {n} frames");
        }
    }

    fn capability(counters: &Arc<Counters>) -> Arc<FakeCapability> {
        Arc::new(FakeCapability {
            counters: Arc::clone(counters),
            engine_fails: false,
            creation_fails: false,
        })
    }

    fn ready_session(counters: &Arc<Counters>, slot: DeviceSlot) -> TrackingSession {
        let mut session = TrackingSession::new(Box::new(FakeDevices(Arc::clone(counters))), slot);
        session.initialize_with(capability(counters)).unwrap();
        assert_eq!(session.state(), TrackingState::Ready);
        session
    }

    #[test]
    fn engine_is_created_once_across_cycles() {
        let counters = Arc::new(Counters::default());
        let mut session = ready_session(&counters, DeviceSlot::new());
        let sink = Recorder::new();

        for _ in 0..3 {
            session.activate(sink.clone()).unwrap();
            assert_eq!(session.state(), TrackingState::Tracking);
            session.deactivate().unwrap();
            assert_eq!(session.state(), TrackingState::Ready);
        }

        assert_eq!(counters.engines.load(Ordering::SeqCst), 1);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 3);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn activate_while_tracking_does_not_reacquire() {
        let counters = Arc::new(Counters::default());
        let slot = DeviceSlot::new();
        let mut session = ready_session(&counters, slot.clone());
        let sink = Recorder::new();

        session.activate(sink.clone()).unwrap();
        session.activate(sink.clone()).unwrap();

        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert!(slot.is_claimed());
        assert!(session.is_capturing());
    }

    #[test]
    fn deactivate_when_not_tracking_is_noop() {
        let counters = Arc::new(Counters::default());
        let mut session = ready_session(&counters, DeviceSlot::new());

        session.deactivate().unwrap();

        assert_eq!(session.state(), TrackingState::Ready);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn frames_reach_the_sink_until_deactivated() {
        let counters = Arc::new(Counters::default());
        let mut session = ready_session(&counters, DeviceSlot::new());
        let sink = Recorder::new();

        session.activate(sink.clone()).unwrap();
        sink.wait_for(3);
        session.deactivate().unwrap();

        let seen = sink.len();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.len(), seen);
        assert!(sink.0.lock().unwrap().iter().all(HandFrame::is_hand));
    }

    #[test]
    fn engine_errors_become_no_hand() {
        let counters = Arc::new(Counters::default());
        let mut session = TrackingSession::new(
            Box::new(FakeDevices(Arc::clone(&counters))),
            DeviceSlot::new(),
        );
        session
            .initialize_with(Arc::new(FakeCapability {
                counters: Arc::clone(&counters),
                engine_fails: true,
                creation_fails: false,
            }))
            .unwrap();
        let sink = Recorder::new();

        session.activate(sink.clone()).unwrap();
        sink.wait_for(2);
        session.deactivate().unwrap();

        assert!(sink.0.lock().unwrap().iter().all(|h| *h == HandFrame::NoHand));
        assert_eq!(session.state(), TrackingState::Ready);
    }

    #[test]
    fn second_session_cannot_take_the_camera() {
        let counters = Arc::new(Counters::default());
        let slot = DeviceSlot::new();
        let mut first = ready_session(&counters, slot.clone());
        let mut second = ready_session(&counters, slot.clone());

        first.activate(Recorder::new()).unwrap();
        let err = second.activate(Recorder::new()).unwrap_err();

        assert!(matches!(err, TrackingError::DeviceBusy));
        assert_eq!(second.state(), TrackingState::Error);
        assert_eq!(first.state(), TrackingState::Tracking);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);

        // Error is terminal.
        first.deactivate().unwrap();
        second.activate(Recorder::new()).unwrap();
        assert_eq!(second.state(), TrackingState::Error);
        assert!(!slot.is_claimed());
    }

    #[test]
    fn device_failure_ends_capture_until_deactivated() {
        let counters = Arc::new(Counters::default());
        let slot = DeviceSlot::new();
        let mut session = TrackingSession::new(
            Box::new(FlakyDevices {
                counters: Arc::clone(&counters),
                frames: 3,
            }),
            slot.clone(),
        );
        session.initialize_with(capability(&counters)).unwrap();
        let sink = Recorder::new();

        session.activate(sink.clone()).unwrap();
        for _ in 0..500 {
            if !session.is_capturing() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        assert!(!session.is_capturing());
        assert_eq!(sink.len(), 3);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), TrackingState::Tracking);
        assert!(slot.is_claimed());

        session.deactivate().unwrap();
        assert_eq!(session.state(), TrackingState::Ready);
        assert!(!slot.is_claimed());

        session.activate(sink.clone()).unwrap();
        assert_eq!(session.state(), TrackingState::Tracking);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert_eq!(counters.engines.load(Ordering::SeqCst), 1);
        session.deactivate().unwrap();
    }

    #[test]
    fn drop_releases_the_camera() {
        let counters = Arc::new(Counters::default());
        let slot = DeviceSlot::new();
        let mut session = ready_session(&counters, slot.clone());
        let sink = Recorder::new();

        session.activate(sink.clone()).unwrap();
        sink.wait_for(1);
        drop(session);

        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert!(!slot.is_claimed());
    }

    #[test]
    fn engine_creation_failure_is_terminal() {
        let counters = Arc::new(Counters::default());
        let mut session = TrackingSession::new(
            Box::new(FakeDevices(Arc::clone(&counters))),
            DeviceSlot::new(),
        );

        let err = session
            .initialize_with(Arc::new(FakeCapability {
                counters: Arc::clone(&counters),
                engine_fails: false,
                creation_fails: true,
            }))
            .unwrap_err();

        assert!(matches!(err, TrackingError::EngineCreation(_)));
        assert_eq!(session.state(), TrackingState::Error);
        session.activate(Recorder::new()).unwrap();
        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    }

    struct FailingFetcher;

    impl ModuleFetcher for FailingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, Error> {
            Err(anyhow!("{url} unreachable"))
        }
    }

    struct UnusedFactory;

    impl CapabilityFactory for UnusedFactory {
        fn build(
            &self,
            _modules: &[Arc<CapabilityModule>],
        ) -> Result<Arc<dyn VisionCapability>, Error> {
            Err(anyhow!("never built"))
        }
    }

    #[test]
    fn load_failure_leaves_tracking_unavailable() {
        let counters = Arc::new(Counters::default());
        let mut session = TrackingSession::new(
            Box::new(FakeDevices(Arc::clone(&counters))),
            DeviceSlot::new(),
        );
        let loader = CapabilityLoader::new(Box::new(FailingFetcher), Box::new(UnusedFactory));

        let err = session
            .initialize(&loader, &["hands.js".to_string()])
            .unwrap_err();

        assert!(matches!(err, TrackingError::Load(LoadError::LoadFailure { .. })));
        assert_eq!(session.state(), TrackingState::Uninitialized);
        session.activate(Recorder::new()).unwrap();
        assert_eq!(session.state(), TrackingState::Uninitialized);
    }
}
