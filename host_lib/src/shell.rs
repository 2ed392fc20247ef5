//! The host shell: ties UI state, the tracking session, the guest bridge and
//! report generation together.
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

use crate::bridge::HostBridge;
use crate::report::ReportRequester;
use crate::ui_state::HostUIState;
use handsteer_tracking::{
    normalize, CapabilityLoader, ControlSignal, FrameSink, HandFrame, Overlay, TrackingSession,
    TrackingState, VideoFrame, VisionCapability,
};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;

/// Per-frame work on the capture thread: normalize, draw, forward.
struct ShellSink {
    bridge: Arc<HostBridge>,
    overlay: Mutex<Overlay>,
    last_signal: Mutex<ControlSignal>,
}

impl FrameSink for ShellSink {
    fn on_frame(&self, video: &VideoFrame, hand: &HandFrame) {
        let signal = normalize(hand);
        self.overlay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .render(Some(video), hand);
        self.bridge.send_input(signal);
        *self.last_signal.lock().unwrap_or_else(PoisonError::into_inner) = signal;
    }
}

pub struct HostShell {
    ui: HostUIState,
    bridge: Arc<HostBridge>,
    session: TrackingSession,
    sink: Arc<ShellSink>,
    report_in_flight: Arc<AtomicBool>,
}

impl HostShell {
    pub fn new(bridge: Arc<HostBridge>, session: TrackingSession, requester: ReportRequester) -> Self {
        let report_in_flight = Arc::new(AtomicBool::new(false));
        register_completion(&bridge, Arc::new(requester), Arc::clone(&report_in_flight));

        let sink = Arc::new(ShellSink {
            bridge: Arc::clone(&bridge),
            overlay: Mutex::new(Overlay::new()),
            last_signal: Mutex::new(ControlSignal::NEUTRAL),
        });

        let ui = HostUIState::initial();
        bridge.send_pause(ui.compute_pause_flag());

        Self {
            ui,
            bridge,
            session,
            sink,
            report_in_flight,
        }
    }

    /// Loads the vision capability. Tracking stays unavailable on failure.
    pub fn initialize_tracking(&mut self, loader: &CapabilityLoader, urls: &[String]) {
        if let Err(e) = self.session.initialize(loader, urls) {
            error!("Hand tracking disabled: {e}");
        }
        self.sync_tracking();
    }

    pub fn initialize_tracking_with(&mut self, capability: Arc<dyn VisionCapability>) {
        if let Err(e) = self.session.initialize_with(capability) {
            error!("Hand tracking disabled: {e}");
        }
        self.sync_tracking();
    }

    /// The guest document has loaded and is listening.
    pub fn guest_ready(&mut self) {
        self.bridge.guest_ready();
        self.set_ui_state(HostUIState {
            loading: false,
            ..self.ui
        });
    }

    pub fn ui_state(&self) -> HostUIState {
        self.ui
    }

    /// Pushes the derived pause flag to the guest and starts or stops
    /// tracking whenever the UI state changes.
    pub fn set_ui_state(&mut self, ui: HostUIState) {
        if ui == self.ui {
            return;
        }
        debug!("UI state {:?} -> {:?}", self.ui, ui);
        self.ui = ui;
        self.bridge.send_pause(ui.compute_pause_flag());
        self.sync_tracking();
    }

    fn sync_tracking(&mut self) {
        let result = if self.ui.should_track() {
            self.session.activate(self.sink.clone())
        } else {
            let result = self.session.deactivate();
            self.bridge.discard_pending_input();
            result
        };
        if let Err(e) = result {
            error!("Hand tracking disabled: {e}");
        }
    }

    pub fn handle_guest_message(&self, origin: Option<&str>, raw: &str) {
        self.bridge.handle_incoming(origin, raw);
    }

    pub fn tracking_state(&self) -> TrackingState {
        self.session.state()
    }

    pub fn last_signal(&self) -> ControlSignal {
        *self
            .sink
            .last_signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_overlay_enabled(&self, enabled: bool) {
        self.sink
            .overlay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_enabled(enabled);
    }

    pub fn with_overlay<R>(&self, f: impl FnOnce(&Overlay) -> R) -> R {
        let overlay = self.sink.overlay.lock().unwrap_or_else(PoisonError::into_inner);
        f(&overlay)
    }

    pub fn report_in_flight(&self) -> bool {
        self.report_in_flight.load(Ordering::SeqCst)
    }

    pub fn shutdown(&mut self) {
        info!("Shutting down host shell");
        if let Err(e) = self.session.deactivate() {
            warn!("Failed to stop tracking: {e}");
        }
        self.bridge.discard_pending_input();
    }
}

/// Clears the in-flight flag when the report worker ends, panics included.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One report exchange at a time. A completion that arrives while a report
/// is being generated is dropped.
fn register_completion(
    bridge: &Arc<HostBridge>,
    requester: Arc<ReportRequester>,
    in_flight: Arc<AtomicBool>,
) {
    let weak: Weak<HostBridge> = Arc::downgrade(bridge);
    bridge.on_completion(move |telemetry| {
        if in_flight.swap(true, Ordering::SeqCst) {
            warn!("Report already in flight, ignoring duplicate completion");
            return;
        }

        let weak = weak.clone();
        let requester = Arc::clone(&requester);
        let guard = InFlightGuard(Arc::clone(&in_flight));
        thread::spawn(move || {
            let _guard = guard;
            let report = requester.generate_report(&telemetry);
            match weak.upgrade() {
                Some(bridge) => bridge.send_report(&report),
                None => debug!("Bridge gone before report was ready"),
            }
        });
    });
}
