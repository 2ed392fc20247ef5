//! Host side of the host/guest channel.
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

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use handsteer_protocol::{BridgeMessage, Report, Telemetry};
use handsteer_tracking::ControlSignal;
use log::{debug, info, warn};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One-way transport to the guest document. No acknowledgments.
pub trait GuestChannel: Send + Sync {
    fn post(&self, message: &str) -> io::Result<()>;
}

type CompletionHandler = Arc<dyn Fn(Telemetry) + Send + Sync>;

enum PauseCommand {
    Pause(bool),
    GuestReady,
    Shutdown,
}

pub struct HostBridge {
    channel: Arc<dyn GuestChannel>,
    allowed_origin: Option<String>,
    pause_tx: Sender<PauseCommand>,
    pause_worker: Option<JoinHandle<()>>,
    // Latest input not yet posted. The input worker drains it.
    pending_input: Arc<Mutex<Option<ControlSignal>>>,
    input_wake: Sender<()>,
    on_completion: Mutex<Option<CompletionHandler>>,
}

impl HostBridge {
    pub fn new(
        channel: Arc<dyn GuestChannel>,
        pause_debounce: Duration,
        allowed_origin: Option<String>,
    ) -> Self {
        let (pause_tx, pause_rx) = unbounded();
        let worker_channel = Arc::clone(&channel);
        let pause_worker = thread::spawn(move || {
            debounce_pauses(pause_rx, worker_channel, pause_debounce);
        });

        // Not joined on drop. Exits once the wake sender is gone.
        let pending_input = Arc::new(Mutex::new(None));
        let (input_wake, wake_rx) = bounded(1);
        let worker_pending = Arc::clone(&pending_input);
        let worker_channel = Arc::clone(&channel);
        thread::spawn(move || {
            forward_inputs(wake_rx, worker_pending, worker_channel);
        });

        Self {
            channel,
            allowed_origin,
            pause_tx,
            pause_worker: Some(pause_worker),
            pending_input,
            input_wake,
            on_completion: Mutex::new(None),
        }
    }

    /// The guest has attached its listener. Pause changes are held back until then.
    pub fn guest_ready(&self) {
        info!("Guest document ready");
        let _ = self.pause_tx.send(PauseCommand::GuestReady);
    }

    /// Only the last value inside the debounce window reaches the guest.
    pub fn send_pause(&self, paused: bool) {
        debug!("Pause requested: {paused}");
        let _ = self.pause_tx.send(PauseCommand::Pause(paused));
    }

    /// Never blocks on the guest. A signal that has not been posted yet is
    /// replaced by the newer one.
    pub fn send_input(&self, signal: ControlSignal) {
        *self
            .pending_input
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(signal);
        // Full means a wake-up is already queued.
        let _ = self.input_wake.try_send(());
    }

    /// Drops an input that has not been posted yet.
    pub fn discard_pending_input(&self) {
        self.pending_input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn send_report(&self, report: &Report) {
        info!("Sending report \"{}\" to guest", report.archetype);
        post(
            self.channel.as_ref(),
            &BridgeMessage::ReportGenerated(report.clone()),
        );
    }

    /// Replaces any previously registered handler.
    pub fn on_completion<F>(&self, handler: F)
    where
        F: Fn(Telemetry) + Send + Sync + 'static,
    {
        let mut slot = self.on_completion.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(handler));
    }

    /// Entry point for everything the guest sends.
    /// Anything that is not a well-formed completion from the allowed origin is dropped.
    pub fn handle_incoming(&self, origin: Option<&str>, raw: &str) {
        if let Some(allowed) = &self.allowed_origin {
            if origin != Some(allowed.as_str()) {
                warn!("Dropping guest message from unexpected origin {:?}", origin);
                return;
            }
        }

        let msg = match BridgeMessage::parse(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Ignoring guest message: {e}");
                return;
            }
        };

        match msg {
            BridgeMessage::GameOver(telemetry) => {
                info!("Guest reported completion");
                let handler = self
                    .on_completion
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match handler {
                    Some(handler) => handler(telemetry),
                    None => warn!("Completion received but no handler is registered"),
                }
            }
            other => warn!("Ignoring {} sent by the guest", other.kind()),
        }
    }
}

impl Drop for HostBridge {
    fn drop(&mut self) {
        let _ = self.pause_tx.send(PauseCommand::Shutdown);
        if let Some(worker) = self.pause_worker.take() {
            let _ = worker.join();
        }
    }
}

fn post(channel: &dyn GuestChannel, msg: &BridgeMessage) {
    let line = match msg.to_json() {
        Ok(line) => line,
        Err(e) => {
            warn!("Failed to encode {}: {e}", msg.kind());
            return;
        }
    };
    if let Err(e) = channel.post(&line) {
        warn!("Failed to send {} to guest: {e}", msg.kind());
    }
}

fn forward_inputs(
    wake: Receiver<()>,
    pending: Arc<Mutex<Option<ControlSignal>>>,
    channel: Arc<dyn GuestChannel>,
) {
    while wake.recv().is_ok() {
        let signal = pending.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(signal) = signal {
            post(
                channel.as_ref(),
                &BridgeMessage::InputUpdate {
                    x: signal.x,
                    active: signal.active,
                },
            );
        }
    }
}

/// Holds the latest pause value and flushes it once no change has arrived
/// for `window`, counted from the later of the last change and guest readiness.
fn debounce_pauses(rx: Receiver<PauseCommand>, channel: Arc<dyn GuestChannel>, window: Duration) {
    let mut ready = false;
    let mut pending: Option<bool> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        let command = match deadline {
            Some(at) => match rx.recv_deadline(at) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => return,
            },
        };

        match command {
            Some(PauseCommand::Pause(paused)) => {
                pending = Some(paused);
                if ready {
                    deadline = Some(Instant::now() + window);
                }
            }
            Some(PauseCommand::GuestReady) => {
                ready = true;
                if pending.is_some() {
                    deadline = Some(Instant::now() + window);
                }
            }
            Some(PauseCommand::Shutdown) => return,
            None => {
                deadline = None;
                if let Some(paused) = pending.take() {
                    post(channel.as_ref(), &BridgeMessage::PauseGame { paused });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WINDOW: Duration = Duration::from_millis(40);

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl GuestChannel for Recording {
        fn post(&self, message: &str) -> io::Result<()> {
            self.0.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    impl Recording {
        fn messages(&self) -> Vec<BridgeMessage> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|l| BridgeMessage::parse(l).unwrap())
                .collect()
        }
    }

    fn bridge(origin: Option<&str>) -> (HostBridge, Arc<Recording>) {
        let channel = Arc::new(Recording::default());
        let bridge = HostBridge::new(channel.clone(), WINDOW, origin.map(String::from));
        (bridge, channel)
    }

    const GAME_OVER: &str = r#"{"type":"GAME_OVER","payload":{"metrics":{"inst":1,"net":2,"acad":3,"hist":4,"disc":5},"timeline":[],"artifacts":{"t1":0,"t2":0,"t3":0}}}"#;

    #[test]
    fn only_final_pause_value_is_delivered() {
        let (bridge, channel) = bridge(None);
        bridge.guest_ready();
        bridge.send_pause(true);
        bridge.send_pause(false);
        thread::sleep(WINDOW * 4);

        assert_eq!(channel.messages(), vec![BridgeMessage::PauseGame { paused: false }]);
    }

    #[test]
    fn pause_waits_for_guest_readiness() {
        let (bridge, channel) = bridge(None);
        bridge.send_pause(true);
        thread::sleep(WINDOW * 3);
        assert!(channel.messages().is_empty());

        bridge.guest_ready();
        thread::sleep(WINDOW * 3);
        assert_eq!(channel.messages(), vec![BridgeMessage::PauseGame { paused: true }]);
    }

    #[test]
    fn separated_pauses_are_both_delivered() {
        let (bridge, channel) = bridge(None);
        bridge.guest_ready();
        bridge.send_pause(true);
        thread::sleep(WINDOW * 4);
        bridge.send_pause(false);
        thread::sleep(WINDOW * 4);

        assert_eq!(
            channel.messages(),
            vec![
                BridgeMessage::PauseGame { paused: true },
                BridgeMessage::PauseGame { paused: false },
            ]
        );
    }

    fn wait_for(channel: &Recording, n: usize) {
        for _ in 0..500 {
            if channel.messages().len() >= n {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("guest never received {n} messages");
    }

    #[test]
    fn latest_input_wins() {
        let (bridge, channel) = bridge(None);
        bridge.send_input(ControlSignal::new(0.5, true));
        wait_for(&channel, 1);
        assert_eq!(
            channel.messages(),
            vec![BridgeMessage::InputUpdate { x: 0.5, active: true }]
        );

        bridge.send_input(ControlSignal::new(0.1, true));
        bridge.send_input(ControlSignal::new(0.2, true));
        bridge.send_input(ControlSignal::NEUTRAL);
        for _ in 0..500 {
            if channel.messages().last()
                == Some(&BridgeMessage::InputUpdate { x: 0.0, active: false })
            {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let messages = channel.messages();
        assert_eq!(
            messages.last(),
            Some(&BridgeMessage::InputUpdate { x: 0.0, active: false })
        );
        assert!(messages.len() <= 4);
    }

    struct Stalled {
        posts: AtomicUsize,
        release: Receiver<()>,
    }

    impl GuestChannel for Stalled {
        fn post(&self, _message: &str) -> io::Result<()> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            let _ = self.release.recv_timeout(Duration::from_secs(5));
            Ok(())
        }
    }

    #[test]
    fn stalled_guest_does_not_block_senders() {
        let (release_tx, release) = bounded::<()>(0);
        let channel = Arc::new(Stalled {
            posts: AtomicUsize::new(0),
            release,
        });
        let bridge = HostBridge::new(channel.clone(), WINDOW, None);

        bridge.send_input(ControlSignal::new(0.5, true));
        for _ in 0..500 {
            if channel.posts.load(Ordering::SeqCst) == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(channel.posts.load(Ordering::SeqCst), 1);

        let start = Instant::now();
        for i in 0..100 {
            bridge.send_input(ControlSignal::new(i as f32 / 100.0, true));
        }
        bridge.discard_pending_input();
        assert!(start.elapsed() < Duration::from_millis(500));

        drop(release_tx);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(channel.posts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completion_reaches_handler() {
        let (bridge, _) = bridge(None);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        bridge.on_completion(move |telemetry| {
            assert_eq!(telemetry.metrics.disc, 5);
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        bridge.handle_incoming(None, GAME_OVER);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unrecognized_guest_messages_are_ignored() {
        let (bridge, _) = bridge(None);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        bridge.on_completion(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        bridge.handle_incoming(None, r#"{"type":"PAUSE_GAME","payload":{"paused":true}}"#);
        bridge.handle_incoming(None, r#"{"type":"GAME_OVER","payload":{"metrics":"all"}}"#);
        bridge.handle_incoming(None, "<script>");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn origin_is_enforced_when_configured() {
        let (bridge, _) = bridge(Some("https://guest.example"));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        bridge.on_completion(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        bridge.handle_incoming(None, GAME_OVER);
        bridge.handle_incoming(Some("https://evil.example"), GAME_OVER);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        bridge.handle_incoming(Some("https://guest.example"), GAME_OVER);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct Broken;

    impl GuestChannel for Broken {
        fn post(&self, _message: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "guest gone"))
        }
    }

    #[test]
    fn send_failures_do_not_propagate() {
        let bridge = HostBridge::new(Arc::new(Broken), WINDOW, None);
        bridge.send_input(ControlSignal::new(-0.2, true));
        bridge.send_report(&Report {
            archetype: "A".into(),
            r#match: "B".into(),
            narrative: "C".into(),
        });
    }
}
