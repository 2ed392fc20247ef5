//! Handsteer host.
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

#[macro_use]
extern crate log;

#[macro_use]
extern crate serde_derive;

use anyhow::Context;
use docopt::Docopt;
use handsteer_host_lib::bridge::HostBridge;
use handsteer_host_lib::config::HostConfig;
use handsteer_host_lib::http_client::GenerativeClient;
use handsteer_host_lib::report::ReportRequester;
use handsteer_host_lib::shell::HostShell;
use handsteer_host_lib::ui_state::HostUIState;
use handsteer_tracking::config::MODULE_FETCH_TIMEOUT_SECS;
use handsteer_tracking::{CapabilityLoader, DeviceSlot, HttpModuleFetcher, TraceRun, TrackingSession};
use std::io::{self, BufRead};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

mod guest;
use crate::guest::{spawn_reader, TcpGuestChannel};
mod replay;
use crate::replay::{load_detections, ReplayFactory, SyntheticCameras};

const USAGE: &str = "
Handsteer host: steers a sandboxed guest game with hand gestures and asks a text-generation service for a career report when the game ends.

Usage:
  handsteer-host --config=<file> [--replay=<file>] [--trace]
  handsteer-host (--version | -v)
  handsteer-host (--help | -h)

Options:
    --config=<file>     Host configuration (YAML)
    --replay=<file>     Replay recorded hand detections (JSON lines) instead of a live engine
    --trace             Write a JSON-lines trace under output/runs/
    --version, -v       Show version
    --help, -h          Show help

Commands on stdin:
    loaded              The guest finished loading
    menu                Open the main menu
    modal               Open the secondary dialog
    close               Close all menus and dialogs
    overlay on|off      Toggle the diagnostic overlay
    snapshot <file>     Save the overlay as an image
    status              Print tracking state and the last steering input
    quit                Exit
";

#[derive(Debug, Clone, Deserialize)]
struct Args {
    flag_config: String,
    flag_replay: Option<String>,
    flag_trace: bool,
}

#[derive(Debug, PartialEq)]
enum Command {
    Loaded,
    Menu,
    Modal,
    Close,
    Overlay(bool),
    Snapshot(String),
    Status,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match (words.next()?, words.next()) {
            ("loaded", None) => Command::Loaded,
            ("menu", None) => Command::Menu,
            ("modal", None) => Command::Modal,
            ("close", None) => Command::Close,
            ("overlay", Some("on")) => Command::Overlay(true),
            ("overlay", Some("off")) => Command::Overlay(false),
            ("snapshot", Some(path)) => Command::Snapshot(path.to_string()),
            ("status", None) => Command::Status,
            ("quit", None) => Command::Quit,
            _ => return None,
        };
        match words.next() {
            Some(_) => None,
            None => Some(command),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_NAME").to_string() + ", version: " + env!("CARGO_PKG_VERSION");
    env_logger::init();

    let args: Args = Docopt::new(USAGE)
        .map(|d| d.help(true))
        .map(|d| d.version(Some(version)))
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let config = HostConfig::load(Path::new(&args.flag_config))
        .with_context(|| format!("loading {}", args.flag_config))?;

    let detections = match &args.flag_replay {
        Some(path) => Some(load_detections(Path::new(path))?),
        None => None,
    };

    let trace = TraceRun::new(args.flag_trace)?;
    if args.flag_trace {
        info!("Tracing to output/runs/{}", trace.run_id);
    }

    let stream = TcpStream::connect(&config.guest.addr)
        .with_context(|| format!("connecting to guest at {}", config.guest.addr))?;
    info!("Connected to guest at {}", config.guest.addr);

    let bridge = Arc::new(HostBridge::new(
        Arc::new(TcpGuestChannel::new(stream.try_clone()?)?),
        Duration::from_millis(config.guest.pause_debounce_ms),
        config.guest.origin.clone(),
    ));
    spawn_reader(stream, Arc::clone(&bridge))?;

    let api_key = HostConfig::api_key();
    if api_key.is_none() {
        warn!("No API key set, reports will use the fallback text");
    }
    let generator = Arc::new(GenerativeClient::new(&config.report, api_key));

    let session = TrackingSession::new(Box::new(SyntheticCameras), DeviceSlot::new()).with_trace(trace);
    let mut shell = HostShell::new(bridge, session, ReportRequester::new(generator));

    let loader = CapabilityLoader::new(
        Box::new(HttpModuleFetcher::new(Duration::from_secs(MODULE_FETCH_TIMEOUT_SECS))?),
        Box::new(ReplayFactory::new(detections)),
    );
    shell.initialize_tracking(&loader, &config.tracking.capability_urls);

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = Command::parse(&line) else {
            println!("Unknown command: {}", line.trim());
            continue;
        };

        let ui = shell.ui_state();
        match command {
            Command::Loaded => shell.guest_ready(),
            Command::Menu => shell.set_ui_state(HostUIState {
                primary_modal_open: true,
                ..ui
            }),
            Command::Modal => shell.set_ui_state(HostUIState {
                secondary_modal_open: true,
                ..ui
            }),
            Command::Close => shell.set_ui_state(HostUIState {
                primary_modal_open: false,
                secondary_modal_open: false,
                ..ui
            }),
            Command::Overlay(enabled) => shell.set_overlay_enabled(enabled),
            Command::Snapshot(path) => {
                match shell.with_overlay(|overlay| overlay.canvas().save(&path)) {
                    Ok(()) => println!("Saved overlay to {path}"),
                    Err(e) => println!("Failed to save overlay: {e}"),
                }
            }
            Command::Status => {
                let signal = shell.last_signal();
                println!(
                    "tracking: {}, input: x={:.2} active={}, report in flight: {}",
                    shell.tracking_state(),
                    signal.x,
                    signal.active,
                    shell.report_in_flight()
                );
            }
            Command::Quit => break,
        }
    }

    shell.shutdown();
    Ok(())
}
