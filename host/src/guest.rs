//! Line-delimited JSON connection to the guest.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use handsteer_host_lib::bridge::{GuestChannel, HostBridge};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest guest line that is parsed. Longer lines are skipped.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

// A guest that stops reading costs at most this much per message.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TcpGuestChannel {
    stream: Mutex<TcpStream>,
}

impl TcpGuestChannel {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        Ok(Self {
            stream: Mutex::new(stream),
        })
    }
}

impl GuestChannel for TcpGuestChannel {
    fn post(&self, message: &str) -> io::Result<()> {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        stream.write_all(message.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()
    }
}

/// Messages are tagged with the peer's address as their origin,
/// e.g. `tcp://127.0.0.1`.
pub fn origin_of(stream: &TcpStream) -> io::Result<String> {
    Ok(format!("tcp://{}", stream.peer_addr()?.ip()))
}

enum GuestLine {
    Text(String),
    Skipped(&'static str),
}

/// Reads one line of at most `MAX_LINE_BYTES`. None on EOF.
fn next_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<GuestLine>> {
    buf.clear();
    let read = reader
        .by_ref()
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', buf)?;
    if read == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_LINE_BYTES {
        discard_line(reader)?;
        return Ok(Some(GuestLine::Skipped("line too long")));
    }

    match String::from_utf8(std::mem::take(buf)) {
        Ok(line) => Ok(Some(GuestLine::Text(line))),
        Err(_) => Ok(Some(GuestLine::Skipped("not UTF-8"))),
    }
}

/// Drops everything up to and including the next newline.
fn discard_line<R: BufRead>(reader: &mut R) -> io::Result<()> {
    loop {
        let (done, used) = {
            let available = reader.fill_buf()?;
            match available.iter().position(|b| *b == b'\n') {
                Some(i) => (true, i + 1),
                None => (available.is_empty(), available.len()),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

/// Feeds every line the guest sends into the bridge until the guest
/// disconnects. Lines that can't be read as text are skipped.
pub fn spawn_reader(stream: TcpStream, bridge: Arc<HostBridge>) -> io::Result<JoinHandle<()>> {
    let origin = origin_of(&stream)?;
    Ok(thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            match next_line(&mut reader, &mut buf) {
                Ok(None) => break,
                Ok(Some(GuestLine::Text(line))) if line.trim().is_empty() => continue,
                Ok(Some(GuestLine::Text(line))) => bridge.handle_incoming(Some(&origin), &line),
                Ok(Some(GuestLine::Skipped(reason))) => {
                    warn!("Skipping guest line: {reason}");
                }
                Err(e) => {
                    warn!("Guest connection failed: {e}");
                    break;
                }
            }
        }
        info!("Guest disconnected");
    }))
}
