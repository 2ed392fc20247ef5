//! Capture device traits and the exclusive-ownership guard for the camera.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::frame::VideoFrame;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait CaptureDevice: Send {
    /// Blocks until the next frame is available.
    fn capture(&mut self) -> io::Result<VideoFrame>;
    /// Gives the underlying device handle back to the system.
    fn release(&mut self) {}
    fn get_name(&self) -> String;
}

pub trait CaptureDeviceFactory: Send + Sync {
    fn open(&self, width: u32, height: u32) -> io::Result<Box<dyn CaptureDevice>>;
}

/// Shared claim on one physical camera.
/// Every session that may open the same camera gets a clone of the same slot.
#[derive(Clone, Default)]
pub struct DeviceSlot {
    claimed: Arc<AtomicBool>,
}

impl DeviceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_claim(&self) -> Option<DeviceLease> {
        self.claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| DeviceLease {
                claimed: Arc::clone(&self.claimed),
            })
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

/// Held while a device is open. Dropping it frees the slot.
pub struct DeviceLease {
    claimed: Arc<AtomicBool>,
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.claimed.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_lease_at_a_time() {
        let slot = DeviceSlot::new();
        let other = slot.clone();

        let lease = slot.try_claim().unwrap();
        assert!(other.is_claimed());
        assert!(other.try_claim().is_none());

        drop(lease);
        assert!(!slot.is_claimed());
        assert!(other.try_claim().is_some());
    }

    #[test]
    fn separate_slots_are_independent() {
        let a = DeviceSlot::new();
        let b = DeviceSlot::new();
        let _lease = a.try_claim().unwrap();
        assert!(b.try_claim().is_some());
    }
}
