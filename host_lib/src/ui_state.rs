//! SPDX-License-Identifier: GPL-3.0-or-later

/// UI state owned by the host shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostUIState {
    pub loading: bool,
    pub primary_modal_open: bool,
    pub secondary_modal_open: bool,
}

impl HostUIState {
    /// The shell starts out waiting for the guest document.
    pub fn initial() -> Self {
        Self {
            loading: true,
            ..Default::default()
        }
    }

    pub fn modal_open(&self) -> bool {
        self.primary_modal_open || self.secondary_modal_open
    }

    pub fn compute_pause_flag(&self) -> bool {
        self.loading || self.modal_open()
    }

    pub fn should_track(&self) -> bool {
        !self.loading && !self.modal_open()
    }
}
