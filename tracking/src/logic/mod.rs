//! SPDX-License-Identifier: GPL-3.0-or-later

mod fsm;
pub mod session;
pub mod states;
pub mod trace;
