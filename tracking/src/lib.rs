//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod camera;
pub mod capability;
pub mod config;
pub mod frame;
pub mod logic;
pub mod normalize;
pub mod overlay;

pub use camera::{CaptureDevice, CaptureDeviceFactory, DeviceLease, DeviceSlot};
pub use capability::{
    CapabilityFactory, CapabilityLoader, CapabilityModule, HandEngine, HttpModuleFetcher,
    LoadError, ModuleFetcher, VisionCapability, VisionOptions,
};
pub use frame::{Detection, HandFrame, Landmark, VideoFrame};
pub use logic::session::{FrameSink, TrackingError, TrackingSession};
pub use logic::states::TrackingState;
pub use logic::trace::TraceRun;
pub use normalize::{normalize, ControlSignal};
pub use overlay::Overlay;
