//! v4l2-capture: V4L2 memory-mapped capture with per-frame conversion
//!
//! [`CaptureDevice`] opens a capture node, negotiates a format, maps a fixed
//! ring of kernel buffers and converts every captured frame into a
//! caller-owned [`Picture`]. The driver and the scaler are injected traits,
//! enabling both production use with real hardware and testing with mock
//! devices.

pub mod capture;
pub mod config;
pub mod convert;
pub mod device;
pub mod error;
pub mod logging;
pub mod picture;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use capture::{BufferOwner, CaptureDevice, DeviceState, V4L2Capture};
pub use config::CaptureConfig;
pub use convert::BicubicScaler;
pub use device::V4L2Driver;
pub use error::{Error, Result};
pub use picture::{Picture, PixelFormat, Plane, SourceFrame};
pub use traits::{
    DeviceCapabilities, Driver, FieldOrder, Format, FormatDescription, FourCC, FrameMetadata,
    ScaleAlgorithm, ScaleParams, Scaler,
};
