//! Capture configuration

use std::time::Duration;

use crate::error::{Error, Result};
use crate::traits::{FieldOrder, FourCC, ScaleAlgorithm};

/// Upper bound on the ring size; V4L2 itself caps mmap buffers at 32.
pub const MAX_BUFFER_COUNT: u32 = 32;

/// Fixed parameters of a capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Pixel format requested from the driver.
    pub pixel_format: FourCC,

    /// Field order requested from the driver.
    pub field_order: FieldOrder,

    /// Number of kernel buffers in the ring.
    pub buffer_count: u32,

    /// How long `read_frame` waits for a filled buffer.
    /// `None` blocks until the driver produces one.
    pub dequeue_timeout: Option<Duration>,

    /// Interpolation used by the conversion step.
    pub scale_algorithm: ScaleAlgorithm,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pixel_format: FourCC::YUYV,
            field_order: FieldOrder::Interlaced,
            buffer_count: 4,
            dequeue_timeout: None,
            scale_algorithm: ScaleAlgorithm::Bicubic,
        }
    }
}

impl CaptureConfig {
    /// Set the requested pixel format.
    #[must_use]
    pub const fn with_pixel_format(mut self, pixel_format: FourCC) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    /// Set the requested field order.
    #[must_use]
    pub const fn with_field_order(mut self, field_order: FieldOrder) -> Self {
        self.field_order = field_order;
        self
    }

    /// Set the ring size.
    #[must_use]
    pub const fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    /// Bound the wait for a filled buffer.
    #[must_use]
    pub const fn with_dequeue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    /// Set the scaling algorithm.
    #[must_use]
    pub const fn with_scale_algorithm(mut self, algorithm: ScaleAlgorithm) -> Self {
        self.scale_algorithm = algorithm;
        self
    }

    /// Check that the configuration describes a usable ring.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_count == 0 || self.buffer_count > MAX_BUFFER_COUNT {
            return Err(Error::Config(format!(
                "buffer_count must be between 1 and {MAX_BUFFER_COUNT}, got {}",
                self.buffer_count
            )));
        }
        if self.dequeue_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(Error::Config(
                "dequeue_timeout must be non-zero when set".to_owned(),
            ));
        }
        Ok(())
    }
}
