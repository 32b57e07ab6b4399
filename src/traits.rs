//! Core traits and types for the capture driver and scaler seams.

use std::io;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::picture::{Picture, PixelFormat, SourceFrame};

/// Pixel format representation (e.g., YUYV, UYVY, MJPG).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// UYVY pixel format (4:2:2 packed, chroma first).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");

    /// Little-endian `u32` code as used by the kernel.
    #[must_use]
    pub const fn code(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            let ch = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            };
            write!(f, "{ch}")?;
        }
        Ok(())
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Field order of the captured image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldOrder {
    /// Let the driver choose.
    Any,
    /// Progressive frames.
    Progressive,
    /// Both fields interleaved line by line.
    #[default]
    Interlaced,
    /// Top field only.
    Top,
    /// Bottom field only.
    Bottom,
}

impl From<v4l::format::FieldOrder> for FieldOrder {
    fn from(order: v4l::format::FieldOrder) -> Self {
        use v4l::format::FieldOrder as V4l;
        match order {
            V4l::Progressive => Self::Progressive,
            V4l::Interlaced => Self::Interlaced,
            V4l::Top => Self::Top,
            V4l::Bottom => Self::Bottom,
            _ => Self::Any,
        }
    }
}

impl From<FieldOrder> for v4l::format::FieldOrder {
    fn from(order: FieldOrder) -> Self {
        match order {
            FieldOrder::Any => Self::Any,
            FieldOrder::Progressive => Self::Progressive,
            FieldOrder::Interlaced => Self::Interlaced,
            FieldOrder::Top => Self::Top,
            FieldOrder::Bottom => Self::Bottom,
        }
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Field order.
    pub field_order: FieldOrder,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format specification for a packed 4:2:2 image.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        // Saturate so oversized requests reach the driver and get rejected there.
        let stride = width.saturating_mul(2);
        let size = stride.saturating_mul(height);
        Self {
            width,
            height,
            fourcc,
            field_order: FieldOrder::Interlaced,
            stride,
            size,
        }
    }

    /// Set the requested field order.
    #[must_use]
    pub const fn with_field_order(mut self, field_order: FieldOrder) -> Self {
        self.field_order = field_order;
        self
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// One entry of the driver's pixel format list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    /// Position in the driver's list.
    pub index: u32,
    /// Pixel format code.
    pub fourcc: FourCC,
    /// Human-readable description reported by the driver.
    pub description: String,
}

/// Kernel-assigned placement of one ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Ring index.
    pub index: u32,
    /// Length of the buffer in bytes.
    pub length: u32,
    /// Offset to pass to mmap.
    pub offset: u32,
}

/// A buffer the driver handed back with a captured frame in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Ring index.
    pub index: u32,
    /// Bytes of the buffer holding image data.
    pub bytes_used: u32,
    /// Driver frame counter.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
    /// Ring index the frame was captured into.
    pub buffer_index: u32,
}

impl From<DequeuedBuffer> for FrameMetadata {
    fn from(buf: DequeuedBuffer) -> Self {
        Self {
            sequence: buf.sequence,
            timestamp: buf.timestamp,
            bytes_used: buf.bytes_used,
            buffer_index: buf.index,
        }
    }
}

/// Request/response exchanges with a capture driver.
///
/// Every method maps onto one driver request. Errors are plain
/// [`io::Error`]s carrying the driver's errno; the capture layer decides
/// what each failure means.
pub trait Driver {
    /// A mapped buffer region. Dropping it unmaps the region.
    type Memory: AsRef<[u8]>;

    /// Open the device node read-write.
    fn open(&mut self, path: &Path) -> io::Result<()>;

    /// Close the device node. Closing a closed driver is a no-op.
    fn close(&mut self);

    /// Query capability flags.
    fn query_caps(&self) -> io::Result<DeviceCapabilities>;

    /// List every capture pixel format the driver offers.
    fn enum_formats(&self) -> io::Result<Vec<FormatDescription>>;

    /// Request a format. The driver may adjust the values.
    fn set_format(&mut self, format: &Format) -> io::Result<()>;

    /// Read back the format in effect.
    fn get_format(&self) -> io::Result<Format>;

    /// Ask for `count` mmap buffers. Returns the count granted.
    ///
    /// An [`io::ErrorKind::InvalidInput`] error means the driver does not
    /// support memory-mapped I/O. A count of 0 releases the allocation.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Query length and mmap offset of a buffer.
    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo>;

    /// Map a queried buffer into the process.
    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Self::Memory>;

    /// Hand a buffer to the driver for filling.
    fn queue(&mut self, index: u32) -> io::Result<()>;

    /// Take a filled buffer from the driver, waiting at most `timeout`
    /// (forever when `None`).
    fn dequeue(&mut self, timeout: Option<Duration>) -> io::Result<DequeuedBuffer>;

    /// Start capturing.
    fn stream_on(&mut self) -> io::Result<()>;

    /// Stop capturing. All queued buffers return to the application.
    fn stream_off(&mut self) -> io::Result<()>;
}

/// Interpolation used when source and destination sizes differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleAlgorithm {
    /// Cubic (Catmull-Rom) interpolation.
    #[default]
    Bicubic,
    /// Linear interpolation.
    Bilinear,
    /// Nearest neighbour.
    Nearest,
}

/// Parameters a scaling context is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleParams {
    /// Source width in pixels.
    pub src_width: u32,
    /// Source height in pixels.
    pub src_height: u32,
    /// Source pixel format.
    pub src_format: FourCC,
    /// Destination width in pixels.
    pub dst_width: u32,
    /// Destination height in pixels.
    pub dst_height: u32,
    /// Destination pixel format.
    pub dst_format: PixelFormat,
    /// Interpolation algorithm.
    pub algorithm: ScaleAlgorithm,
}

/// Colorspace conversion and scaling.
pub trait Scaler {
    /// Convert `src` into `dst` according to `params`.
    fn scale(&mut self, params: &ScaleParams, src: &SourceFrame<'_>, dst: &mut Picture)
        -> Result<()>;
}
