//! Mock driver implementation for testing without hardware.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use crate::traits::{
    BufferInfo, DequeuedBuffer, DeviceCapabilities, Driver, Format, FormatDescription, FourCC,
};

/// Largest dimension the mock accepts before rejecting a format outright.
const REJECT_ABOVE: u32 = 8192;

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Failure injection switches. Each makes the matching request fail with
/// the errno a real driver would report.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Opening the node fails.
    pub open: bool,
    /// Capability query fails.
    pub query_caps: bool,
    /// Format enumeration fails.
    pub enum_formats: bool,
    /// Set-format fails.
    pub set_format: bool,
    /// Get-format fails.
    pub get_format: bool,
    /// Buffer request fails with EINVAL (no mmap support).
    pub no_mmap: bool,
    /// Buffer request fails with ENOMEM.
    pub request_buffers: bool,
    /// Grant this many buffers instead of the requested count.
    pub grant: Option<u32>,
    /// Buffer query fails for this index.
    pub query_buffer_at: Option<u32>,
    /// Report a zero length for this index.
    pub zero_length_at: Option<u32>,
    /// Mapping fails for this index.
    pub map_at: Option<u32>,
    /// Every enqueue fails.
    pub queue: bool,
    /// Every dequeue fails with EIO.
    pub dequeue: bool,
    /// Stream-on fails.
    pub stream_on: bool,
    /// Stream-off fails.
    pub stream_off: bool,
}

/// Mapped memory handed out by [`MockDriver`].
#[derive(Debug)]
pub struct MockMemory {
    data: Vec<u8>,
    live: Rc<Cell<usize>>,
}

impl AsRef<[u8]> for MockMemory {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for MockMemory {
    fn drop(&mut self) {
        self.live.set(self.live.get().saturating_sub(1));
    }
}

/// Simulated capture driver.
///
/// Clamps requested sizes to a maximum resolution, fills every mapped buffer
/// with a test pattern and tracks which buffers are queued.
#[derive(Debug)]
pub struct MockDriver {
    capabilities: DeviceCapabilities,
    formats: Vec<FormatDescription>,
    max_width: u32,
    max_height: u32,
    pattern: TestPattern,
    /// Failure injection; may be changed between calls.
    pub faults: Faults,

    open: bool,
    format: Format,
    allocated: u32,
    queued: VecDeque<u32>,
    streaming: bool,
    sequence: u32,
    live_mappings: Rc<Cell<usize>>,
    close_count: u32,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create a new mock driver with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            formats: vec![
                FormatDescription {
                    index: 0,
                    fourcc: FourCC::YUYV,
                    description: "YUYV 4:2:2".to_owned(),
                },
                FormatDescription {
                    index: 1,
                    fourcc: FourCC::MJPG,
                    description: "Motion-JPEG".to_owned(),
                },
            ],
            max_width: 1920,
            max_height: 1080,
            pattern: TestPattern::ColorBars,
            faults: Faults::default(),
            open: false,
            format: Format::new(640, 480, FourCC::YUYV),
            allocated: 0,
            queued: VecDeque::new(),
            streaming: false,
            sequence: 0,
            live_mappings: Rc::new(Cell::new(0)),
            close_count: 0,
        }
    }

    /// Set the capabilities for this mock driver.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Replace the advertised format list.
    #[must_use]
    pub fn with_formats(mut self, formats: Vec<FormatDescription>) -> Self {
        self.formats = formats;
        self
    }

    /// Clamp negotiated sizes to this resolution.
    #[must_use]
    pub const fn with_max_resolution(mut self, width: u32, height: u32) -> Self {
        self.max_width = width;
        self.max_height = height;
        self
    }

    /// Set the test pattern buffers are filled with.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Set the failure injection switches.
    #[must_use]
    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// Whether the node is open.
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Whether capture is on.
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Buffers currently held by the driver.
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Buffers allocated by the last request.
    pub const fn allocated(&self) -> u32 {
        self.allocated
    }

    /// Mappings handed out and not yet dropped.
    pub fn live_mappings(&self) -> usize {
        self.live_mappings.get()
    }

    /// How many times the node was closed.
    pub const fn close_count(&self) -> u32 {
        self.close_count
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(errno(libc::EBADF))
        }
    }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

impl Driver for MockDriver {
    type Memory = MockMemory;

    fn open(&mut self, _path: &Path) -> io::Result<()> {
        if self.faults.open {
            return Err(errno(libc::ENOENT));
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.close_count += 1;
        }
        self.open = false;
        self.streaming = false;
        self.queued.clear();
    }

    fn query_caps(&self) -> io::Result<DeviceCapabilities> {
        self.ensure_open()?;
        if self.faults.query_caps {
            return Err(errno(libc::ENOTTY));
        }
        Ok(self.capabilities.clone())
    }

    fn enum_formats(&self) -> io::Result<Vec<FormatDescription>> {
        self.ensure_open()?;
        if self.faults.enum_formats {
            return Err(errno(libc::ENOTTY));
        }
        Ok(self.formats.clone())
    }

    fn set_format(&mut self, format: &Format) -> io::Result<()> {
        self.ensure_open()?;
        if self.faults.set_format || self.allocated > 0 {
            return Err(errno(libc::EBUSY));
        }
        if format.width == 0
            || format.height == 0
            || format.width > REJECT_ABOVE
            || format.height > REJECT_ABOVE
        {
            return Err(errno(libc::EINVAL));
        }

        // Drivers round to what the hardware supports.
        let width = format.width.min(self.max_width) & !1;
        let height = format.height.min(self.max_height);
        let fourcc = self
            .formats
            .iter()
            .find(|desc| desc.fourcc == format.fourcc)
            .or_else(|| self.formats.first())
            .map_or(format.fourcc, |desc| desc.fourcc);

        self.format = Format::new(width, height, fourcc).with_field_order(format.field_order);
        Ok(())
    }

    fn get_format(&self) -> io::Result<Format> {
        self.ensure_open()?;
        if self.faults.get_format {
            return Err(errno(libc::EINVAL));
        }
        Ok(self.format.clone())
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.ensure_open()?;
        if self.streaming {
            return Err(errno(libc::EBUSY));
        }
        if count == 0 {
            self.allocated = 0;
            self.queued.clear();
            return Ok(0);
        }
        if self.faults.no_mmap {
            return Err(errno(libc::EINVAL));
        }
        if self.faults.request_buffers {
            return Err(errno(libc::ENOMEM));
        }
        self.allocated = self.faults.grant.unwrap_or(count);
        Ok(self.allocated)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo> {
        self.ensure_open()?;
        if index >= self.allocated || self.faults.query_buffer_at == Some(index) {
            return Err(errno(libc::EINVAL));
        }
        let length = if self.faults.zero_length_at == Some(index) {
            0
        } else {
            self.format.size
        };
        Ok(BufferInfo {
            index,
            length,
            offset: index * self.format.size,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<MockMemory> {
        self.ensure_open()?;
        if info.length == 0 || self.faults.map_at == Some(info.index) {
            return Err(errno(libc::EINVAL));
        }
        let mut data = generate_test_frame(&self.format, self.pattern);
        data.resize(info.length as usize, 0);
        self.live_mappings.set(self.live_mappings.get() + 1);
        Ok(MockMemory {
            data,
            live: Rc::clone(&self.live_mappings),
        })
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        self.ensure_open()?;
        if self.faults.queue || index >= self.allocated || self.queued.contains(&index) {
            return Err(errno(libc::EINVAL));
        }
        self.queued.push_back(index);
        Ok(())
    }

    fn dequeue(&mut self, timeout: Option<Duration>) -> io::Result<DequeuedBuffer> {
        self.ensure_open()?;
        if !self.streaming {
            return Err(errno(libc::EINVAL));
        }
        if self.faults.dequeue {
            return Err(errno(libc::EIO));
        }
        let Some(index) = self.queued.pop_front() else {
            // A real driver would block forever here.
            return Err(match timeout {
                Some(_) => io::Error::new(io::ErrorKind::TimedOut, "no frame ready before timeout"),
                None => errno(libc::EAGAIN),
            });
        };

        let sequence = self.sequence;
        self.sequence += 1;
        Ok(DequeuedBuffer {
            index,
            bytes_used: self.format.size,
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        if self.faults.stream_on || self.allocated == 0 {
            return Err(errno(libc::EINVAL));
        }
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        if self.faults.stream_off {
            return Err(errno(libc::EINVAL));
        }
        self.streaming = false;
        self.queued.clear();
        Ok(())
    }
}

/// Generate test frame data based on pattern.
pub fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => {
            generate_color_bars(&mut data, format.width, format.height);
        }
        TestPattern::Gradient => {
            generate_gradient(&mut data, format.width, format.height);
        }
        TestPattern::Solid(y, u, v) => {
            generate_solid(&mut data, y, u, v);
        }
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if let Some(quad) = data.get_mut(offset..offset + 4) {
                quad.copy_from_slice(&[y_val, u_val, y_val, v_val]);
            }
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;

            if let Some(quad) = data.get_mut(offset..offset + 4) {
                quad.copy_from_slice(&[y_val, 128, y_val, 128]);
            }
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for quad in data.chunks_exact_mut(4) {
        quad.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> MockDriver {
        let mut driver = MockDriver::new();
        driver.open(Path::new("/dev/video0")).expect("open should succeed");
        driver
    }

    #[test]
    fn test_mock_driver_creation() {
        let driver = opened();
        let caps = driver.query_caps().expect("query_caps should succeed");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);
    }

    #[test]
    fn test_mock_requires_open() {
        let driver = MockDriver::new();
        let err = driver.query_caps().expect_err("closed driver");
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn test_mock_format_adjustment() {
        let mut driver = opened().with_max_resolution(1280, 720);
        driver
            .set_format(&Format::new(1919, 1080, FourCC::YUYV))
            .expect("set_format should succeed");
        let actual = driver.get_format().expect("get_format should succeed");
        assert_eq!(actual.width, 1280);
        assert_eq!(actual.height, 720);
        assert_eq!(actual.stride, 2560);

        driver
            .set_format(&Format::new(641, 480, FourCC::new(b"NV12")))
            .expect("set_format should succeed");
        let actual = driver.get_format().expect("get_format should succeed");
        assert_eq!(actual.width, 640);
        assert_eq!(actual.fourcc, FourCC::YUYV);

        let giant = driver.set_format(&Format::new(100_000, 100_000, FourCC::YUYV));
        assert_eq!(giant.expect_err("too large").raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn test_mock_ring_ownership() {
        let mut driver = opened();
        assert_eq!(driver.request_buffers(4).expect("reqbufs"), 4);
        for idx in 0..4 {
            driver.queue(idx).expect("queue should succeed");
        }
        assert!(driver.queue(0).is_err(), "double queue must fail");
        assert!(driver.queue(4).is_err(), "out of range must fail");

        assert!(driver.dequeue(None).is_err(), "not streaming yet");
        driver.stream_on().expect("stream_on should succeed");

        let first = driver.dequeue(None).expect("dequeue should succeed");
        assert_eq!(first.index, 0);
        assert_eq!(first.sequence, 0);
        assert_eq!(driver.queued_count(), 3);

        let second = driver.dequeue(None).expect("dequeue should succeed");
        assert_eq!(second.sequence, 1);

        driver.stream_off().expect("stream_off should succeed");
        assert_eq!(driver.queued_count(), 0);
    }

    #[test]
    fn test_mock_dequeue_empty_queue() {
        let mut driver = opened();
        driver.request_buffers(1).expect("reqbufs");
        driver.stream_on().expect("stream_on");
        let err = driver.dequeue(Some(Duration::from_millis(5))).expect_err("empty");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_mock_mapping_lifetime() {
        let mut driver = opened();
        driver.request_buffers(2).expect("reqbufs");
        let info = driver.query_buffer(0).expect("querybuf");
        let memory = driver.map_buffer(&info).expect("map");
        assert_eq!(memory.as_ref().len(), info.length as usize);
        assert_eq!(driver.live_mappings(), 1);
        drop(memory);
        assert_eq!(driver.live_mappings(), 0);
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        // Check frame size
        assert_eq!(data.len(), (640 * 480 * 2) as usize);

        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data[0] < 10);

        // Right edge should be bright (check last row, last pixel)
        let last_row_start = (479 * 640 * 2) as usize;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));

        assert_eq!(data[0], 128);
        assert_eq!(data[2], 128);
        assert_eq!(data[1], 64);
        assert_eq!(data[3], 192);
    }
}
