//! Capture lifecycle: open, negotiate, map, stream, convert.
//!
//! [`CaptureDevice`] drives a [`Driver`] through a fixed sequence of
//! requests and hands each captured buffer to a [`Scaler`]:
//!
//! ```text
//! Closed -> Opened -> FormatSet -> BuffersMapped -> Streaming <-> Stopped -> Closed
//! ```
//!
//! Every ring buffer is owned either by the driver (queued) or by the
//! application (dequeued). A buffer is only read while the application owns
//! it, and it goes back to the driver before `read_frame` returns.

use std::io;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::config::CaptureConfig;
use crate::convert::BicubicScaler;
use crate::device::V4L2Driver;
use crate::error::{Error, FormatStage, Result};
use crate::picture::{Picture, SourceFrame};
use crate::traits::{
    DeviceCapabilities, Driver, Format, FormatDescription, FrameMetadata, ScaleParams, Scaler,
};

/// Lifecycle state of a [`CaptureDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No device node open.
    Closed,
    /// Node open, capabilities checked.
    Opened,
    /// Format negotiated.
    FormatSet,
    /// Ring allocated and mapped.
    BuffersMapped,
    /// Capture running.
    Streaming,
    /// Capture stopped; buffers still mapped.
    Stopped,
}

/// Who may touch a ring buffer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwner {
    /// Queued; the hardware may write into it.
    Driver,
    /// Dequeued or never queued; safe to read.
    Application,
}

struct RingSlot<M> {
    memory: M,
    length: u32,
    owner: BufferOwner,
}

/// V4L2 capture device with the default bicubic scaler.
pub type V4L2Capture = CaptureDevice<V4L2Driver, BicubicScaler>;

/// A capture device driving one [`Driver`] and one [`Scaler`].
pub struct CaptureDevice<D: Driver, S: Scaler = BicubicScaler> {
    driver: D,
    scaler: S,
    config: CaptureConfig,
    state: DeviceState,
    capabilities: Option<DeviceCapabilities>,
    formats: Vec<FormatDescription>,
    format: Option<Format>,
    width: u32,
    height: u32,
    ring: Vec<RingSlot<D::Memory>>,
}

impl V4L2Capture {
    /// Create a V4L2 capture device with the given configuration.
    #[must_use]
    pub fn new(config: CaptureConfig) -> Self {
        Self::with_driver(V4L2Driver::new(), BicubicScaler, config)
    }
}

impl<D: Driver, S: Scaler> CaptureDevice<D, S> {
    /// Create a capture device around an injected driver and scaler.
    pub const fn with_driver(driver: D, scaler: S, config: CaptureConfig) -> Self {
        Self {
            driver,
            scaler,
            config,
            state: DeviceState::Closed,
            capabilities: None,
            formats: Vec::new(),
            format: None,
            width: 0,
            height: 0,
            ring: Vec::new(),
        }
    }

    /// Open `path`, check capabilities, negotiate `width` x `height` and map
    /// the buffer ring.
    ///
    /// On failure the node is closed again and the device is back in
    /// [`DeviceState::Closed`].
    pub fn init_dev<P: AsRef<Path>>(&mut self, path: P, width: u32, height: u32) -> Result<()> {
        self.require("init_dev", &[DeviceState::Closed])?;
        self.config.validate()?;

        let path = path.as_ref();
        self.driver.open(path).map_err(|source| {
            error!(path = %path.display(), error = %source, "cannot open device");
            Error::Open {
                path: path.to_path_buf(),
                source,
            }
        })?;
        self.state = DeviceState::Opened;
        info!(path = %path.display(), "device opened");

        let result = self.setup(width, height);
        if result.is_err() {
            // Never streaming here, so teardown cannot fail.
            self.teardown().ok();
        }
        result
    }

    fn setup(&mut self, width: u32, height: u32) -> Result<()> {
        let caps = self.driver.query_caps().map_err(|err| {
            error!(error = %err, "cannot get capability");
            Error::Capability(err.to_string())
        })?;
        if !caps.can_capture {
            error!(card = %caps.card, "device cannot capture video");
            return Err(Error::Capability(format!(
                "{} does not support video capture",
                caps.card
            )));
        }
        debug!(driver = %caps.driver, card = %caps.card, bus = %caps.bus_info, "capabilities");

        self.formats = self.get_caps()?;

        if !caps.can_stream {
            warn!(card = %caps.card, "device does not report streaming support");
        }
        self.capabilities = Some(caps);

        let format = self.set_size(width, height)?;
        info!(bytes_per_line = format.stride, "negotiated stride");

        self.init_mmap()
    }

    /// Enumerate the pixel formats the driver offers, logging each one.
    pub fn get_caps(&self) -> Result<Vec<FormatDescription>> {
        let formats = self
            .driver
            .enum_formats()
            .map_err(|err| Error::Enumeration(err.to_string()))?;
        for desc in &formats {
            info!(pixelformat = %desc.fourcc, description = %desc.description, "supported format");
        }
        if formats.is_empty() {
            error!("driver reports no pixel formats");
            return Err(Error::Enumeration("no pixel formats reported".to_owned()));
        }
        Ok(formats)
    }

    /// Request `width` x `height` in the configured pixel format and field
    /// order, then read back what the driver actually granted.
    pub fn set_size(&mut self, width: u32, height: u32) -> Result<Format> {
        self.require("set_size", &[DeviceState::Opened, DeviceState::FormatSet])?;

        let requested = Format::new(width, height, self.config.pixel_format)
            .with_field_order(self.config.field_order);
        self.driver.set_format(&requested).map_err(|source| {
            error!(width, height, error = %source, "cannot set format");
            Error::Format {
                stage: FormatStage::Set,
                source,
            }
        })?;

        let format = self.get_size_info()?;
        if format.width != width || format.height != height {
            info!(
                requested_width = width,
                requested_height = height,
                width = format.width,
                height = format.height,
                "driver adjusted frame size"
            );
        }
        self.state = DeviceState::FormatSet;
        Ok(format)
    }

    /// Re-read the format in effect and cache its dimensions.
    pub fn get_size_info(&mut self) -> Result<Format> {
        self.require("get_size_info", &[DeviceState::Opened, DeviceState::FormatSet])?;

        let format = self.driver.get_format().map_err(|source| {
            error!(error = %source, "cannot get format");
            Error::Format {
                stage: FormatStage::Get,
                source,
            }
        })?;
        self.width = format.width;
        self.height = format.height;
        self.format = Some(format.clone());
        Ok(format)
    }

    /// Allocate and map the buffer ring.
    ///
    /// Any failure unmaps whatever was already mapped and releases the
    /// driver's allocation, leaving the device in [`DeviceState::FormatSet`].
    pub fn init_mmap(&mut self) -> Result<()> {
        self.require("init_mmap", &[DeviceState::FormatSet])?;

        let count = self.config.buffer_count;
        let granted = self.driver.request_buffers(count).map_err(|err| {
            if err.kind() == io::ErrorKind::InvalidInput {
                error!("device does not support memory mapping");
                Error::UnsupportedMemoryModel
            } else {
                error!(error = %err, "VIDIOC_REQBUFS failed");
                Error::Buffer(format!("buffer request failed: {err}"))
            }
        })?;
        if granted != count {
            self.release_buffers();
            error!(requested = count, granted, "driver granted a different buffer count");
            return Err(Error::Buffer(format!(
                "requested {count} buffers, driver granted {granted}"
            )));
        }

        match self.map_ring(count) {
            Ok(ring) => {
                self.ring = ring;
                self.state = DeviceState::BuffersMapped;
                info!(buffers = count, "buffers mapped");
                Ok(())
            }
            Err(err) => {
                self.release_buffers();
                Err(err)
            }
        }
    }

    fn map_ring(&mut self, count: u32) -> Result<Vec<RingSlot<D::Memory>>> {
        // Slots mapped so far are unmapped when `ring` drops on an early return.
        let mut ring = Vec::with_capacity(count as usize);
        for index in 0..count {
            let info = self.driver.query_buffer(index).map_err(|err| {
                error!(index, error = %err, "VIDIOC_QUERYBUF failed");
                Error::Buffer(format!("query of buffer {index} failed: {err}"))
            })?;
            if info.length == 0 {
                error!(index, "driver reported a zero-length buffer");
                return Err(Error::Map {
                    index,
                    reason: "zero length".to_owned(),
                });
            }
            let memory = self.driver.map_buffer(&info).map_err(|err| {
                error!(index, error = %err, "mmap failed");
                Error::Map {
                    index,
                    reason: err.to_string(),
                }
            })?;
            ring.push(RingSlot {
                memory,
                length: info.length,
                owner: BufferOwner::Application,
            });
        }
        Ok(ring)
    }

    fn release_buffers(&mut self) {
        self.ring.clear();
        if let Err(err) = self.driver.request_buffers(0) {
            warn!(error = %err, "failed to release driver buffers");
        }
    }

    /// Hand every buffer to the driver and switch streaming on.
    ///
    /// Buffers queued before a failure stay driver-owned; `stop_stream` or a
    /// retried `start_stream` reclaims them.
    pub fn start_stream(&mut self) -> Result<()> {
        self.require("start_stream", &[DeviceState::BuffersMapped, DeviceState::Stopped])?;

        for (index, slot) in (0u32..).zip(self.ring.iter_mut()) {
            if slot.owner == BufferOwner::Driver {
                continue;
            }
            self.driver.queue(index).map_err(|err| {
                error!(index, error = %err, "VIDIOC_QBUF failed");
                Error::StreamStart(err)
            })?;
            slot.owner = BufferOwner::Driver;
        }

        self.driver.stream_on().map_err(|err| {
            error!(error = %err, "VIDIOC_STREAMON failed");
            Error::StreamStart(err)
        })?;
        self.state = DeviceState::Streaming;
        info!("stream on");
        Ok(())
    }

    /// Switch streaming off. All buffers return to the application.
    ///
    /// Also accepted after a failed `start_stream` left buffers queued, to
    /// take them back without streaming ever starting.
    pub fn stop_stream(&mut self) -> Result<()> {
        let partial_start =
            matches!(self.state, DeviceState::BuffersMapped | DeviceState::Stopped)
                && self.driver_owned_count() > 0;
        if !partial_start {
            self.require("stop_stream", &[DeviceState::Streaming])?;
        }

        self.driver.stream_off().map_err(|err| {
            error!(error = %err, "VIDIOC_STREAMOFF failed");
            Error::StreamStop(err)
        })?;
        for slot in &mut self.ring {
            slot.owner = BufferOwner::Application;
        }
        self.state = DeviceState::Stopped;
        info!("stream off");
        Ok(())
    }

    /// Dequeue a captured frame, convert it into `dst` and requeue the buffer.
    ///
    /// The destination's pixel format, width and height select the
    /// conversion target. Blocks until a frame is ready or the configured
    /// dequeue timeout expires.
    pub fn read_frame(&mut self, dst: &mut Picture) -> Result<FrameMetadata> {
        let buf = self
            .driver
            .dequeue(self.config.dequeue_timeout)
            .map_err(|err| {
                error!(error = %err, "VIDIOC_DQBUF failed");
                Error::Dequeue(err)
            })?;
        let index = buf.index;
        let slot = self.ring.get_mut(index as usize).ok_or_else(|| {
            Error::Dequeue(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("driver returned unknown buffer {index}"),
            ))
        })?;
        slot.owner = BufferOwner::Application;

        let stride = self.format.as_ref().map_or(0, |format| format.stride) as usize;
        let src = SourceFrame::packed(
            slot.memory.as_ref(),
            stride,
            self.width,
            self.height,
            self.config.pixel_format,
        );
        let params = ScaleParams {
            src_width: self.width,
            src_height: self.height,
            src_format: self.config.pixel_format,
            dst_width: dst.width(),
            dst_height: dst.height(),
            dst_format: dst.format(),
            algorithm: self.config.scale_algorithm,
        };
        let converted = self.scaler.scale(&params, &src, dst);
        if let Err(err) = &converted {
            error!(index, error = %err, "cannot convert to destination image");
        }

        // Requeue even after a failed conversion so the ring keeps its size.
        self.driver.queue(index).map_err(|source| {
            error!(index, error = %source, "VIDIOC_QBUF failed, buffer lost until restart");
            Error::Requeue { index, source }
        })?;
        slot.owner = BufferOwner::Driver;
        converted?;

        debug!(index, sequence = buf.sequence, bytes = buf.bytes_used, "frame");
        Ok(FrameMetadata::from(buf))
    }

    /// Stop streaming if needed, unmap the ring and close the node.
    ///
    /// The device ends up [`DeviceState::Closed`] even when stream-off fails;
    /// that failure is still reported.
    pub fn close(&mut self) -> Result<()> {
        if self.state == DeviceState::Closed {
            return Ok(());
        }
        let result = self.teardown();
        info!("device closed");
        result
    }

    fn teardown(&mut self) -> Result<()> {
        let stopped = if self.state == DeviceState::Streaming {
            self.driver.stream_off().map_err(|err| {
                warn!(error = %err, "VIDIOC_STREAMOFF during close failed");
                Error::StreamStop(err)
            })
        } else {
            Ok(())
        };
        if !self.ring.is_empty() {
            self.release_buffers();
        }
        self.driver.close();
        self.state = DeviceState::Closed;
        self.capabilities = None;
        self.formats.clear();
        stopped
    }

    fn require(&self, operation: &'static str, allowed: &[DeviceState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Negotiated width, zero before negotiation.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Negotiated height, zero before negotiation.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Format in effect after the last negotiation.
    pub const fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    /// Lifecycle state.
    pub const fn state(&self) -> DeviceState {
        self.state
    }

    /// Configuration the device was built with.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Capabilities reported when the device was opened.
    pub const fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.capabilities.as_ref()
    }

    /// Formats enumerated when the device was opened.
    pub fn formats(&self) -> &[FormatDescription] {
        &self.formats
    }

    /// Number of mapped ring buffers.
    pub fn buffer_count(&self) -> usize {
        self.ring.len()
    }

    /// Mapped length of each ring buffer.
    pub fn buffer_lengths(&self) -> Vec<u32> {
        self.ring.iter().map(|slot| slot.length).collect()
    }

    /// Owner of ring buffer `index`.
    pub fn owner_of(&self, index: usize) -> Option<BufferOwner> {
        self.ring.get(index).map(|slot| slot.owner)
    }

    /// Number of buffers the driver currently holds.
    pub fn driver_owned_count(&self) -> usize {
        self.ring
            .iter()
            .filter(|slot| slot.owner == BufferOwner::Driver)
            .count()
    }

    /// The injected driver.
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable access to the injected driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

impl<D: Driver, S: Scaler> Drop for CaptureDevice<D, S> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "error while closing capture device");
        }
    }
}
