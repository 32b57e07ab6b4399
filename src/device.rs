//! V4L2 driver implementation using the v4l crate.
//!
//! Capability, format enumeration and format negotiation go through the
//! v4l crate's safe API. The buffer ring is driven with raw
//! `VIDIOC_REQBUFS`/`QUERYBUF`/`QBUF`/`DQBUF` ioctls so that every ownership
//! transfer is visible to [`CaptureDevice`](crate::capture::CaptureDevice).

#![allow(unsafe_code)]

use std::io;
use std::mem;
use std::os::raw::{c_int, c_void};
use std::path::Path;
use std::ptr::{self, NonNull};
use std::slice;
use std::time::Duration;

use v4l::buffer::Type;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    BufferInfo, DequeuedBuffer, DeviceCapabilities, Driver, Format, FormatDescription, FourCC,
};

/// V4L2 driver wrapping a device node.
#[derive(Default)]
pub struct V4L2Driver {
    device: Option<Device>,
}

impl V4L2Driver {
    /// Create a driver with no device node open.
    #[must_use]
    pub const fn new() -> Self {
        Self { device: None }
    }

    fn device(&self) -> io::Result<&Device> {
        self.device
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device is not open"))
    }

    fn fd(&self) -> io::Result<c_int> {
        Ok(self.device()?.handle().fd())
    }

    fn buffer_desc(index: u32) -> v4l2_buffer {
        // SAFETY: v4l2_buffer is a plain C struct; all-zero is a valid value.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.index = index;
        buf.type_ = Type::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf
    }

    fn set_streaming(&self, on: bool) -> io::Result<()> {
        let fd = self.fd()?;
        let request = if on {
            v4l2::vidioc::VIDIOC_STREAMON
        } else {
            v4l2::vidioc::VIDIOC_STREAMOFF
        };
        let mut typ = Type::VideoCapture as u32;
        // SAFETY: STREAMON/STREAMOFF read a single u32 buffer type.
        unsafe { v4l2::ioctl(fd, request, ptr::addr_of_mut!(typ).cast::<c_void>()) }
    }
}

impl Driver for V4L2Driver {
    type Memory = MappedBuffer;

    fn open(&mut self, path: &Path) -> io::Result<()> {
        self.device = Some(Device::with_path(path)?);
        Ok(())
    }

    fn close(&mut self) {
        self.device = None;
    }

    fn query_caps(&self) -> io::Result<DeviceCapabilities> {
        let caps = self.device()?.query_caps()?;

        Ok(DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        })
    }

    fn enum_formats(&self) -> io::Result<Vec<FormatDescription>> {
        let formats = self.device()?.enum_formats()?;

        Ok(formats
            .into_iter()
            .map(|desc| FormatDescription {
                index: desc.index,
                fourcc: FourCC::from(desc.fourcc),
                description: desc.description,
            })
            .collect())
    }

    fn set_format(&mut self, format: &Format) -> io::Result<()> {
        let mut fmt = v4l::Format::new(format.width, format.height, format.fourcc.into());
        fmt.field_order = format.field_order.into();

        self.device()?.set_format(&fmt)?;
        Ok(())
    }

    fn get_format(&self) -> io::Result<Format> {
        let fmt = self.device()?.format()?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            field_order: fmt.field_order.into(),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let fd = self.fd()?;
        // SAFETY: v4l2_requestbuffers is a plain C struct; all-zero is valid.
        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = Type::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;

        // SAFETY: req outlives the call and matches the VIDIOC_REQBUFS layout.
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_REQBUFS,
                ptr::addr_of_mut!(req).cast::<c_void>(),
            )?;
        }
        Ok(req.count)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo> {
        let fd = self.fd()?;
        let mut buf = Self::buffer_desc(index);

        // SAFETY: buf outlives the call and matches the VIDIOC_QUERYBUF layout.
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_QUERYBUF,
                ptr::addr_of_mut!(buf).cast::<c_void>(),
            )?;
        }

        Ok(BufferInfo {
            index,
            length: buf.length,
            // SAFETY: for MMAP buffers the driver fills the `offset` member.
            offset: unsafe { buf.m.offset },
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<MappedBuffer> {
        let fd = self.fd()?;
        let len = info.length as usize;
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "driver reported a zero-length buffer",
            ));
        }

        // SAFETY: maps a driver-provided offset; the result is checked below.
        #[allow(clippy::cast_possible_wrap)]
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                info.offset as libc::off_t,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))?;
        Ok(MappedBuffer { ptr, len })
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        let fd = self.fd()?;
        let mut buf = Self::buffer_desc(index);

        // SAFETY: buf outlives the call and matches the VIDIOC_QBUF layout.
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_QBUF,
                ptr::addr_of_mut!(buf).cast::<c_void>(),
            )
        }
    }

    fn dequeue(&mut self, timeout: Option<Duration>) -> io::Result<DequeuedBuffer> {
        let fd = self.fd()?;

        // The node may be non-blocking, so wait for readiness explicitly.
        let timeout_ms = poll_timeout(timeout);
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            // SAFETY: pollfd is a single valid entry.
            let ready = unsafe { libc::poll(ptr::addr_of_mut!(pollfd), 1, timeout_ms) };
            match ready {
                -1 => {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(err);
                }
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no frame ready before timeout",
                    ));
                }
                _ => break,
            }
        }

        let mut buf = Self::buffer_desc(0);
        // SAFETY: buf outlives the call and matches the VIDIOC_DQBUF layout.
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_DQBUF,
                ptr::addr_of_mut!(buf).cast::<c_void>(),
            )?;
        }

        // V4L2 timestamps are non-negative in practice
        let secs = u64::try_from(buf.timestamp.tv_sec).unwrap_or(0);
        let micros = u32::try_from(buf.timestamp.tv_usec).unwrap_or(0);

        Ok(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            timestamp: Duration::new(secs, micros.saturating_mul(1000)),
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.set_streaming(true)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.set_streaming(false)
    }
}

/// `poll` timeout in milliseconds, rounded up so short waits still wait.
/// `-1` blocks indefinitely.
fn poll_timeout(timeout: Option<Duration>) -> c_int {
    timeout.map_or(-1, |t| {
        c_int::try_from(t.as_micros().div_ceil(1000)).unwrap_or(c_int::MAX)
    })
}

/// A kernel buffer mapped into the process. Unmapped on drop.
#[derive(Debug)]
pub struct MappedBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl AsRef<[u8]> for MappedBuffer {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live mapping owned by self.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        // SAFETY: the region was returned by mmap with this length.
        let ret = unsafe { libc::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) };
        if ret == -1 {
            tracing::warn!(
                len = self.len,
                error = %io::Error::last_os_error(),
                "munmap failed"
            );
        }
    }
}
