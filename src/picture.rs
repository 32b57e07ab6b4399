//! Frame descriptors handed to the conversion step.
//!
//! A [`Picture`] is a caller-owned destination with up to [`MAX_PLANES`]
//! planes, each with its own line stride. A [`SourceFrame`] borrows the
//! memory of a dequeued kernel buffer for the duration of one conversion.

use crate::error::{Error, Result};
use crate::traits::FourCC;

/// Maximum number of planes a frame descriptor carries.
pub const MAX_PLANES: usize = 8;

/// Destination pixel formats the conversion step can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B.
    Rgb24,
    /// Packed 8-bit B, G, R.
    Bgr24,
    /// Packed 8-bit R, G, B, A with opaque alpha.
    Rgba,
    /// 8-bit luma only.
    Gray8,
    /// Packed Y0 U Y1 V, 4:2:2.
    Yuyv422,
    /// Planar Y, U, V with 2x2 subsampled chroma.
    Yuv420p,
}

impl PixelFormat {
    /// Number of planes of this format.
    pub const fn plane_count(self) -> usize {
        match self {
            Self::Yuv420p => 3,
            _ => 1,
        }
    }

    /// Minimum row length in bytes and row count of `plane` for an image
    /// of `width` x `height`.
    pub const fn plane_geometry(
        self,
        plane: usize,
        width: u32,
        height: u32,
    ) -> Option<(usize, usize)> {
        let w = width as usize;
        let h = height as usize;
        let chroma_w = w.div_ceil(2);
        let chroma_h = h.div_ceil(2);
        match (self, plane) {
            (Self::Rgb24 | Self::Bgr24, 0) => Some((w * 3, h)),
            (Self::Rgba, 0) => Some((w * 4, h)),
            (Self::Gray8, 0) => Some((w, h)),
            (Self::Yuyv422, 0) => Some((chroma_w * 4, h)),
            (Self::Yuv420p, 0) => Some((w, h)),
            (Self::Yuv420p, 1 | 2) => Some((chroma_w, chroma_h)),
            _ => None,
        }
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rgb24" | "rgb" => Ok(Self::Rgb24),
            "bgr24" | "bgr" => Ok(Self::Bgr24),
            "rgba" => Ok(Self::Rgba),
            "gray8" | "gray" => Ok(Self::Gray8),
            "yuyv422" | "yuyv" => Ok(Self::Yuyv422),
            "yuv420p" | "i420" => Ok(Self::Yuv420p),
            other => Err(Error::Config(format!("unknown pixel format '{other}'"))),
        }
    }
}

/// One plane of a destination picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    data: Vec<u8>,
    stride: usize,
}

impl Plane {
    /// Allocate a zeroed plane of `rows` lines of `stride` bytes.
    #[must_use]
    pub fn new(stride: usize, rows: usize) -> Self {
        Self {
            data: vec![0; stride * rows],
            stride,
        }
    }

    /// Wrap existing memory with the given line stride.
    #[must_use]
    pub const fn from_vec(data: Vec<u8>, stride: usize) -> Self {
        Self { data, stride }
    }

    /// Plane bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable plane bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes per line.
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Line `y`, `stride` bytes long (shorter for a truncated last line).
    pub fn row(&self, y: usize) -> Option<&[u8]> {
        let start = y.checked_mul(self.stride)?;
        let end = (start + self.stride).min(self.data.len());
        self.data.get(start..end)
    }

    /// Mutable line `y`.
    pub fn row_mut(&mut self, y: usize) -> Option<&mut [u8]> {
        let start = y.checked_mul(self.stride)?;
        let end = (start + self.stride).min(self.data.len());
        self.data.get_mut(start..end)
    }
}

/// Caller-owned destination frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    format: PixelFormat,
    width: u32,
    height: u32,
    planes: Vec<Plane>,
}

impl Picture {
    /// Allocate a zeroed picture with tightly packed lines.
    #[must_use]
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        let planes = (0..format.plane_count())
            .filter_map(|idx| format.plane_geometry(idx, width, height))
            .map(|(stride, rows)| Plane::new(stride, rows))
            .collect();
        Self {
            format,
            width,
            height,
            planes,
        }
    }

    /// Allocate a zeroed picture with caller-chosen line strides, one per plane.
    pub fn with_strides(
        format: PixelFormat,
        width: u32,
        height: u32,
        strides: &[usize],
    ) -> Result<Self> {
        if strides.len() != format.plane_count() {
            return Err(Error::Conversion(format!(
                "{format:?} needs {} strides, got {}",
                format.plane_count(),
                strides.len()
            )));
        }
        let planes = strides
            .iter()
            .enumerate()
            .map(|(idx, &stride)| {
                let (_, rows) = format.plane_geometry(idx, width, height).unwrap_or((0, 0));
                Plane::new(stride, rows)
            })
            .collect();
        let picture = Self {
            format,
            width,
            height,
            planes,
        };
        picture.check_geometry()?;
        Ok(picture)
    }

    /// Wrap caller-provided planes.
    pub fn from_planes(
        format: PixelFormat,
        width: u32,
        height: u32,
        planes: Vec<Plane>,
    ) -> Result<Self> {
        if planes.len() > MAX_PLANES {
            return Err(Error::Conversion(format!(
                "at most {MAX_PLANES} planes supported, got {}",
                planes.len()
            )));
        }
        Ok(Self {
            format,
            width,
            height,
            planes,
        })
    }

    /// Pixel format.
    pub const fn format(&self) -> PixelFormat {
        self.format
    }

    /// Width in pixels.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// All planes.
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Plane `idx`.
    pub fn plane(&self, idx: usize) -> Option<&Plane> {
        self.planes.get(idx)
    }

    /// Mutable plane `idx`.
    pub fn plane_mut(&mut self, idx: usize) -> Option<&mut Plane> {
        self.planes.get_mut(idx)
    }

    /// Per-plane strides, zero for unused planes.
    pub fn linesizes(&self) -> [usize; MAX_PLANES] {
        let mut sizes = [0; MAX_PLANES];
        for (size, plane) in sizes.iter_mut().zip(&self.planes) {
            *size = plane.stride;
        }
        sizes
    }

    /// Check that every plane can hold the image its format and size imply.
    pub fn check_geometry(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Conversion(format!(
                "empty destination {}x{}",
                self.width, self.height
            )));
        }
        if self.planes.len() != self.format.plane_count() {
            return Err(Error::Conversion(format!(
                "{:?} needs {} planes, picture has {}",
                self.format,
                self.format.plane_count(),
                self.planes.len()
            )));
        }
        for (idx, plane) in self.planes.iter().enumerate() {
            let (min_stride, rows) = self
                .format
                .plane_geometry(idx, self.width, self.height)
                .unwrap_or((0, 0));
            if plane.stride < min_stride {
                return Err(Error::Conversion(format!(
                    "plane {idx} stride {} shorter than {min_stride}",
                    plane.stride
                )));
            }
            let needed = plane.stride * rows.saturating_sub(1) + min_stride;
            if plane.data.len() < needed {
                return Err(Error::Conversion(format!(
                    "plane {idx} holds {} bytes, needs {needed}",
                    plane.data.len()
                )));
            }
        }
        Ok(())
    }

    /// RGB value of a pixel of a packed RGB-family or gray picture.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let row = self.planes.first()?.row(y as usize)?;
        let x = x as usize;
        match self.format {
            PixelFormat::Rgb24 => {
                let px = row.get(x * 3..x * 3 + 3)?;
                Some((px[0], px[1], px[2]))
            }
            PixelFormat::Bgr24 => {
                let px = row.get(x * 3..x * 3 + 3)?;
                Some((px[2], px[1], px[0]))
            }
            PixelFormat::Rgba => {
                let px = row.get(x * 4..x * 4 + 4)?;
                Some((px[0], px[1], px[2]))
            }
            PixelFormat::Gray8 => row.get(x).map(|&luma| (luma, luma, luma)),
            PixelFormat::Yuyv422 | PixelFormat::Yuv420p => None,
        }
    }
}

/// Borrowed view of a captured frame.
///
/// Only plane 0 is used for packed formats; the remaining planes are empty
/// with a zero stride.
#[derive(Debug, Clone, Copy)]
pub struct SourceFrame<'a> {
    data: [&'a [u8]; MAX_PLANES],
    linesize: [usize; MAX_PLANES],
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl<'a> SourceFrame<'a> {
    /// Describe a single-plane packed frame.
    #[must_use]
    pub fn packed(data: &'a [u8], stride: usize, width: u32, height: u32, fourcc: FourCC) -> Self {
        let mut planes: [&'a [u8]; MAX_PLANES] = [&[]; MAX_PLANES];
        let mut linesize = [0; MAX_PLANES];
        planes[0] = data;
        linesize[0] = stride;
        Self {
            data: planes,
            linesize,
            width,
            height,
            fourcc,
        }
    }

    /// Plane `idx`; empty when unused.
    pub fn plane(&self, idx: usize) -> &'a [u8] {
        self.data.get(idx).copied().unwrap_or_default()
    }

    /// Stride of plane `idx`; zero when unused.
    pub fn linesize(&self, idx: usize) -> usize {
        self.linesize.get(idx).copied().unwrap_or_default()
    }

    /// Width in pixels.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Pixel format.
    pub const fn fourcc(&self) -> FourCC {
        self.fourcc
    }
}
