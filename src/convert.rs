//! Colorspace conversion and scaling of packed 4:2:2 captures.
//!
//! Frames are unpacked to 8-bit RGB with the ITU-R BT.601 matrix, resized
//! with the `image` crate when the destination size differs, then packed
//! into the destination format.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::{Error, Result};
use crate::picture::{Picture, PixelFormat, SourceFrame};
use crate::traits::{FourCC, ScaleAlgorithm, ScaleParams, Scaler};

/// Default [`Scaler`]: bicubic unless the parameters ask otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct BicubicScaler;

impl Scaler for BicubicScaler {
    fn scale(
        &mut self,
        params: &ScaleParams,
        src: &SourceFrame<'_>,
        dst: &mut Picture,
    ) -> Result<()> {
        // One context per frame; nothing carries over between calls.
        let context = ScaleContext::new(params)?;
        context.run(src, dst)
    }
}

/// Byte order of a packed 4:2:2 macropixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackedOrder {
    Yuyv,
    Uyvy,
}

impl PackedOrder {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match fourcc {
            FourCC::YUYV => Some(Self::Yuyv),
            FourCC::UYVY => Some(Self::Uyvy),
            _ => None,
        }
    }

    /// Returns `(y0, u, y1, v)`.
    fn split(self, quad: &[u8]) -> (u8, u8, u8, u8) {
        match (self, quad) {
            (Self::Yuyv, [y0, u, y1, v, ..]) => (*y0, *u, *y1, *v),
            (Self::Uyvy, [u, y0, v, y1, ..]) => (*y0, *u, *y1, *v),
            _ => (0, 128, 0, 128),
        }
    }
}

const fn filter_for(algorithm: ScaleAlgorithm) -> FilterType {
    match algorithm {
        ScaleAlgorithm::Bicubic => FilterType::CatmullRom,
        ScaleAlgorithm::Bilinear => FilterType::Triangle,
        ScaleAlgorithm::Nearest => FilterType::Nearest,
    }
}

struct ScaleContext {
    params: ScaleParams,
    order: PackedOrder,
}

impl ScaleContext {
    fn new(params: &ScaleParams) -> Result<Self> {
        if params.src_width == 0 || params.src_height == 0 {
            return Err(Error::Conversion(format!(
                "empty source {}x{}",
                params.src_width, params.src_height
            )));
        }
        if params.dst_width == 0 || params.dst_height == 0 {
            return Err(Error::Conversion(format!(
                "empty destination {}x{}",
                params.dst_width, params.dst_height
            )));
        }
        let order = PackedOrder::from_fourcc(params.src_format).ok_or_else(|| {
            Error::Conversion(format!("unsupported source format {}", params.src_format))
        })?;
        Ok(Self {
            params: *params,
            order,
        })
    }

    fn run(&self, src: &SourceFrame<'_>, dst: &mut Picture) -> Result<()> {
        self.check_source(src)?;
        self.check_destination(dst)?;

        if self.is_passthrough() {
            return copy_packed(src, dst);
        }

        let rgb = self.unpack(src)?;
        let rgb = if self.same_size() {
            rgb
        } else {
            imageops::resize(
                &rgb,
                self.params.dst_width,
                self.params.dst_height,
                filter_for(self.params.algorithm),
            )
        };
        pack(&rgb, dst)
    }

    const fn same_size(&self) -> bool {
        self.params.src_width == self.params.dst_width
            && self.params.src_height == self.params.dst_height
    }

    fn is_passthrough(&self) -> bool {
        self.same_size()
            && self.order == PackedOrder::Yuyv
            && self.params.dst_format == PixelFormat::Yuyv422
    }

    fn check_source(&self, src: &SourceFrame<'_>) -> Result<()> {
        if src.width() != self.params.src_width || src.height() != self.params.src_height {
            return Err(Error::Conversion(format!(
                "source is {}x{}, context expects {}x{}",
                src.width(),
                src.height(),
                self.params.src_width,
                self.params.src_height
            )));
        }
        if src.fourcc() != self.params.src_format {
            return Err(Error::Conversion(format!(
                "source is {}, context expects {}",
                src.fourcc(),
                self.params.src_format
            )));
        }
        let row_bytes = packed_row_bytes(src.width());
        let stride = src.linesize(0);
        if stride < row_bytes {
            return Err(Error::Conversion(format!(
                "source stride {stride} shorter than {row_bytes}"
            )));
        }
        let needed = stride * (src.height() as usize - 1) + row_bytes;
        if src.plane(0).len() < needed {
            return Err(Error::Conversion(format!(
                "source buffer holds {} bytes, needs {needed}",
                src.plane(0).len()
            )));
        }
        Ok(())
    }

    fn check_destination(&self, dst: &Picture) -> Result<()> {
        if dst.format() != self.params.dst_format
            || dst.width() != self.params.dst_width
            || dst.height() != self.params.dst_height
        {
            return Err(Error::Conversion(format!(
                "destination is {:?} {}x{}, context expects {:?} {}x{}",
                dst.format(),
                dst.width(),
                dst.height(),
                self.params.dst_format,
                self.params.dst_width,
                self.params.dst_height
            )));
        }
        dst.check_geometry()
    }

    fn unpack(&self, src: &SourceFrame<'_>) -> Result<RgbImage> {
        let width = src.width() as usize;
        let row_bytes = packed_row_bytes(src.width());
        let stride = src.linesize(0);
        let plane = src.plane(0);

        let mut out = vec![0u8; width * src.height() as usize * 3];
        for (y, out_row) in out.chunks_exact_mut(width * 3).enumerate() {
            let start = y * stride;
            let row = plane
                .get(start..start + row_bytes)
                .ok_or_else(|| Error::Conversion(format!("source row {y} out of bounds")))?;

            for (quad, px) in row.chunks_exact(4).zip(out_row.chunks_mut(6)) {
                let (y0, u, y1, v) = self.order.split(quad);
                if let Some(first) = px.get_mut(..3) {
                    first.copy_from_slice(&yuv_to_rgb(y0, u, v));
                }
                if let Some(second) = px.get_mut(3..6) {
                    second.copy_from_slice(&yuv_to_rgb(y1, u, v));
                }
            }
        }

        RgbImage::from_raw(src.width(), src.height(), out)
            .ok_or_else(|| Error::Conversion("unpacked buffer size mismatch".to_owned()))
    }
}

const fn packed_row_bytes(width: u32) -> usize {
    (width as usize).div_ceil(2) * 4
}

fn copy_packed(src: &SourceFrame<'_>, dst: &mut Picture) -> Result<()> {
    let row_bytes = packed_row_bytes(src.width());
    let stride = src.linesize(0);
    let plane = dst
        .plane_mut(0)
        .ok_or_else(|| Error::Conversion("destination has no plane 0".to_owned()))?;

    for y in 0..src.height() as usize {
        let start = y * stride;
        let src_row = src
            .plane(0)
            .get(start..start + row_bytes)
            .ok_or_else(|| Error::Conversion(format!("source row {y} out of bounds")))?;
        let dst_row = plane
            .row_mut(y)
            .and_then(|row| row.get_mut(..row_bytes))
            .ok_or_else(|| Error::Conversion(format!("destination row {y} out of bounds")))?;
        dst_row.copy_from_slice(src_row);
    }
    Ok(())
}

fn pack(rgb: &RgbImage, dst: &mut Picture) -> Result<()> {
    match dst.format() {
        PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Rgba | PixelFormat::Gray8 => {
            pack_interleaved(rgb, dst)
        }
        PixelFormat::Yuyv422 => pack_yuyv(rgb, dst),
        PixelFormat::Yuv420p => pack_yuv420p(rgb, dst),
    }
}

fn pack_interleaved(rgb: &RgbImage, dst: &mut Picture) -> Result<()> {
    let format = dst.format();
    let bytes_per_pixel = match format {
        PixelFormat::Rgba => 4,
        PixelFormat::Gray8 => 1,
        _ => 3,
    };
    let row_len = rgb.width() as usize * 3;
    let plane = dst
        .plane_mut(0)
        .ok_or_else(|| Error::Conversion("destination has no plane 0".to_owned()))?;

    for (y, src_row) in rgb.as_raw().chunks_exact(row_len).enumerate() {
        let dst_row = plane
            .row_mut(y)
            .ok_or_else(|| Error::Conversion(format!("destination row {y} out of bounds")))?;
        let pixels = src_row
            .chunks_exact(3)
            .zip(dst_row.chunks_exact_mut(bytes_per_pixel));
        for (src_px, dst_px) in pixels {
            let [r, g, b] = triple(src_px);
            match format {
                PixelFormat::Bgr24 => dst_px.copy_from_slice(&[b, g, r]),
                PixelFormat::Rgba => dst_px.copy_from_slice(&[r, g, b, u8::MAX]),
                PixelFormat::Gray8 => dst_px.copy_from_slice(&[clamp_u8(rgb_to_yuv(r, g, b)[0])]),
                _ => dst_px.copy_from_slice(&[r, g, b]),
            }
        }
    }
    Ok(())
}

fn pack_yuyv(rgb: &RgbImage, dst: &mut Picture) -> Result<()> {
    let row_len = rgb.width() as usize * 3;
    let plane = dst
        .plane_mut(0)
        .ok_or_else(|| Error::Conversion("destination has no plane 0".to_owned()))?;

    for (y, src_row) in rgb.as_raw().chunks_exact(row_len).enumerate() {
        let dst_row = plane
            .row_mut(y)
            .ok_or_else(|| Error::Conversion(format!("destination row {y} out of bounds")))?;
        for (pair, quad) in src_row.chunks(6).zip(dst_row.chunks_exact_mut(4)) {
            let [r0, g0, b0] = triple(pair);
            let [y0, u0, v0] = rgb_to_yuv(r0, g0, b0);
            // An odd trailing pixel is duplicated into the second slot.
            let [y1, u1, v1] = match pair.get(3..) {
                Some(rest) if rest.len() >= 3 => {
                    let [r1, g1, b1] = triple(rest);
                    rgb_to_yuv(r1, g1, b1)
                }
                _ => [y0, u0, v0],
            };
            quad.copy_from_slice(&[
                clamp_u8(y0),
                clamp_u8((u0 + u1) / 2.0),
                clamp_u8(y1),
                clamp_u8((v0 + v1) / 2.0),
            ]);
        }
    }
    Ok(())
}

fn pack_yuv420p(rgb: &RgbImage, dst: &mut Picture) -> Result<()> {
    let (width, height) = rgb.dimensions();
    let row_len = width as usize * 3;

    let luma = dst
        .plane_mut(0)
        .ok_or_else(|| Error::Conversion("destination has no luma plane".to_owned()))?;
    for (y, src_row) in rgb.as_raw().chunks_exact(row_len).enumerate() {
        let dst_row = luma
            .row_mut(y)
            .ok_or_else(|| Error::Conversion(format!("luma row {y} out of bounds")))?;
        for (src_px, dst_px) in src_row.chunks_exact(3).zip(dst_row.iter_mut()) {
            let [r, g, b] = triple(src_px);
            *dst_px = clamp_u8(rgb_to_yuv(r, g, b)[0]);
        }
    }

    let chroma_w = width.div_ceil(2);
    let chroma_h = height.div_ceil(2);
    let mut u_rows = Vec::with_capacity(chroma_h as usize);
    let mut v_rows = Vec::with_capacity(chroma_h as usize);
    for cy in 0..chroma_h {
        let mut u_row = Vec::with_capacity(chroma_w as usize);
        let mut v_row = Vec::with_capacity(chroma_w as usize);
        for cx in 0..chroma_w {
            let (mut u_sum, mut v_sum, mut count) = (0.0f32, 0.0f32, 0.0f32);
            for y in (cy * 2)..(cy * 2 + 2).min(height) {
                for x in (cx * 2)..(cx * 2 + 2).min(width) {
                    let [r, g, b] = rgb.get_pixel(x, y).0;
                    let [_, u, v] = rgb_to_yuv(r, g, b);
                    u_sum += u;
                    v_sum += v;
                    count += 1.0;
                }
            }
            u_row.push(clamp_u8(u_sum / count));
            v_row.push(clamp_u8(v_sum / count));
        }
        u_rows.push(u_row);
        v_rows.push(v_row);
    }

    for (plane_idx, rows) in [(1, u_rows), (2, v_rows)] {
        let plane = dst
            .plane_mut(plane_idx)
            .ok_or_else(|| Error::Conversion(format!("destination has no plane {plane_idx}")))?;
        for (y, values) in rows.iter().enumerate() {
            let dst_row = plane
                .row_mut(y)
                .and_then(|row| row.get_mut(..values.len()))
                .ok_or_else(|| {
                    Error::Conversion(format!("plane {plane_idx} row {y} out of bounds"))
                })?;
            dst_row.copy_from_slice(values);
        }
    }
    Ok(())
}

fn triple(px: &[u8]) -> [u8; 3] {
    match px {
        [r, g, b, ..] => [*r, *g, *b],
        _ => [0; 3],
    }
}

#[allow(clippy::cast_sign_loss)]
fn clamp_u8(val: f32) -> u8 {
    val.round().clamp(0.0, 255.0) as u8
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula.
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

/// Inverse of [`yuv_to_rgb`], unrounded.
#[allow(clippy::many_single_char_names)]
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> [f32; 3] {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let y = 0.114f32.mul_add(b, 0.587f32.mul_add(g, 0.299 * r));
    let u = 0.5f32.mul_add(b, (-0.331_264f32).mul_add(g, -0.168_736 * r)) + 128.0;
    let v = (-0.081_312f32).mul_add(b, (-0.418_688f32).mul_add(g, 0.5 * r)) + 128.0;
    [y, u, v]
}
