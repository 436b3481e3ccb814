//! 2D strip transforms: crop, translate, rotate, scale into the render rect.
//!
//! Matrix math happens in Y-up image space (origin at the bottom-left
//! corner), the convention strip offsets and origins are authored in.
//! Buffers are stored top row first, so sampling flips Y on the way in and
//! out:
//!
//! ```text
//! out = translate + pivot + R * S * (src - pivot)
//! ```
//!
//! Sampling walks output pixels and maps their centers back through the
//! inverse matrix (rayon parallel rows).

use glam::{Affine2, Vec2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::frame::{f32_to_u8, Frame, PixelBuffer};

/// Resampling filter for transformed strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFilter {
    Nearest,
    #[default]
    Bilinear,
}

/// Per-strip placement in the output frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StripTransform {
    /// Offset in render pixels, Y-up
    pub offset: [f32; 2],
    pub scale: [f32; 2],
    /// Radians, counter-clockwise
    pub rotation: f32,
    /// Pivot as a fraction of the source size (0.5, 0.5 = center)
    pub origin: [f32; 2],
    pub filter: SampleFilter,
}

impl Default for StripTransform {
    fn default() -> Self {
        Self {
            offset: [0.0, 0.0],
            scale: [1.0, 1.0],
            rotation: 0.0,
            origin: [0.5, 0.5],
            filter: SampleFilter::Bilinear,
        }
    }
}

impl StripTransform {
    /// True when the transform moves pixels (offset, scale or rotation set).
    pub fn is_active(&self) -> bool {
        self.offset != [0.0, 0.0] || self.scale != [1.0, 1.0] || self.rotation != 0.0
    }
}

/// Pixels cut from each source edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StripCrop {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

impl StripCrop {
    pub fn is_active(&self) -> bool {
        self.left != 0 || self.right != 0 || self.top != 0 || self.bottom != 0
    }
}

/// Source-space rectangle (Y-up) outside of which samples are transparent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl CropRect {
    /// Source rect minus `crop` edges, scaled by `crop_scale`.
    pub fn from_crop(crop: &StripCrop, src_size: (usize, usize), crop_scale: f32) -> Self {
        let (w, h) = (src_size.0 as f32, src_size.1 as f32);
        Self {
            xmin: crop.left as f32 * crop_scale,
            ymin: crop.bottom as f32 * crop_scale,
            xmax: w - crop.right as f32 * crop_scale,
            ymax: h - crop.top as f32 * crop_scale,
        }
    }

    #[inline]
    fn contains(&self, p: Vec2) -> bool {
        p.x >= self.xmin && p.x < self.xmax && p.y >= self.ymin && p.y < self.ymax
    }

    fn corners(&self) -> [Vec2; 4] {
        [
            Vec2::new(self.xmin, self.ymin),
            Vec2::new(self.xmax, self.ymin),
            Vec2::new(self.xmax, self.ymax),
            Vec2::new(self.xmin, self.ymax),
        ]
    }
}

/// Forward strip matrix (source -> output), Y-up pixels.
///
/// # Arguments
/// - `image_scale_factor` - extra scale for sources not already at render size
/// - `preview_scale` - render size / scene size, applied to the offset
pub fn build_strip_matrix(
    transform: &StripTransform,
    src_size: (usize, usize),
    out_size: (usize, usize),
    image_scale_factor: f32,
    preview_scale: f32,
) -> Affine2 {
    let input = Vec2::new(src_size.0 as f32, src_size.1 as f32);
    let output = Vec2::new(out_size.0 as f32, out_size.1 as f32);

    let scale = Vec2::from(transform.scale) * image_scale_factor;
    let center_offs = (output - input) * 0.5;
    let translate = Vec2::from(transform.offset) * preview_scale + center_offs;
    let pivot = input * Vec2::from(transform.origin);

    Affine2::from_translation(translate + pivot)
        * Affine2::from_angle(transform.rotation)
        * Affine2::from_scale(scale)
        * Affine2::from_translation(-pivot)
}

/// True when the transformed, cropped source leaves any output corner uncovered.
pub fn transparency_gained(forward: &Affine2, crop: &CropRect, out_size: (usize, usize)) -> bool {
    let quad = crop.corners().map(|c| forward.transform_point2(c));
    let (w, h) = (out_size.0 as f32, out_size.1 as f32);
    let frame = [
        Vec2::new(0.0, 0.0),
        Vec2::new(w, 0.0),
        Vec2::new(w, h),
        Vec2::new(0.0, h),
    ];
    !frame.iter().all(|p| point_in_quad(*p, &quad))
}

/// Point inside a convex quad (either winding), edges included.
fn point_in_quad(p: Vec2, quad: &[Vec2; 4]) -> bool {
    const EPS: f32 = 1e-3;
    let mut sign = 0.0f32;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let cross = (b - a).perp_dot(p - a);
        if cross.abs() <= EPS {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

#[inline]
fn sample_nearest(buffer: &PixelBuffer, width: usize, height: usize, x: f32, y: f32) -> [f32; 4] {
    if x < 0.0 || y < 0.0 || x >= width as f32 || y >= height as f32 {
        return [0.0; 4];
    }
    buffer.pixel(y as usize * width + x as usize)
}

/// Bilinear sample at pixel-center coordinates, edges clamped.
///
/// Returns `[0,0,0,0]` outside bounds.
#[inline]
fn sample_bilinear(buffer: &PixelBuffer, width: usize, height: usize, x: f32, y: f32) -> [f32; 4] {
    if x < 0.0 || y < 0.0 || x >= width as f32 || y >= height as f32 {
        return [0.0; 4];
    }

    let fx = (x - 0.5).max(0.0);
    let fy = (y - 0.5).max(0.0);
    let x0 = (fx.floor() as usize).min(width - 1);
    let y0 = (fy.floor() as usize).min(height - 1);
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let tx = fx - x0 as f32;
    let ty = fy - y0 as f32;

    let c00 = buffer.pixel(y0 * width + x0);
    let c10 = buffer.pixel(y0 * width + x1);
    let c01 = buffer.pixel(y1 * width + x0);
    let c11 = buffer.pixel(y1 * width + x1);

    let mut result = [0.0f32; 4];
    for c in 0..4 {
        let top = c00[c] * (1.0 - tx) + c10[c] * tx;
        let bottom = c01[c] * (1.0 - tx) + c11[c] * tx;
        result[c] = top * (1.0 - ty) + bottom * ty;
    }
    result
}

/// Resample `src` into a new `out_size` frame of the same pixel format.
///
/// `forward` maps source to output (see [`build_strip_matrix`]); samples
/// outside `crop` are transparent. A degenerate matrix (zero scale) yields
/// a fully transparent frame.
pub fn transform_frame(
    src: &Frame,
    out_size: (usize, usize),
    forward: &Affine2,
    crop: &CropRect,
    filter: SampleFilter,
) -> Frame {
    let (dst_w, dst_h) = out_size;
    let (src_w, src_h) = src.resolution();
    let blank = || {
        if src.is_float() {
            Frame::new_float(dst_w, dst_h)
        } else {
            Frame::new(dst_w, dst_h)
        }
    };

    if forward.matrix2.determinant().abs() < f32::EPSILON || src_w == 0 || src_h == 0 {
        return blank();
    }
    let inverse = forward.inverse();
    let buffer = src.buffer();

    let sample = |x: usize, y: usize| -> [f32; 4] {
        // Output pixel center, Y-up
        let out_pt = Vec2::new(x as f32 + 0.5, dst_h as f32 - (y as f32 + 0.5));
        let src_pt = inverse.transform_point2(out_pt);
        if !crop.contains(src_pt) {
            return [0.0; 4];
        }
        let sx = src_pt.x;
        let sy = src_h as f32 - src_pt.y;
        match filter {
            SampleFilter::Nearest => sample_nearest(buffer, src_w, src_h, sx, sy),
            SampleFilter::Bilinear => sample_bilinear(buffer, src_w, src_h, sx, sy),
        }
    };

    match buffer {
        PixelBuffer::F32(_) => {
            let mut dst_buf = vec![0.0f32; dst_w * dst_h * 4];
            dst_buf
                .par_chunks_mut(dst_w.max(1) * 4)
                .enumerate()
                .for_each(|(y, row)| {
                    for x in 0..dst_w {
                        row[x * 4..x * 4 + 4].copy_from_slice(&sample(x, y));
                    }
                });
            Frame::from_f32_buffer(dst_buf, dst_w, dst_h)
        }
        PixelBuffer::U8(_) => {
            let mut dst_buf = vec![0u8; dst_w * dst_h * 4];
            dst_buf
                .par_chunks_mut(dst_w.max(1) * 4)
                .enumerate()
                .for_each(|(y, row)| {
                    for x in 0..dst_w {
                        let color = sample(x, y);
                        for c in 0..4 {
                            row[x * 4 + c] = f32_to_u8(color[c]);
                        }
                    }
                });
            Frame::from_u8_buffer(dst_buf, dst_w, dst_h)
        }
    }
}

/// Nearest-neighbour resize.
pub fn scale_nearest(src: &Frame, width: usize, height: usize) -> Frame {
    let forward = Affine2::from_scale(Vec2::new(
        width as f32 / src.width().max(1) as f32,
        height as f32 / src.height().max(1) as f32,
    ));
    let crop = CropRect::from_crop(&StripCrop::default(), src.resolution(), 1.0);
    let mut out = transform_frame(src, (width, height), &forward, &crop, SampleFilter::Nearest);
    out.set_planes(src.planes());
    out.copy_metadata_from(src);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: usize, h: usize) -> Frame {
        let mut buf = Vec::with_capacity(w * h * 4);
        for y in 0..h {
            for x in 0..w {
                buf.extend_from_slice(&[(x * 10) as u8, (y * 10) as u8, 0, 255]);
            }
        }
        Frame::from_u8_buffer(buf, w, h)
    }

    #[test]
    fn test_identity_is_bit_exact() {
        let src = gradient(6, 4);
        let m = build_strip_matrix(&StripTransform::default(), (6, 4), (6, 4), 1.0, 1.0);
        let crop = CropRect::from_crop(&StripCrop::default(), (6, 4), 1.0);
        for filter in [SampleFilter::Nearest, SampleFilter::Bilinear] {
            let out = transform_frame(&src, (6, 4), &m, &crop, filter);
            assert_eq!(out.to_u8_vec(), src.to_u8_vec());
        }
    }

    /// Positive Y offset moves the image up: the bottom row turns transparent.
    #[test]
    fn test_offset_is_y_up() {
        let src = Frame::solid_f32(4, 4, [1.0, 1.0, 1.0, 1.0]);
        let t = StripTransform {
            offset: [0.0, 1.0],
            filter: SampleFilter::Nearest,
            ..Default::default()
        };
        let m = build_strip_matrix(&t, (4, 4), (4, 4), 1.0, 1.0);
        let crop = CropRect::from_crop(&StripCrop::default(), (4, 4), 1.0);
        let out = transform_frame(&src, (4, 4), &m, &crop, t.filter);
        assert_eq!(out.pixel(0, 0)[3], 1.0);
        assert_eq!(out.pixel(0, 3)[3], 0.0);
        assert!(transparency_gained(&m, &crop, (4, 4)));
    }

    #[test]
    fn test_crop_left_cuts_columns() {
        let src = Frame::solid_u8(4, 2, [255, 255, 255, 255]);
        let crop = StripCrop { left: 1, ..Default::default() };
        let m = build_strip_matrix(&StripTransform::default(), (4, 2), (4, 2), 1.0, 1.0);
        let rect = CropRect::from_crop(&crop, (4, 2), 1.0);
        let out = transform_frame(&src, (4, 2), &m, &rect, SampleFilter::Nearest);
        assert_eq!(out.pixel(0, 0)[3], 0.0);
        assert_eq!(out.pixel(1, 0)[3], 1.0);
        assert!(transparency_gained(&m, &rect, (4, 2)));
    }

    #[test]
    fn test_upscale_covers_frame() {
        let m = build_strip_matrix(
            &StripTransform { scale: [2.0, 2.0], ..Default::default() },
            (4, 4),
            (4, 4),
            1.0,
            1.0,
        );
        let rect = CropRect::from_crop(&StripCrop::default(), (4, 4), 1.0);
        assert!(!transparency_gained(&m, &rect, (4, 4)));
    }

    /// Smaller source is centered in the output.
    #[test]
    fn test_small_source_is_centered() {
        let src = Frame::solid_f32(2, 2, [1.0, 0.0, 0.0, 1.0]);
        let m = build_strip_matrix(&StripTransform::default(), (2, 2), (4, 4), 1.0, 1.0);
        let rect = CropRect::from_crop(&StripCrop::default(), (2, 2), 1.0);
        let out = transform_frame(&src, (4, 4), &m, &rect, SampleFilter::Nearest);
        assert_eq!(out.pixel(0, 0), [0.0; 4]);
        assert_eq!(out.pixel(1, 1), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(out.pixel(2, 2), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(out.pixel(3, 3), [0.0; 4]);
    }

    #[test]
    fn test_zero_scale_is_transparent() {
        let src = Frame::solid_u8(2, 2, [9, 9, 9, 255]);
        let m = build_strip_matrix(
            &StripTransform { scale: [0.0, 1.0], ..Default::default() },
            (2, 2),
            (2, 2),
            1.0,
            1.0,
        );
        let rect = CropRect::from_crop(&StripCrop::default(), (2, 2), 1.0);
        let out = transform_frame(&src, (2, 2), &m, &rect, SampleFilter::Bilinear);
        assert!(out.to_u8_vec().iter().all(|&c| c == 0));
    }

    #[test]
    fn test_scale_nearest() {
        let src = gradient(8, 4);
        let out = scale_nearest(&src, 4, 2);
        assert_eq!(out.resolution(), (4, 2));
        // Output (1, 0) center 1.5 maps to source 3.0 -> column 3, row 1
        assert_eq!(out.to_u8_vec()[4], 30);
        assert_eq!(out.to_u8_vec()[5], 10);
    }
}
