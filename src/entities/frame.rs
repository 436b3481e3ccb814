//! Pixel buffers passed between the renderer and the frame cache.
//!
//! **Why**: One strip render may be held by the cache, by the compositor and
//! by a caller at the same time. `Frame` is a shared handle; clones share
//! pixels, and every mutating method detaches the data first when somebody
//! else still holds it, so a cached frame is never modified behind its back.
//!
//! # Pixel Formats
//!
//! - `PixelBuffer::U8`: byte RGBA, 4 bytes/pixel
//! - `PixelBuffer::F32`: float RGBA, 16 bytes/pixel
//!
//! Storage is always four channels. `Planes` records which of them carry
//! meaning, which lets the compositor skip blending for opaque sources.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

/// Tag for byte buffers decoded from ordinary image files.
pub const COLORSPACE_SRGB: &str = "sRGB";
/// Tag for float buffers in scene linear space.
pub const COLORSPACE_LINEAR: &str = "Linear";

/// Pixel buffer format - byte or float RGBA
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl PixelBuffer {
    /// Number of channel values (width * height * 4).
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read pixel `idx` as float RGBA (0-1 for byte data).
    #[inline]
    pub fn pixel(&self, idx: usize) -> [f32; 4] {
        let i = idx * 4;
        match self {
            PixelBuffer::U8(v) => [
                v[i] as f32 / 255.0,
                v[i + 1] as f32 / 255.0,
                v[i + 2] as f32 / 255.0,
                v[i + 3] as f32 / 255.0,
            ],
            PixelBuffer::F32(v) => [v[i], v[i + 1], v[i + 2], v[i + 3]],
        }
    }
}

/// Pixel format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    RgbaF32,
}

/// Channels that carry meaning in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Planes {
    Bw,
    Rgb,
    #[default]
    Rgba,
}

impl Planes {
    pub fn has_alpha(self) -> bool {
        matches!(self, Planes::Rgba)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct FrameData {
    buffer: PixelBuffer,
    width: usize,
    height: usize,
    planes: Planes,
    colorspace: String,
    metadata: BTreeMap<String, String>,
}

/// Shared handle to an RGBA image.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<FrameData>,
}

/// Frame loading errors
#[derive(Debug)]
pub enum FrameError {
    Io(String),
    Image(String),
    UnsupportedFormat(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Io(e) => write!(f, "IO error: {}", e),
            FrameError::Image(e) => write!(f, "Image error: {}", e),
            FrameError::UnsupportedFormat(e) => write!(f, "Unsupported format: {}", e),
        }
    }
}

impl std::error::Error for FrameError {}

impl Frame {
    /// Transparent black byte frame.
    pub fn new(width: usize, height: usize) -> Self {
        Self::from_u8_buffer(vec![0u8; width * height * 4], width, height)
    }

    /// Transparent black float frame.
    pub fn new_float(width: usize, height: usize) -> Self {
        Self::from_f32_buffer(vec![0.0f32; width * height * 4], width, height)
    }

    pub fn from_u8_buffer(buffer: Vec<u8>, width: usize, height: usize) -> Self {
        Self::from_buffer(PixelBuffer::U8(buffer), width, height)
    }

    pub fn from_f32_buffer(buffer: Vec<f32>, width: usize, height: usize) -> Self {
        Self::from_buffer(PixelBuffer::F32(buffer), width, height)
    }

    pub fn from_buffer(buffer: PixelBuffer, width: usize, height: usize) -> Self {
        debug_assert_eq!(buffer.len(), width * height * 4);
        let colorspace = match buffer {
            PixelBuffer::U8(_) => COLORSPACE_SRGB,
            PixelBuffer::F32(_) => COLORSPACE_LINEAR,
        };
        Self {
            data: Arc::new(FrameData {
                buffer,
                width,
                height,
                planes: Planes::Rgba,
                colorspace: colorspace.to_string(),
                metadata: BTreeMap::new(),
            }),
        }
    }

    /// Byte frame filled with one color.
    pub fn solid_u8(width: usize, height: usize, rgba: [u8; 4]) -> Self {
        let mut buffer = vec![0u8; width * height * 4];
        for px in buffer.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Self::from_u8_buffer(buffer, width, height)
    }

    /// Float frame filled with one color.
    pub fn solid_f32(width: usize, height: usize, rgba: [f32; 4]) -> Self {
        let mut buffer = vec![0.0f32; width * height * 4];
        for px in buffer.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Self::from_f32_buffer(buffer, width, height)
    }

    /// Builder-style planes override.
    pub fn with_planes(mut self, planes: Planes) -> Self {
        self.set_planes(planes);
        self
    }

    /// Decode an image file.
    ///
    /// Byte formats (PNG/JPEG/TIFF/TGA) load as `U8`, HDR and EXR as `F32`.
    /// Sources without an alpha channel are tagged `Planes::Rgb`.
    pub fn load(path: &Path) -> Result<Self, FrameError> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        let img = match ext.as_str() {
            "png" | "jpg" | "jpeg" | "tif" | "tiff" | "tga" | "exr" | "hdr" => {
                image::open(path).map_err(|e| match e {
                    image::ImageError::IoError(io) => FrameError::Io(io.to_string()),
                    other => FrameError::Image(other.to_string()),
                })?
            }
            _ => return Err(FrameError::UnsupportedFormat(format!(".{}", ext))),
        };

        let width = img.width() as usize;
        let height = img.height() as usize;
        let planes = if img.color().has_alpha() {
            Planes::Rgba
        } else if img.color().has_color() {
            Planes::Rgb
        } else {
            Planes::Bw
        };

        let frame = if matches!(ext.as_str(), "exr" | "hdr") {
            Frame::from_f32_buffer(img.to_rgba32f().into_raw(), width, height)
        } else {
            Frame::from_u8_buffer(img.to_rgba8().into_raw(), width, height)
        };

        debug!("Loaded {}: {}x{} {:?}", path.display(), width, height, planes);
        Ok(frame.with_planes(planes))
    }

    /// Write the frame as an 8-bit PNG (float data is clamped).
    pub fn save_png(&self, path: &Path) -> Result<(), FrameError> {
        let bytes = self.to_u8_vec();
        image::save_buffer(
            path,
            &bytes,
            self.width() as u32,
            self.height() as u32,
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| FrameError::Image(e.to_string()))
    }

    fn data_mut(&mut self) -> &mut FrameData {
        Arc::make_mut(&mut self.data)
    }

    pub fn width(&self) -> usize {
        self.data.width
    }

    pub fn height(&self) -> usize {
        self.data.height
    }

    pub fn resolution(&self) -> (usize, usize) {
        (self.data.width, self.data.height)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        match self.data.buffer {
            PixelBuffer::U8(_) => PixelFormat::Rgba8,
            PixelBuffer::F32(_) => PixelFormat::RgbaF32,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self.data.buffer, PixelBuffer::F32(_))
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.data.buffer
    }

    /// Mutable pixels; detaches from other owners first.
    pub fn buffer_mut(&mut self) -> &mut PixelBuffer {
        &mut self.data_mut().buffer
    }

    pub fn planes(&self) -> Planes {
        self.data.planes
    }

    pub fn set_planes(&mut self, planes: Planes) {
        if self.data.planes != planes {
            self.data_mut().planes = planes;
        }
    }

    pub fn colorspace(&self) -> &str {
        &self.data.colorspace
    }

    pub fn set_colorspace(&mut self, colorspace: &str) {
        if self.data.colorspace != colorspace {
            self.data_mut().colorspace = colorspace.to_string();
        }
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.data.metadata
    }

    pub fn set_metadata(&mut self, key: &str, value: &str) {
        self.data_mut().metadata.insert(key.to_string(), value.to_string());
    }

    /// Replace this frame's metadata with a copy of `other`'s.
    pub fn copy_metadata_from(&mut self, other: &Frame) {
        if self.data.metadata != other.data.metadata {
            self.data_mut().metadata = other.data.metadata.clone();
        }
    }

    /// True when both handles share the same pixel storage.
    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Memory size in bytes
    pub fn mem(&self) -> usize {
        match &self.data.buffer {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::F32(v) => v.len() * 4,
        }
    }

    /// Float RGBA at (x, y).
    pub fn pixel(&self, x: usize, y: usize) -> [f32; 4] {
        self.data.buffer.pixel(y * self.data.width + x)
    }

    /// Byte copy of the pixels (float data is clamped and rounded).
    pub fn to_u8_vec(&self) -> Vec<u8> {
        match &self.data.buffer {
            PixelBuffer::U8(v) => v.clone(),
            PixelBuffer::F32(v) => v.iter().map(|&c| f32_to_u8(c)).collect(),
        }
    }

    /// Float copy of the pixels.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.data.buffer {
            PixelBuffer::U8(v) => v.iter().map(|&c| c as f32 / 255.0).collect(),
            PixelBuffer::F32(v) => v.clone(),
        }
    }

    /// Convert byte pixels to float in place. The byte buffer is dropped.
    pub fn make_float(&mut self) {
        if self.is_float() {
            return;
        }
        let converted = self.to_f32_vec();
        self.data_mut().buffer = PixelBuffer::F32(converted);
    }

    /// Float copy of this frame (shares data when already float).
    pub fn promoted_to_float(&self) -> Frame {
        let mut out = self.clone();
        out.make_float();
        out
    }

    pub fn flip_x(&mut self) {
        let (w, _) = self.resolution();
        match self.buffer_mut() {
            PixelBuffer::U8(v) => flip_rows_x(v, w),
            PixelBuffer::F32(v) => flip_rows_x(v, w),
        }
    }

    pub fn flip_y(&mut self) {
        let (w, h) = self.resolution();
        match self.buffer_mut() {
            PixelBuffer::U8(v) => flip_rows_y(v, w, h),
            PixelBuffer::F32(v) => flip_rows_y(v, w, h),
        }
    }

    /// Field filter for interlaced sources: vertical [1 2 1] / 4 per column.
    pub fn filter_y(&mut self) {
        let (w, h) = self.resolution();
        if h < 3 {
            return;
        }
        let stride = w * 4;
        match self.buffer_mut() {
            PixelBuffer::U8(v) => {
                let src = v.clone();
                for y in 1..h - 1 {
                    for i in 0..stride {
                        let a = src[(y - 1) * stride + i] as u32;
                        let b = src[y * stride + i] as u32;
                        let c = src[(y + 1) * stride + i] as u32;
                        v[y * stride + i] = ((a + 2 * b + c + 2) / 4) as u8;
                    }
                }
            }
            PixelBuffer::F32(v) => {
                let src = v.clone();
                for y in 1..h - 1 {
                    for i in 0..stride {
                        let a = src[(y - 1) * stride + i];
                        let b = src[y * stride + i];
                        let c = src[(y + 1) * stride + i];
                        v[y * stride + i] = (a + 2.0 * b + c) * 0.25;
                    }
                }
            }
        }
    }

    /// Scale all four channels by `fmul`.
    ///
    /// Byte data uses 8.8 fixed point: `min((int(256 * fmul) * c) >> 8, 255)`.
    /// Opaque frames gain an alpha channel when darkened.
    pub fn multiply(&mut self, fmul: f32) {
        match self.buffer_mut() {
            PixelBuffer::U8(v) => {
                let imul = (256.0 * fmul) as i32;
                for c in v.iter_mut() {
                    *c = ((imul * *c as i32) >> 8).clamp(0, 255) as u8;
                }
            }
            PixelBuffer::F32(v) => {
                for c in v.iter_mut() {
                    *c *= fmul;
                }
            }
        }
        if matches!(self.planes(), Planes::Bw | Planes::Rgb) && fmul < 1.0 {
            self.set_planes(Planes::Rgba);
        }
    }

    /// Crop to a pixel rectangle (inclusive bounds, clamped to the frame).
    pub fn cropped(&self, xmin: usize, ymin: usize, xmax: usize, ymax: usize) -> Frame {
        let (w, h) = self.resolution();
        if w == 0 || h == 0 {
            return self.clone();
        }
        let xmax = xmax.min(w - 1);
        let ymax = ymax.min(h - 1);
        let xmin = xmin.min(xmax);
        let ymin = ymin.min(ymax);
        let new_w = xmax - xmin + 1;
        let new_h = ymax - ymin + 1;

        let buffer = match self.buffer() {
            PixelBuffer::U8(v) => PixelBuffer::U8(crop_rows(v, w, xmin, ymin, new_w, new_h)),
            PixelBuffer::F32(v) => PixelBuffer::F32(crop_rows(v, w, xmin, ymin, new_w, new_h)),
        };
        let mut out = Frame::from_buffer(buffer, new_w, new_h);
        out.set_planes(self.planes());
        out.set_colorspace(self.colorspace());
        out.copy_metadata_from(self);
        out
    }

    /// Same-format copy of pixel rows `[top, top + rows)`.
    pub fn rows(&self, top: usize, rows: usize) -> Frame {
        let w = self.width();
        self.cropped(0, top, w.saturating_sub(1), top + rows.saturating_sub(1))
    }
}

#[inline]
pub(crate) fn f32_to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

fn flip_rows_x<T: Copy>(data: &mut [T], width: usize) {
    if width == 0 {
        return;
    }
    for row in data.chunks_exact_mut(width * 4) {
        for x in 0..width / 2 {
            let (a, b) = (x * 4, (width - 1 - x) * 4);
            for c in 0..4 {
                row.swap(a + c, b + c);
            }
        }
    }
}

fn flip_rows_y<T: Copy>(data: &mut [T], width: usize, height: usize) {
    let stride = width * 4;
    for y in 0..height / 2 {
        let (top, bottom) = data.split_at_mut((height - 1 - y) * stride);
        top[y * stride..(y + 1) * stride].swap_with_slice(&mut bottom[..stride]);
    }
}

fn crop_rows<T: Copy>(data: &[T], width: usize, x: usize, y: usize, w: usize, h: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(w * h * 4);
    for row in y..y + h {
        let start = (row * width + x) * 4;
        out.extend_from_slice(&data[start..start + w * 4]);
    }
    out
}
