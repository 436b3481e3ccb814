//! Per-pixel color helpers shared by preprocessing and modifiers.

use rayon::prelude::*;

use super::frame::{f32_to_u8, Frame, PixelBuffer};

/// Convert RGB to HSV.
///
/// - R, G, B: 0.0 to 1.0 (or higher for HDR)
/// - H: 0 to 360 degrees
/// - S: 0 to 1
/// - V: 0 to max(R,G,B)
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max } else { 0.0 };

    let h = if delta.abs() < 0.0001 {
        0.0
    } else if (max - r).abs() < 0.0001 {
        60.0 * (((g - b) / delta) % 6.0)
    } else if (max - g).abs() < 0.0001 {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let h = if h < 0.0 { h + 360.0 } else { h };
    (h, s, v)
}

/// Convert HSV to RGB. V may exceed 1 for HDR.
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    if s <= 0.0 {
        return (v, v, v);
    }

    let h = h.rem_euclid(360.0);
    let c = v * s;
    let h_prime = h / 60.0;
    let x = c * (1.0 - ((h_prime % 2.0) - 1.0).abs());
    let m = v - c;

    let (r1, g1, b1) = match h_prime as i32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (r1 + m, g1 + m, b1 + m)
}

/// Run `f` over every pixel's RGB in place; alpha untouched.
///
/// Byte frames are converted to 0-1 floats for `f` and clamped back.
pub fn map_rgb<F>(frame: &mut Frame, f: F)
where
    F: Fn([f32; 3]) -> [f32; 3] + Sync,
{
    match frame.buffer_mut() {
        PixelBuffer::U8(data) => {
            data.par_chunks_exact_mut(4).for_each(|px| {
                let rgb = f([
                    px[0] as f32 / 255.0,
                    px[1] as f32 / 255.0,
                    px[2] as f32 / 255.0,
                ]);
                px[0] = f32_to_u8(rgb[0]);
                px[1] = f32_to_u8(rgb[1]);
                px[2] = f32_to_u8(rgb[2]);
            });
        }
        PixelBuffer::F32(data) => {
            data.par_chunks_exact_mut(4).for_each(|px| {
                let rgb = f([px[0], px[1], px[2]]);
                px[..3].copy_from_slice(&rgb);
            });
        }
    }
}

/// Scale saturation by `sat` (1.0 = unchanged, 0.0 = grayscale).
pub fn saturation(frame: &mut Frame, sat: f32) {
    map_rgb(frame, |[r, g, b]| {
        let (h, s, v) = rgb_to_hsv(r, g, b);
        let (r, g, b) = hsv_to_rgb(h, (s * sat).clamp(0.0, 1.0), v);
        [r, g, b]
    });
}
