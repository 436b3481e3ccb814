//! Gaussian blur effect.
//!
//! Separable blur in two passes (horizontal then vertical), O(n*r) instead
//! of O(n*r^2). Each row band blurs the input rows it needs, padded by the
//! vertical radius, so bands run independently.

use super::{read_premul, unpremultiply, EarlyOut, EffectArgs, EffectHandle, ExecMode, OutputSlice, SliceData};
use crate::entities::frame::f32_to_u8;

#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianBlur {
    /// Horizontal radius, pixels
    pub size_x: f32,
    /// Vertical radius, pixels
    pub size_y: f32,
}

/// Normalized 1D kernel covering `[-ceil(radius), ceil(radius)]`.
///
/// Sigma is half the radius, so the tails sit at two sigma.
fn gaussian_kernel(radius: f32) -> Vec<f32> {
    if radius <= 0.0 {
        return vec![1.0];
    }
    let half = radius.ceil() as i32;
    let sigma = radius / 2.0;
    let sigma2 = 2.0 * sigma * sigma;

    let mut kernel: Vec<f32> = (-half..=half).map(|i| (-(i * i) as f32 / sigma2).exp()).collect();
    let sum: f32 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

impl EffectHandle for GaussianBlur {
    fn num_inputs(&self) -> usize {
        1
    }

    fn early_out(&self, _fac: f32) -> EarlyOut {
        if self.size_x == 0.0 && self.size_y == 0.0 {
            EarlyOut::UseInput1
        } else {
            EarlyOut::DoEffect
        }
    }

    fn exec_mode(&self) -> ExecMode {
        ExecMode::Threaded
    }

    fn execute_slice(&self, args: &EffectArgs, out: OutputSlice) {
        let Some(src) = args.input(0) else { return };
        let (width, height) = src.resolution();
        if width != out.width || width == 0 || height == 0 {
            return;
        }

        let kx = gaussian_kernel(self.size_x);
        let ky = gaussian_kernel(self.size_y);
        let hx = (kx.len() / 2) as i64;
        let hy = (ky.len() / 2) as i64;

        let start = out.start_line;
        let end = (start + out.rows()).min(height);
        // Input rows touched by this band
        let top = (start as i64 - hy).max(0) as usize;
        let bottom = ((end as i64 + hy) as usize).min(height);

        // Horizontal pass into a band-local buffer
        let band_rows = bottom - top;
        let mut temp = vec![0.0f32; band_rows * width * 4];
        for y in top..bottom {
            for x in 0..width {
                let mut acc = [0.0f32; 4];
                for (ki, &w) in kx.iter().enumerate() {
                    let sx = (x as i64 + ki as i64 - hx).clamp(0, width as i64 - 1) as usize;
                    let px = read_premul(Some(src), y * width + sx);
                    for c in 0..4 {
                        acc[c] += px[c] * w;
                    }
                }
                let t = ((y - top) * width + x) * 4;
                temp[t..t + 4].copy_from_slice(&acc);
            }
        }

        // Vertical pass straight into the output band
        let sample = |x: usize, y: usize| -> [f32; 4] {
            let mut acc = [0.0f32; 4];
            for (ki, &w) in ky.iter().enumerate() {
                let sy = (y as i64 + ki as i64 - hy).clamp(top as i64, bottom as i64 - 1) as usize;
                let t = ((sy - top) * width + x) * 4;
                for c in 0..4 {
                    acc[c] += temp[t + c] * w;
                }
            }
            acc
        };

        match out.data {
            SliceData::F32(data) => {
                for (i, px) in data.chunks_exact_mut(4).enumerate().take((end - start) * width) {
                    px.copy_from_slice(&sample(i % width, start + i / width));
                }
            }
            SliceData::U8(data) => {
                for (i, px) in data.chunks_exact_mut(4).enumerate().take((end - start) * width) {
                    let v = unpremultiply(sample(i % width, start + i / width));
                    for c in 0..4 {
                        px[c] = f32_to_u8(v[c]);
                    }
                }
            }
        }
    }
}
