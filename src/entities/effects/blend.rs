//! Two-input blend effects (alpha over/under, add, subtract, multiply,
//! drop shadow, color mix).
//!
//! Input 1 is the layer being applied, input 2 the one below for the
//! alpha family; the rest take (background, foreground).

use serde::{Deserialize, Serialize};

use super::{pixelwise_slice, read_premul, EarlyOut, EffectArgs, EffectHandle, ExecMode, OutputSlice};

/// Shadow offset of `OverDrop`, pixels.
const DROP_XOFF: usize = 8;
const DROP_YOFF: usize = 8;

/// fac 0 passes input 1 (nothing is added).
pub(crate) fn early_out_mul_input2(fac: f32) -> EarlyOut {
    if fac == 0.0 { EarlyOut::UseInput1 } else { EarlyOut::DoEffect }
}

/// fac 0 passes input 2 (the layer is invisible).
pub(crate) fn early_out_mul_input1(fac: f32) -> EarlyOut {
    if fac == 0.0 { EarlyOut::UseInput2 } else { EarlyOut::DoEffect }
}

macro_rules! pixel_effect {
    ($name:ident, $early:path, |$fac:ident, $a:ident, $b:ident| $body:expr) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl EffectHandle for $name {
            fn num_inputs(&self) -> usize {
                2
            }

            fn early_out(&self, fac: f32) -> EarlyOut {
                $early(fac)
            }

            fn exec_mode(&self) -> ExecMode {
                ExecMode::Threaded
            }

            fn execute_slice(&self, args: &EffectArgs, out: OutputSlice) {
                let $fac = args.fac;
                pixelwise_slice(args, out, |$a, $b, _| $body);
            }
        }
    };
}

#[inline]
pub(crate) fn alpha_over(fac: f32, a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
    if fac <= 0.0 {
        return b;
    }
    let mfac = 1.0 - fac * a[3];
    if mfac <= 0.0 {
        return a;
    }
    std::array::from_fn(|c| fac * a[c] + mfac * b[c])
}

#[inline]
fn alpha_under(fac: f32, a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
    if b[3] <= 0.0 && fac >= 1.0 {
        return a;
    }
    if b[3] >= 1.0 || fac == 0.0 {
        return b;
    }
    let t = fac * (1.0 - b[3]);
    std::array::from_fn(|c| b[c] + t * a[c])
}

pixel_effect!(AlphaOver, early_out_mul_input1, |fac, a, b| alpha_over(fac, a, b));

pixel_effect!(AlphaUnder, early_out_mul_input1, |fac, a, b| alpha_under(fac, a, b));

pixel_effect!(Add, early_out_mul_input2, |fac, a, b| {
    let f = fac * b[3];
    [a[0] + f * b[0], a[1] + f * b[1], a[2] + f * b[2], a[3]]
});

pixel_effect!(Subtract, early_out_mul_input2, |fac, a, b| {
    let f = fac * b[3];
    [
        (a[0] - f * b[0]).max(0.0),
        (a[1] - f * b[1]).max(0.0),
        (a[2] - f * b[2]).max(0.0),
        a[3],
    ]
});

pixel_effect!(Multiply, early_out_mul_input2, |fac, a, b| {
    std::array::from_fn(|c| a[c] + fac * (a[c] * b[c] - a[c]))
});

/// Alpha over with a drop shadow of input 1 darkening input 2.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverDrop;

impl EffectHandle for OverDrop {
    fn num_inputs(&self) -> usize {
        2
    }

    fn early_out(&self, fac: f32) -> EarlyOut {
        early_out_mul_input1(fac)
    }

    fn exec_mode(&self) -> ExecMode {
        ExecMode::Threaded
    }

    fn execute_slice(&self, args: &EffectArgs, out: OutputSlice) {
        let fac = args.fac;
        let shadow = 0.7 * fac;
        let width = out.width;
        let fg = args.input(0);
        pixelwise_slice(args, out, |a, b, idx| {
            let (x, y) = (idx % width, idx / width);
            let mut bg = b;
            if x >= DROP_XOFF && y >= DROP_YOFF {
                let t = shadow * read_premul(fg, idx - DROP_YOFF * width - DROP_XOFF)[3];
                for v in bg.iter_mut() {
                    *v = (*v - t).max(0.0);
                }
            }
            alpha_over(fac, a, bg)
        });
    }
}

/// Per-channel blend functions of `ColorMix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMixBlend {
    Add,
    Subtract,
    Multiply,
    Screen,
    Lighten,
    Darken,
    Difference,
    Overlay,
    Divide,
}

impl ColorMixBlend {
    #[inline]
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            ColorMixBlend::Add => a + b,
            ColorMixBlend::Subtract => (a - b).max(0.0),
            ColorMixBlend::Multiply => a * b,
            ColorMixBlend::Screen => 1.0 - (1.0 - a) * (1.0 - b),
            ColorMixBlend::Lighten => a.max(b),
            ColorMixBlend::Darken => a.min(b),
            ColorMixBlend::Difference => (a - b).abs(),
            ColorMixBlend::Overlay => {
                if a > 0.5 {
                    1.0 - (1.0 - 2.0 * (a - 0.5)) * (1.0 - b)
                } else {
                    2.0 * a * b
                }
            }
            ColorMixBlend::Divide => {
                if b <= 0.00001 { a } else { a / b }
            }
        }
    }
}

/// Blend function mixed over input 1 by `factor * fac * alpha2`.
#[derive(Debug, Clone, Copy)]
pub struct ColorMix {
    pub blend: ColorMixBlend,
    pub factor: f32,
}

impl EffectHandle for ColorMix {
    fn num_inputs(&self) -> usize {
        2
    }

    fn early_out(&self, fac: f32) -> EarlyOut {
        early_out_mul_input2(fac * self.factor)
    }

    fn exec_mode(&self) -> ExecMode {
        ExecMode::Threaded
    }

    fn execute_slice(&self, args: &EffectArgs, out: OutputSlice) {
        let fac = args.fac * self.factor;
        let blend = self.blend;
        pixelwise_slice(args, out, |a, b, _| {
            let t = fac * b[3];
            let mut px = a;
            for c in 0..3 {
                px[c] = a[c] + (blend.apply(a[c], b[c]) - a[c]) * t;
            }
            px
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::effects::execute_whole;
    use crate::entities::frame::Frame;
    use crate::entities::strip::{Strip, StripKind};

    fn run<H: EffectHandle>(h: &H, fac: f32, a: &Frame, b: &Frame) -> Frame {
        let strip = Strip::new("fx", StripKind::Sound, 1, 0, 1);
        let args = EffectArgs {
            strip: &strip,
            frame: 0.0,
            fac,
            rect: a.resolution(),
            inputs: [Some(a), Some(b), None],
        };
        execute_whole(h, &args)
    }

    #[test]
    fn test_alpha_over_half() {
        let red = Frame::solid_f32(2, 2, [1.0, 0.0, 0.0, 1.0]);
        let blue = Frame::solid_f32(2, 2, [0.0, 0.0, 1.0, 1.0]);
        let out = run(&AlphaOver, 0.5, &red, &blue);
        assert_eq!(out.pixel(1, 1), [0.5, 0.0, 0.5, 1.0]);
        // Opaque at full factor replaces
        assert_eq!(run(&AlphaOver, 1.0, &red, &blue).pixel(0, 0), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_alpha_over_transparent_keeps_background() {
        let clear = Frame::new_float(2, 2);
        let blue = Frame::solid_f32(2, 2, [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(run(&AlphaOver, 1.0, &clear, &blue).pixel(0, 0), [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_alpha_under() {
        let red = Frame::solid_f32(1, 1, [1.0, 0.0, 0.0, 1.0]);
        let half = Frame::solid_f32(1, 1, [0.0, 0.0, 0.5, 0.5]);
        // Red shows through the half transparent top
        assert_eq!(run(&AlphaUnder, 1.0, &red, &half).pixel(0, 0), [0.5, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_add_sub_mul() {
        let a = Frame::solid_f32(1, 1, [0.5, 0.5, 0.5, 1.0]);
        let b = Frame::solid_f32(1, 1, [0.2, 0.8, 0.0, 1.0]);
        let add = run(&Add, 1.0, &a, &b).pixel(0, 0);
        assert!((add[0] - 0.7).abs() < 1e-6 && (add[1] - 1.3).abs() < 1e-6);
        let sub = run(&Subtract, 1.0, &a, &b).pixel(0, 0);
        assert!((sub[0] - 0.3).abs() < 1e-6 && sub[1] == 0.0);
        let mul = run(&Multiply, 1.0, &a, &b).pixel(0, 0);
        assert!((mul[0] - 0.1).abs() < 1e-6 && (mul[1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_early_outs() {
        assert_eq!(AlphaOver.early_out(0.0), EarlyOut::UseInput2);
        assert_eq!(Add.early_out(0.0), EarlyOut::UseInput1);
        assert_eq!(Add.early_out(0.3), EarlyOut::DoEffect);
        let mix = ColorMix { blend: ColorMixBlend::Screen, factor: 0.0 };
        assert_eq!(mix.early_out(1.0), EarlyOut::UseInput1);
    }

    #[test]
    fn test_over_drop_shadow() {
        // Foreground: opaque 1px square at (0,0) in a 10x10 frame
        let mut fg_buf = vec![0.0f32; 10 * 10 * 4];
        fg_buf[0..4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        let fg = Frame::from_f32_buffer(fg_buf, 10, 10);
        let bg = Frame::solid_f32(10, 10, [1.0, 1.0, 1.0, 1.0]);
        let out = run(&OverDrop, 1.0, &fg, &bg);
        // Shadow lands 8px right and down
        let shadow = out.pixel(8, 8);
        assert!((shadow[0] - 0.3).abs() < 1e-6);
        assert_eq!(out.pixel(5, 5), [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_color_mix_screen() {
        let a = Frame::solid_f32(1, 1, [0.5, 0.5, 0.5, 1.0]);
        let b = Frame::solid_f32(1, 1, [0.5, 0.0, 1.0, 1.0]);
        let mix = ColorMix { blend: ColorMixBlend::Screen, factor: 1.0 };
        let px = run(&mix, 1.0, &a, &b).pixel(0, 0);
        assert!((px[0] - 0.75).abs() < 1e-6);
        assert!((px[1] - 0.5).abs() < 1e-6);
        assert!((px[2] - 1.0).abs() < 1e-6);
        assert_eq!(px[3], 1.0);
    }
}
