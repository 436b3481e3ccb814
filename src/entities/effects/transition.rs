//! Transitions from input 1 to input 2 driven by the fade factor.

use super::{fade_fac, pixelwise_slice, EarlyOut, EffectArgs, EffectHandle, ExecMode, OutputSlice};
use crate::entities::strip::Strip;

fn early_out_fade(fac: f32) -> EarlyOut {
    if fac == 0.0 {
        EarlyOut::UseInput1
    } else if fac == 1.0 {
        EarlyOut::UseInput2
    } else {
        EarlyOut::DoEffect
    }
}

/// Linear cross fade.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cross;

impl EffectHandle for Cross {
    fn num_inputs(&self) -> usize {
        2
    }

    fn early_out(&self, fac: f32) -> EarlyOut {
        early_out_fade(fac)
    }

    fn default_fac(&self, strip: &Strip, frame: f32) -> f32 {
        fade_fac(strip, frame)
    }

    fn exec_mode(&self) -> ExecMode {
        ExecMode::Threaded
    }

    fn execute_slice(&self, args: &EffectArgs, out: OutputSlice) {
        let fac = args.fac;
        let mfac = 1.0 - fac;
        pixelwise_slice(args, out, |a, b, _| std::array::from_fn(|c| mfac * a[c] + fac * b[c]));
    }
}

/// Cross fade in gamma 2.0 space; alpha fades linearly.
#[derive(Debug, Clone, Copy, Default)]
pub struct GammaCross;

impl EffectHandle for GammaCross {
    fn num_inputs(&self) -> usize {
        2
    }

    fn early_out(&self, fac: f32) -> EarlyOut {
        early_out_fade(fac)
    }

    fn default_fac(&self, strip: &Strip, frame: f32) -> f32 {
        fade_fac(strip, frame)
    }

    fn exec_mode(&self) -> ExecMode {
        ExecMode::Threaded
    }

    fn execute_slice(&self, args: &EffectArgs, out: OutputSlice) {
        let fac = args.fac;
        let mfac = 1.0 - fac;
        pixelwise_slice(args, out, |a, b, _| {
            let mut px = [0.0; 4];
            for c in 0..3 {
                px[c] = (mfac * a[c] * a[c] + fac * b[c] * b[c]).max(0.0).sqrt();
            }
            px[3] = mfac * a[3] + fac * b[3];
            px
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::effects::{execute_whole, EffectType};
    use crate::entities::frame::Frame;
    use crate::entities::strip::StripKind;

    #[test]
    fn test_cross_early_out() {
        assert_eq!(Cross.early_out(0.0), EarlyOut::UseInput1);
        assert_eq!(Cross.early_out(1.0), EarlyOut::UseInput2);
        assert_eq!(GammaCross.early_out(0.5), EarlyOut::DoEffect);
    }

    #[test]
    fn test_cross_and_gamma_cross() {
        let strip = Strip::new("x", StripKind::Effect { effect: EffectType::Cross, inputs: vec![] }, 1, 0, 4);
        let black = Frame::solid_f32(1, 1, [0.0, 0.0, 0.0, 1.0]);
        let white = Frame::solid_f32(1, 1, [1.0, 1.0, 1.0, 1.0]);
        let args = EffectArgs {
            strip: &strip,
            frame: 2.0,
            fac: Cross.default_fac(&strip, 2.0),
            rect: (1, 1),
            inputs: [Some(&black), Some(&white), None],
        };
        assert_eq!(args.fac, 0.5);
        assert_eq!(execute_whole(&Cross, &args).pixel(0, 0), [0.5, 0.5, 0.5, 1.0]);

        let g = execute_whole(&GammaCross, &args).pixel(0, 0);
        assert!((g[0] - 0.5f32.sqrt()).abs() < 1e-6);
        assert_eq!(g[3], 1.0);
    }
}
