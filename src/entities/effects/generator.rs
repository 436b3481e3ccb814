//! Single-call effects: solid color, pass-through, and the unsupported stub.

use super::{EarlyOut, EffectArgs, EffectHandle, ExecMode};
use crate::entities::frame::Frame;

/// Solid color generator (float output).
#[derive(Debug, Clone, Copy)]
pub struct SolidColor {
    /// Straight RGBA
    pub color: [f32; 4],
}

impl EffectHandle for SolidColor {
    fn num_inputs(&self) -> usize {
        0
    }

    fn early_out(&self, _fac: f32) -> EarlyOut {
        EarlyOut::NoInput
    }

    fn exec_mode(&self) -> ExecMode {
        ExecMode::Single
    }

    fn execute(&self, args: &EffectArgs) -> Option<Frame> {
        let [r, g, b, a] = self.color;
        let (w, h) = args.rect;
        Some(Frame::solid_f32(w, h, [r * a, g * a, b * a, a]))
    }
}

/// Input 2 verbatim; the handle behind the `Replace` blend mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Replace;

impl EffectHandle for Replace {
    fn num_inputs(&self) -> usize {
        2
    }

    fn early_out(&self, _fac: f32) -> EarlyOut {
        EarlyOut::UseInput2
    }

    fn exec_mode(&self) -> ExecMode {
        ExecMode::Single
    }

    fn execute(&self, args: &EffectArgs) -> Option<Frame> {
        args.input(1).cloned()
    }
}

/// Effect type without an implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsupported;

impl EffectHandle for Unsupported {
    fn num_inputs(&self) -> usize {
        0
    }

    fn early_out(&self, _fac: f32) -> EarlyOut {
        EarlyOut::DoEffect
    }

    fn exec_mode(&self) -> ExecMode {
        ExecMode::Unsupported
    }
}
