//! Speed control: retimes its single input.
//!
//! Unlike other effects the input is rendered at a remapped frame, and with
//! interpolation on, at two neighbouring frames blended by the fraction.

use serde::{Deserialize, Serialize};

use super::{read_premul, EarlyOut, EffectArgs, EffectHandle, ExecMode};
use crate::entities::frame::Frame;
use crate::entities::scene::FCurve;
use crate::entities::strip::Strip;

/// Property name of the animated speed factor.
pub const SPEED_FACTOR_PROPERTY: &str = "speed_factor";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum SpeedMode {
    /// Source content stretched over the speed strip
    #[default]
    Stretch,
    /// Constant (or animated) playback rate
    Multiply { factor: f32 },
    /// Position as a percentage of the source length
    Length { percent: f32 },
    /// Fixed source frame
    FrameNumber { frame: f32 },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Speed {
    pub mode: SpeedMode,
    pub interpolate: bool,
}

impl Speed {
    /// Timeline frame of `source` shown by `speed` at `frame`.
    ///
    /// `factor_curve` animates the Multiply rate; the accumulated rate
    /// gives the source position.
    pub fn target_frame(&self, speed: &Strip, source: &Strip, frame: f32, factor_curve: Option<&FCurve>) -> f32 {
        let frame_index = speed.give_frame_index(frame).round().max(0.0);
        let source_len = source.len as f32;

        let target = match self.mode {
            SpeedMode::Stretch => {
                let content = (source.len - source.startofs) as f32;
                let effect_len = (speed.right_handle() - speed.left_handle()) as f32;
                if effect_len > 0.0 { content * frame_index / effect_len } else { 0.0 }
            }
            SpeedMode::Multiply { factor } => match factor_curve {
                Some(curve) => {
                    let mut acc = 0.0f32;
                    for i in 1..=frame_index as i32 {
                        let rate = curve.evaluate((speed.left_handle() + i) as f32).unwrap_or(factor);
                        acc = (acc + rate).clamp(0.0, source_len);
                    }
                    acc
                }
                None => frame_index * factor,
            },
            SpeedMode::Length { percent } => source_len * percent / 100.0,
            SpeedMode::FrameNumber { frame } => frame,
        };

        source.start as f32 + target.clamp(0.0, source_len)
    }

    /// Frames of the input rendered per output frame.
    pub fn inputs_rendered(&self) -> usize {
        if self.interpolate { 2 } else { 1 }
    }

    /// Frame rendered for input slot `slot` given the target frame.
    pub fn input_frame(&self, target: f32, slot: usize) -> f32 {
        if self.interpolate { target.floor() + slot as f32 } else { target }
    }

    /// Blend factor between the two interpolated frames.
    pub fn interpolation_fac(&self, target: f32) -> f32 {
        if self.interpolate { target - target.floor() } else { 0.0 }
    }
}

impl EffectHandle for Speed {
    fn num_inputs(&self) -> usize {
        1
    }

    fn early_out(&self, _fac: f32) -> EarlyOut {
        EarlyOut::DoEffect
    }

    fn exec_mode(&self) -> ExecMode {
        ExecMode::Single
    }

    fn execute(&self, args: &EffectArgs) -> Option<Frame> {
        let a = args.input(0)?;
        let Some(b) = args.input(1).filter(|_| self.interpolate && args.fac > 0.0) else {
            return Some(a.clone());
        };

        let (w, h) = a.resolution();
        let fac = args.fac;
        let mut data = Vec::with_capacity(w * h * 4);
        for idx in 0..w * h {
            let pa = read_premul(Some(a), idx);
            let pb = read_premul(Some(b), idx);
            for c in 0..4 {
                data.push((1.0 - fac) * pa[c] + fac * pb[c]);
            }
        }
        let mut out = Frame::from_f32_buffer(data, w, h);
        out.copy_metadata_from(a);
        Some(out)
    }
}
