//! Effect strip evaluation and the effect execution driver.
//!
//! Threaded effects allocate their output once, then fill row bands in
//! parallel on the rayon pool; the call returns after every band is done.

use log::{trace, warn};
use rayon::prelude::*;

use crate::entities::context::{RenderContext, RenderState};
use crate::entities::effects::speed::SPEED_FACTOR_PROPERTY;
use crate::entities::effects::{EarlyOut, EffectArgs, EffectHandle, EffectKind, ExecMode, OutputSlice, SliceData};
use crate::entities::frame::{Frame, PixelBuffer};
use crate::entities::strip::{Strip, StripKind};
use crate::entities::timeline::Timeline;

use super::stack::RenderPass;

/// Animated property overriding `Strip::effect_fader`.
pub const EFFECT_FADER_PROPERTY: &str = "effect_fader";

/// Split the output rows across the pool and run `execute_slice` per band.
fn execute_threaded(handle: &EffectKind, args: &EffectArgs) -> Frame {
    let mut out = handle.init_execution(args);
    let (width, height) = out.resolution();
    if width == 0 || height == 0 {
        return out;
    }
    let band_rows = height.div_ceil(rayon::current_num_threads().max(1)).max(1);
    let band_len = band_rows * width * 4;

    match out.buffer_mut() {
        PixelBuffer::U8(data) => data.par_chunks_mut(band_len).enumerate().for_each(|(i, band)| {
            let slice = OutputSlice { width, start_line: i * band_rows, data: SliceData::U8(band) };
            handle.execute_slice(args, slice);
        }),
        PixelBuffer::F32(data) => data.par_chunks_mut(band_len).enumerate().for_each(|(i, band)| {
            let slice = OutputSlice { width, start_line: i * band_rows, data: SliceData::F32(band) };
            handle.execute_slice(args, slice);
        }),
    }
    out
}

/// Run `handle` with its calling convention.
///
/// When any input is float the byte inputs are promoted first, so the
/// effect sees one representation. `None` for unsupported effects.
pub fn execute_effect(handle: &EffectKind, args: &EffectArgs) -> Option<Frame> {
    let promoted: [Option<Frame>; 3] = if args.any_float() {
        args.inputs.map(|input| input.filter(|f| !f.is_float()).map(Frame::promoted_to_float))
    } else {
        [None, None, None]
    };
    let inputs = [0, 1, 2].map(|i| promoted[i].as_ref().or(args.inputs[i]));
    let args = EffectArgs { inputs, ..args.clone() };

    match handle.exec_mode() {
        ExecMode::Single => handle.execute(&args),
        ExecMode::Threaded => Some(execute_threaded(handle, &args)),
        ExecMode::Unsupported => None,
    }
}

impl RenderPass<'_> {
    /// Evaluate an effect strip at `frame`, rendering only the inputs its
    /// early-out needs.
    ///
    /// An effect reached again through its own inputs yields no data.
    pub(crate) fn render_effect_strip(
        &self,
        ctx: &RenderContext,
        state: &mut RenderState,
        timeline: &Timeline,
        strip: &Strip,
        frame: f32,
    ) -> Option<Frame> {
        if state.in_effect(strip.uuid) {
            warn!("Strip {}: effect input cycle", strip.name);
            return None;
        }
        state.with_effect(strip.uuid, |state| self.evaluate_effect(ctx, state, timeline, strip, frame))
    }

    fn evaluate_effect(
        &self,
        ctx: &RenderContext,
        state: &mut RenderState,
        timeline: &Timeline,
        strip: &Strip,
        frame: f32,
    ) -> Option<Frame> {
        let StripKind::Effect { effect, inputs } = &strip.kind else {
            return None;
        };
        let handle = effect.handle();
        if handle.exec_mode() == ExecMode::Unsupported {
            warn!("Strip {}: unsupported effect {}", strip.name, effect.display_name());
            return None;
        }

        let input_strips: Vec<Option<&Strip>> = inputs.iter().map(|id| timeline.get(*id)).collect();
        let input = |i: usize| input_strips.get(i).copied().flatten();

        let mut fac = if strip.flags.use_default_fade {
            handle.default_fac(strip, frame)
        } else {
            ctx.scene
                .anim
                .find(strip.uuid, EFFECT_FADER_PROPERTY)
                .and_then(|curve| curve.evaluate(frame))
                .unwrap_or(strip.effect_fader)
        };

        let early_out = handle.early_out(fac);
        trace!("Effect {} at {}: fac {:.3}, {:?}", strip.name, frame, fac, early_out);
        let rect = ctx.rect();

        match early_out {
            EarlyOut::NoInput => {
                let args = EffectArgs { strip, frame, fac, rect, inputs: [None, None, None] };
                execute_effect(&handle, &args)
            }
            EarlyOut::DoEffect => {
                let mut ibufs: [Option<Frame>; 3] = [None, None, None];
                if let EffectKind::Speed(speed) = &handle {
                    if let Some(source) = input(0) {
                        let curve = ctx.scene.anim.find(strip.uuid, SPEED_FACTOR_PROPERTY);
                        let target = speed.target_frame(strip, source, frame, curve);
                        for (slot, ibuf) in ibufs.iter_mut().enumerate().take(speed.inputs_rendered()) {
                            let at = speed.input_frame(target, slot);
                            *ibuf = Some(self.render_strip(ctx, state, timeline, source, at));
                        }
                        fac = speed.interpolation_fac(target);
                    }
                } else {
                    for (i, ibuf) in ibufs.iter_mut().enumerate().take(handle.num_inputs()) {
                        *ibuf = input(i).map(|s| self.render_strip(ctx, state, timeline, s, frame));
                    }
                }

                if ibufs[0].is_some() && (ibufs[1].is_some() || handle.num_inputs() == 1) {
                    let args = EffectArgs {
                        strip,
                        frame,
                        fac,
                        rect,
                        inputs: [ibufs[0].as_ref(), ibufs[1].as_ref(), ibufs[2].as_ref()],
                    };
                    execute_effect(&handle, &args)
                } else {
                    None
                }
            }
            EarlyOut::UseInput1 => input(0).map(|s| self.render_strip(ctx, state, timeline, s, frame)),
            EarlyOut::UseInput2 => input(1).map(|s| self.render_strip(ctx, state, timeline, s, frame)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::effects::EffectType;
    use crate::entities::scene::{Scene, SceneRegistry};
    use crate::render::testing::{MemoryMedia, context_for, sequencer_with};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn strip() -> Strip {
        Strip::new(
            "fx",
            StripKind::Effect { effect: EffectType::Add, inputs: vec![] },
            3,
            0,
            10,
        )
    }

    fn args<'a>(strip: &'a Strip, a: &'a Frame, b: &'a Frame) -> EffectArgs<'a> {
        EffectArgs { strip, frame: 1.0, fac: 1.0, rect: a.resolution(), inputs: [Some(a), Some(b), None] }
    }

    /// Row bands cover the whole output.
    #[test]
    fn test_threaded_matches_whole() {
        let strip = strip();
        let a = Frame::solid_u8(7, 37, [40, 40, 40, 255]);
        let b = Frame::solid_u8(7, 37, [20, 30, 40, 255]);
        let handle = EffectType::Add.handle();
        let threaded = execute_effect(&handle, &args(&strip, &a, &b)).unwrap();
        let whole = crate::entities::effects::execute_whole(&handle, &args(&strip, &a, &b));
        assert_eq!(threaded.to_u8_vec(), whole.to_u8_vec());
        assert_eq!(threaded.pixel(6, 36), whole.pixel(6, 36));
    }

    #[test]
    fn test_mixed_inputs_promote_to_float() {
        let strip = strip();
        let a = Frame::solid_u8(2, 2, [255, 0, 0, 255]);
        let b = Frame::solid_f32(2, 2, [0.0, 0.5, 0.0, 1.0]);
        let out = execute_effect(&EffectType::Add.handle(), &args(&strip, &a, &b)).unwrap();
        assert!(out.is_float());
        let px = out.pixel(0, 0);
        assert!((px[0] - 1.0).abs() < 1e-5);
        assert!((px[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_unsupported_is_none() {
        let strip = Strip::new(
            "img",
            StripKind::Image { dir: PathBuf::from("/tmp"), files: vec![] },
            1,
            0,
            1,
        );
        let a = Frame::new(1, 1);
        assert!(execute_effect(&EffectType::Unknown.handle(), &args(&strip, &a, &a)).is_none());
    }

    /// Effects feeding each other render blank instead of recursing forever.
    #[test]
    fn test_effect_input_cycle_is_blank() {
        let cross = |name: &str, channel: i32| {
            let mut fx = Strip::new(
                name,
                StripKind::Effect { effect: EffectType::Cross, inputs: vec![] },
                channel,
                0,
                10,
            );
            fx.effect_fader = 0.0;
            fx
        };
        let (mut fx_a, mut fx_b, mut fx_c) = (cross("a", 2), cross("b", 3), cross("c", 4));
        let set_input = |fx: &mut Strip, input: uuid::Uuid| {
            if let StripKind::Effect { inputs, .. } = &mut fx.kind {
                *inputs = vec![input];
            }
        };
        set_input(&mut fx_a, fx_b.uuid);
        set_input(&mut fx_b, fx_a.uuid);
        set_input(&mut fx_c, fx_a.uuid);

        let mut scene = Scene::new("main", 2, 2);
        scene.editing.timeline.strips.extend([fx_a, fx_b, fx_c]);
        assert!(scene.editing.timeline.validate().is_err());
        let mut registry = SceneRegistry::new();
        let scene = registry.insert(scene);
        let ctx = context_for((scene, Arc::new(registry)), 2, 2);

        let out = sequencer_with(MemoryMedia::default()).give_frame(&ctx, 3.0, 0).unwrap();
        assert_eq!(out.resolution(), (2, 2));
        assert_eq!(out.pixel(1, 1), [0.0, 0.0, 0.0, 0.0]);
    }
}
