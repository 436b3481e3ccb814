//! Strip rendering and stack compositing.
//!
//! `RenderPass` bundles what one locked render needs: the engine, the
//! compositor for nested stacks, and the render token. `render_strip`
//! walks the cache tiers (preprocessed, raw) before rendering a source
//! and preprocessing it.
//!
//! The compositor scans the visible strips top-down to find the lowest
//! layer that matters (cached composite, replace blend, opaque input,
//! or the bottom), then blends back up, caching the running composite
//! per strip.

use log::trace;

use crate::config::MAX_STRIPS;
use crate::core::render_lock::RenderToken;
use crate::entities::context::{CacheTier, RenderContext, RenderState};
use crate::entities::effects::{EarlyOut, EffectArgs, EffectHandle, EffectType};
use crate::entities::frame::{Frame, Planes};
use crate::entities::strip::{BlendMode, Strip, StripKind};
use crate::entities::timeline::Timeline;

use super::effect::execute_effect;
use super::engine::RenderEngine;
use super::preprocess::have_to_preprocess;
use super::source::can_use_proxy;

/// Composites the visible strips of one timeline level.
pub trait StackCompositor: Send + Sync {
    /// `strips` are sorted by ascending channel. `None` when empty.
    fn render_stack(
        &self,
        pass: &RenderPass,
        ctx: &RenderContext,
        state: &mut RenderState,
        timeline: &Timeline,
        strips: &[&Strip],
        frame: f32,
    ) -> Option<Frame>;
}

/// One render under the render lock.
pub struct RenderPass<'a> {
    pub engine: &'a RenderEngine,
    pub compositor: &'a dyn StackCompositor,
    /// Proof of exclusive access
    pub token: &'a RenderToken<'a>,
}

impl<'a> RenderPass<'a> {
    pub fn new(engine: &'a RenderEngine, compositor: &'a dyn StackCompositor, token: &'a RenderToken<'a>) -> Self {
        Self { engine, compositor, token }
    }

    /// Composite `timeline` at `frame`, honoring the channel limit.
    ///
    /// # Panics
    /// More than `MAX_STRIPS` visible strips means a corrupted timeline.
    pub fn render_timeline(
        &self,
        ctx: &RenderContext,
        state: &mut RenderState,
        timeline: &Timeline,
        frame: f32,
        chanshown: i32,
    ) -> Option<Frame> {
        let strips = timeline.rendered_strips(frame, chanshown);
        assert!(
            strips.len() <= MAX_STRIPS,
            "{} strips visible at frame {}, limit is {}",
            strips.len(),
            frame,
            MAX_STRIPS
        );
        if strips.is_empty() {
            return None;
        }
        self.compositor.render_stack(self, ctx, state, timeline, &strips, frame)
    }

    /// Rendered and preprocessed strip image; blank when there is no data.
    pub fn render_strip(
        &self,
        ctx: &RenderContext,
        state: &mut RenderState,
        timeline: &Timeline,
        strip: &Strip,
        frame: f32,
    ) -> Frame {
        if let Some(hit) = self.engine.cache_get(ctx, strip.uuid, frame, CacheTier::Preprocessed) {
            return hit;
        }

        let mut is_proxy = false;
        // Proxies are never cached as raw
        let mut ibuf = if can_use_proxy(ctx, strip) {
            None
        } else {
            self.engine.cache_get(ctx, strip.uuid, frame, CacheTier::Raw)
        };
        if ibuf.is_none() {
            ibuf = self.render_strip_uncached(ctx, state, timeline, strip, frame, &mut is_proxy);
        }

        match ibuf {
            Some(ibuf) => {
                let use_preprocess = have_to_preprocess(ctx, strip);
                self.preprocess_ibuf(ctx, strip, ibuf, frame, use_preprocess, is_proxy)
            }
            None => {
                trace!("Strip {}: no data at {}", strip.name, frame);
                RenderEngine::blank(ctx)
            }
        }
    }

    /// Source image of `strip`, without caching or preprocessing.
    pub(crate) fn render_strip_uncached(
        &self,
        ctx: &RenderContext,
        state: &mut RenderState,
        timeline: &Timeline,
        strip: &Strip,
        frame: f32,
        is_proxy: &mut bool,
    ) -> Option<Frame> {
        let frame_index = strip.give_frame_index(frame);
        match &strip.kind {
            StripKind::Meta { timeline: inner } => {
                self.render_timeline(ctx, state, inner, strip.start as f32 + frame_index, 0)
            }
            StripKind::Scene { scene, use_strips: true, .. } => {
                self.render_scene_strips(ctx, state, *scene, frame_index)
            }
            StripKind::Scene { scene, camera, .. } => {
                self.render_scene_strip(ctx, state, strip, *scene, camera.as_deref(), frame_index, frame)
            }
            StripKind::Effect { .. } => self.render_effect_strip(ctx, state, timeline, strip, frame),
            StripKind::Image { .. } => self.render_image_strip(ctx, strip, frame_index, frame, is_proxy),
            StripKind::Movie { .. } => self.render_movie_strip(ctx, strip, frame_index, frame, is_proxy),
            StripKind::MovieClip { .. } => {
                self.render_movieclip_strip(ctx, strip, frame_index.round() as i32, is_proxy)
            }
            StripKind::Mask { .. } => self.render_mask_strip(ctx, strip, frame_index),
            StripKind::Sound => None,
        }
    }

    /// Another scene's own strips, rendered with caching off.
    fn render_scene_strips(
        &self,
        ctx: &RenderContext,
        state: &mut RenderState,
        scene_id: uuid::Uuid,
        frame_index: f32,
    ) -> Option<Frame> {
        if scene_id == ctx.scene.uuid {
            return None;
        }
        let target = ctx.scenes.get(scene_id)?;
        state.with_parent(target.uuid, |state| {
            let mut local = ctx.clone();
            local.scene = std::sync::Arc::clone(&target);
            local.skip_cache = true;
            let frame = frame_index + target.sfra as f32;
            self.render_timeline(&local, state, &target.editing.timeline, frame, 0)
        })
    }
}

/// Early-out of a strip's blend mode in stack terms: input 1 is the
/// composite below, input 2 the strip.
pub fn blend_early_out(strip: &Strip) -> EarlyOut {
    let handle = EffectType::for_blend(strip.blend_mode).handle();
    let early_out = handle.early_out(strip.blend_opacity / 100.0);
    match early_out {
        EarlyOut::DoEffect | EarlyOut::NoInput => early_out,
        _ if strip.blend_mode.swaps_inputs() => early_out.swapped(),
        _ => early_out,
    }
}

/// Blend `strip` (`fg`) over the composite `bg` with its blend mode.
fn apply_blend(ctx: &RenderContext, strip: &Strip, frame: f32, bg: &Frame, fg: &Frame) -> Frame {
    let handle = EffectType::for_blend(strip.blend_mode).handle();
    let inputs = if strip.blend_mode.swaps_inputs() {
        [Some(fg), Some(bg), None]
    } else {
        [Some(bg), Some(fg), None]
    };
    let args = EffectArgs { strip, frame, fac: strip.blend_opacity / 100.0, rect: ctx.rect(), inputs };
    execute_effect(&handle, &args).unwrap_or_else(|| bg.clone())
}

/// The stack compositor.
#[derive(Debug, Default, Clone, Copy)]
pub struct StripStack;

impl StackCompositor for StripStack {
    fn render_stack(
        &self,
        pass: &RenderPass,
        ctx: &RenderContext,
        state: &mut RenderState,
        timeline: &Timeline,
        strips: &[&Strip],
        frame: f32,
    ) -> Option<Frame> {
        if strips.is_empty() {
            return None;
        }
        let engine = pass.engine;
        let mut out: Option<Frame> = None;
        let mut i = strips.len() - 1;

        loop {
            let strip = strips[i];

            if let Some(cached) = engine.cache_get(ctx, strip.uuid, frame, CacheTier::Composite) {
                trace!("Stack: composite hit at {} ({})", strip.name, i);
                out = Some(cached);
                break;
            }

            if strip.blend_mode == BlendMode::Replace {
                out = Some(pass.render_strip(ctx, state, timeline, strip, frame));
                break;
            }

            let mut early_out = blend_early_out(strip);
            let mut rendered: Option<Frame> = None;

            // Opaque alpha-over at full opacity covers everything below
            if strip.blend_mode == BlendMode::AlphaOver
                && early_out == EarlyOut::DoEffect
                && strip.blend_opacity == 100.0
            {
                let test = pass.render_strip(ctx, state, timeline, strip, frame);
                early_out = if matches!(test.planes(), Planes::Bw | Planes::Rgb) {
                    EarlyOut::UseInput2
                } else {
                    EarlyOut::DoEffect
                };
                rendered = Some(test);
            }

            match early_out {
                EarlyOut::NoInput | EarlyOut::UseInput2 => {
                    out = Some(rendered.unwrap_or_else(|| pass.render_strip(ctx, state, timeline, strip, frame)));
                }
                EarlyOut::UseInput1 => {
                    if i == 0 {
                        out = Some(RenderEngine::blank(ctx));
                    }
                }
                EarlyOut::DoEffect => {
                    if i == 0 {
                        let fg = rendered.unwrap_or_else(|| pass.render_strip(ctx, state, timeline, strip, frame));
                        let blended = apply_blend(ctx, strip, frame, &RenderEngine::blank(ctx), &fg);
                        engine.cache_put(ctx, strip.uuid, frame, CacheTier::Composite, &blended);
                        out = Some(blended);
                    }
                }
            }
            trace!("Stack: {} ({}) {:?}", strip.name, i, early_out);

            if out.is_some() || i == 0 {
                break;
            }
            i -= 1;
        }

        let mut out = out?;
        for strip in &strips[i + 1..] {
            if blend_early_out(strip) == EarlyOut::DoEffect {
                let fg = pass.render_strip(ctx, state, timeline, strip, frame);
                out = apply_blend(ctx, strip, frame, &out, &fg);
            }
            engine.cache_put(ctx, strip.uuid, frame, CacheTier::Composite, &out);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::{MemoryMedia, context_for, image_strip, scene_with, sequencer_with};
    use std::path::PathBuf;

    fn strip(mode: BlendMode, opacity: f32) -> Strip {
        Strip::new(
            "s",
            StripKind::Image { dir: PathBuf::from("/tmp"), files: vec![] },
            1,
            0,
            1,
        )
        .with_blend(mode, opacity)
    }

    #[test]
    fn test_blend_early_out_swaps_alpha_family() {
        assert_eq!(blend_early_out(&strip(BlendMode::AlphaOver, 0.0)), EarlyOut::UseInput1);
        assert_eq!(blend_early_out(&strip(BlendMode::Add, 0.0)), EarlyOut::UseInput1);
        assert_eq!(blend_early_out(&strip(BlendMode::AlphaOver, 50.0)), EarlyOut::DoEffect);
        assert_eq!(blend_early_out(&strip(BlendMode::Cross, 100.0)), EarlyOut::UseInput2);
    }

    /// Alpha-over input order puts the strip over the composite.
    #[test]
    fn test_apply_blend_alpha_over() {
        let ctx = crate::render::testing::context(2, 2);
        let s = strip(BlendMode::AlphaOver, 50.0);
        let bg = Frame::solid_f32(2, 2, [0.0, 0.0, 1.0, 1.0]);
        let fg = Frame::solid_f32(2, 2, [1.0, 0.0, 0.0, 1.0]);
        let out = apply_blend(&ctx, &s, 1.0, &bg, &fg);
        let px = out.pixel(0, 0);
        assert!((px[0] - 0.5).abs() < 1e-5);
        assert!((px[2] - 0.5).abs() < 1e-5);
        assert!((px[3] - 1.0).abs() < 1e-5);
    }

    /// A cached composite ends the downward scan.
    #[test]
    fn test_composite_hit_stops_scan() {
        let media = MemoryMedia::default();
        media.insert("blue.png", Frame::solid_f32(2, 2, [0.0, 0.0, 1.0, 1.0]));
        media.insert("red.png", Frame::solid_f32(2, 2, [1.0, 0.0, 0.0, 1.0]));
        let top = image_strip("red.png", 2, 0, 10).with_blend(BlendMode::AlphaOver, 50.0);
        let ctx = context_for(scene_with(vec![image_strip("blue.png", 1, 0, 10), top.clone()]), 2, 2);
        let sequencer = sequencer_with(media.clone());

        let green = Frame::solid_f32(2, 2, [0.0, 1.0, 0.0, 1.0]);
        sequencer.engine().cache_put(&ctx, top.uuid, 4.0, CacheTier::Composite, &green);
        let out = sequencer.render_timeline(&ctx, &ctx.scene.editing.timeline, 4.0, 0).unwrap();

        assert_eq!(out.pixel(1, 1), [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(media.loads("blue.png"), 0);
        assert_eq!(media.loads("red.png"), 0);
    }

    /// Nothing to blend over at the bottom gives a blank frame.
    #[test]
    fn test_transparent_bottom_strip_is_blank() {
        let media = MemoryMedia::default();
        media.insert("red.png", Frame::solid_u8(3, 2, [255, 0, 0, 255]));
        let hidden = image_strip("red.png", 1, 0, 10).with_blend(BlendMode::AlphaOver, 0.0);
        let ctx = context_for(scene_with(vec![hidden]), 3, 2);
        let sequencer = sequencer_with(media.clone());

        let out = sequencer.give_frame(&ctx, 2.0, 0).unwrap();
        assert_eq!(out.resolution(), (3, 2));
        assert_eq!(out.pixel(2, 1), [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(media.loads("red.png"), 0);
    }

    /// An opaque strip alpha-over at full opacity hides the strips below.
    #[test]
    fn test_opaque_alpha_over_hides_below() {
        let media = MemoryMedia::default();
        media.insert("blue.png", Frame::solid_u8(2, 2, [0, 0, 255, 255]));
        media.insert("rgb.png", Frame::solid_u8(2, 2, [255, 0, 0, 255]).with_planes(Planes::Rgb));
        let ctx = context_for(
            scene_with(vec![
                image_strip("blue.png", 1, 0, 10),
                image_strip("rgb.png", 2, 0, 10).with_blend(BlendMode::AlphaOver, 100.0),
            ]),
            2,
            2,
        );
        let sequencer = sequencer_with(media.clone());

        let out = sequencer.give_frame(&ctx, 5.0, 0).unwrap();
        assert_eq!(out.pixel(0, 0), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(media.loads("rgb.png"), 1);
        assert_eq!(media.loads("blue.png"), 0);
    }

    /// A fractional cross renders both inputs and mixes them.
    #[test]
    fn test_effect_strip_partial_fac() {
        let media = MemoryMedia::default();
        media.insert("a.png", Frame::solid_f32(4, 4, [1.0, 0.0, 0.0, 1.0]));
        media.insert("b.png", Frame::solid_f32(4, 4, [0.0, 1.0, 0.0, 1.0]));
        let a = image_strip("a.png", 1, 0, 10);
        let b = image_strip("b.png", 2, 0, 10);
        let mut fx = Strip::new(
            "cross",
            StripKind::Effect { effect: EffectType::Cross, inputs: vec![a.uuid, b.uuid] },
            3,
            0,
            10,
        );
        fx.effect_fader = 0.5;
        let ctx = context_for(scene_with(vec![a, b, fx]), 4, 4);
        let sequencer = sequencer_with(media.clone());

        let out = sequencer.give_frame(&ctx, 3.0, 0).unwrap();
        let px = out.pixel(1, 2);
        assert!((px[0] - 0.5).abs() < 1e-5, "{:?}", px);
        assert!((px[1] - 0.5).abs() < 1e-5, "{:?}", px);
        assert!(px[2].abs() < 1e-5);
        assert!((px[3] - 1.0).abs() < 1e-5);
        assert_eq!(media.loads("a.png"), 1);
        assert_eq!(media.loads("b.png"), 1);
    }
}
