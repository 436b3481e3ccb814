//! Per-strip image preprocessing.
//!
//! Steps run in a fixed order: de-interlace, crop and transform into the
//! render rect, flips, saturation, float promotion, multiply, modifiers.

use log::trace;

use crate::entities::color;
use crate::entities::context::{CacheTier, RenderContext};
use crate::entities::frame::{Frame, Planes};
use crate::entities::modifiers::apply_stack;
use crate::entities::strip::{Strip, StripKind};
use crate::entities::transform::{build_strip_matrix, transform_frame, transparency_gained, CropRect};

use super::stack::RenderPass;

/// True when the strip's settings change its source pixels.
pub fn have_to_preprocess(ctx: &RenderContext, strip: &Strip) -> bool {
    if ctx.is_proxy_render {
        return false;
    }
    let flags = &strip.flags;
    if flags.filter_y || flags.flip_x || flags.flip_y || flags.make_float {
        return true;
    }
    if strip.crop.is_active() || strip.transform.is_active() {
        return true;
    }
    strip.effective_mul() != 1.0 || strip.saturation != 1.0 || !strip.modifiers.is_empty()
}

/// Sources produced at render size already; only proxies and these are
/// not scaled by the preview factor.
fn need_scale_to_render_size(strip: &Strip, is_proxy: bool) -> bool {
    if is_proxy {
        return true;
    }
    match &strip.kind {
        StripKind::Effect { .. } | StripKind::Mask { .. } | StripKind::Meta { .. } => true,
        StripKind::Scene { use_strips, .. } => *use_strips,
        _ => false,
    }
}

/// Crop and transform `input` into the render rect.
fn transform_crop(ctx: &RenderContext, strip: &Strip, input: &Frame, is_proxy: bool) -> Frame {
    let preview_scale = ctx.preview_scale_factor();
    let scaled_source = need_scale_to_render_size(strip, is_proxy);
    let image_scale = if scaled_source { 1.0 } else { preview_scale };
    // Proxies are smaller than the source the crop was set on
    let crop_scale = if scaled_source { preview_scale } else { 1.0 };

    let out_size = ctx.rect();
    let matrix = build_strip_matrix(&strip.transform, input.resolution(), out_size, image_scale, preview_scale);
    let crop = CropRect::from_crop(&strip.crop, input.resolution(), crop_scale);

    let mut out = transform_frame(input, out_size, &matrix, &crop, strip.transform.filter);
    out.set_colorspace(input.colorspace());
    out.copy_metadata_from(input);
    if transparency_gained(&matrix, &crop, out_size) {
        out.set_planes(Planes::Rgba);
    } else {
        out.set_planes(input.planes());
    }
    out
}

/// Apply the strip's preprocessing steps to `ibuf`.
pub fn input_preprocess(ctx: &RenderContext, strip: &Strip, frame: f32, mut ibuf: Frame, is_proxy: bool) -> Frame {
    if strip.flags.filter_y && !matches!(strip.kind, StripKind::Movie { .. } | StripKind::MovieClip { .. }) {
        ibuf.filter_y();
    }

    if strip.crop.is_active() || strip.transform.is_active() || ibuf.resolution() != ctx.rect() {
        ibuf = transform_crop(ctx, strip, &ibuf, is_proxy);
    }

    if strip.flags.flip_x {
        ibuf.flip_x();
    }
    if strip.flags.flip_y {
        ibuf.flip_y();
    }

    if strip.saturation != 1.0 {
        color::saturation(&mut ibuf, strip.saturation);
    }

    if strip.flags.make_float {
        ibuf.make_float();
    }

    let mul = strip.effective_mul();
    if mul != 1.0 {
        ibuf.multiply(mul);
    }

    if !strip.modifiers.is_empty()
        && let Some(mut modified) = apply_stack(&ibuf, &strip.modifiers)
    {
        modified.copy_metadata_from(&ibuf);
        ibuf = modified;
    }

    trace!("Preprocessed strip {} at {}", strip.name, frame);
    ibuf
}

impl RenderPass<'_> {
    /// Cache the raw buffer, preprocess when needed, cache the result.
    ///
    /// A source not at render size is always preprocessed outside proxy
    /// renders. Proxies and effect outputs skip the raw tier.
    pub fn preprocess_ibuf(
        &self,
        ctx: &RenderContext,
        strip: &Strip,
        ibuf: Frame,
        frame: f32,
        mut use_preprocess: bool,
        is_proxy: bool,
    ) -> Frame {
        if !ctx.is_proxy_render && ibuf.resolution() != ctx.rect() {
            use_preprocess = true;
        }

        if !is_proxy && !strip.is_effect() {
            self.engine.cache_put(ctx, strip.uuid, frame, CacheTier::Raw, &ibuf);
        }

        let ibuf = if use_preprocess {
            input_preprocess(ctx, strip, frame, ibuf, is_proxy)
        } else {
            ibuf
        };

        self.engine.cache_put(ctx, strip.uuid, frame, CacheTier::Preprocessed, &ibuf);
        ibuf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::modifiers::{Modifier, ModifierKind};
    use crate::entities::scene::{Scene, SceneRegistry};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn ctx(w: usize, h: usize) -> RenderContext {
        let mut registry = SceneRegistry::new();
        let scene = registry.insert(Scene::new("s", w, h));
        RenderContext::new(scene, Arc::new(registry)).with_size(w, h)
    }

    fn image_strip() -> Strip {
        Strip::new(
            "img",
            StripKind::Image { dir: PathBuf::from("/tmp"), files: vec!["a.png".into()] },
            1,
            0,
            10,
        )
    }

    fn gradient(w: usize, h: usize) -> Frame {
        let mut buffer = Vec::with_capacity(w * h * 4);
        for y in 0..h {
            for x in 0..w {
                buffer.extend_from_slice(&[(x * 40) as u8, (y * 40) as u8, 100, 255]);
            }
        }
        Frame::from_u8_buffer(buffer, w, h)
    }

    #[test]
    fn test_have_to_preprocess() {
        let ctx = ctx(4, 4);
        let mut strip = image_strip();
        assert!(!have_to_preprocess(&ctx, &strip));

        strip.saturation = 0.5;
        assert!(have_to_preprocess(&ctx, &strip));

        strip.saturation = 1.0;
        strip.modifiers.push(Modifier::new(
            "bc",
            ModifierKind::BrightContrast { bright: 10.0, contrast: 0.0 },
        ));
        assert!(have_to_preprocess(&ctx, &strip));

        let mut proxy_ctx = ctx.clone();
        proxy_ctx.is_proxy_render = true;
        assert!(!have_to_preprocess(&proxy_ctx, &strip));
    }

    /// Neutral settings at render size leave pixels untouched.
    #[test]
    fn test_neutral_preprocess_round_trip() {
        let ctx = ctx(4, 3);
        let strip = image_strip();
        let input = gradient(4, 3);
        let out = input_preprocess(&ctx, &strip, 1.0, input.clone(), false);
        assert_eq!(out.resolution(), input.resolution());
        assert_eq!(out.to_u8_vec(), input.to_u8_vec());
    }

    #[test]
    fn test_resize_to_render_rect() {
        let ctx = ctx(8, 6);
        let strip = image_strip();
        let out = input_preprocess(&ctx, &strip, 1.0, gradient(4, 3), false);
        assert_eq!(out.resolution(), (8, 6));
        assert!(!out.is_float());
    }

    #[test]
    fn test_make_float_then_multiply() {
        let ctx = ctx(2, 2);
        let mut strip = image_strip();
        strip.flags.make_float = true;
        strip.mul = 0.5;
        let out = input_preprocess(&ctx, &strip, 1.0, Frame::solid_u8(2, 2, [255, 255, 255, 255]), false);
        assert!(out.is_float());
        let px = out.pixel(1, 1);
        assert!((px[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_flip_x() {
        let ctx = ctx(4, 3);
        let mut strip = image_strip();
        strip.flags.flip_x = true;
        let input = gradient(4, 3);
        let out = input_preprocess(&ctx, &strip, 1.0, input.clone(), false);
        assert_eq!(out.pixel(0, 0), input.pixel(3, 0));
    }
}
