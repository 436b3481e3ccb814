//! Leaf strip sources: images, movies, movie clips, masks.
//!
//! Proxies are tried first. Images use the proxy tier matching the
//! render size; movies walk down the built tiers to the smallest before
//! decoding the original. Multi-view strips load every view, keep the
//! requested one and push the others through preprocessing into the
//! cache.

use std::path::{Path, PathBuf};

use log::{trace, warn};

use crate::entities::context::RenderContext;
use crate::entities::frame::Frame;
use crate::entities::scene::Scene;
use crate::entities::strip::{ProxySize, StereoLayout, Strip, StripKind, ViewsFormat};

use super::stack::RenderPass;

/// Proxy tier usable for `strip` at the context's render size.
pub fn proxy_size_for(ctx: &RenderContext, strip: &Strip) -> Option<ProxySize> {
    if !ctx.use_proxies {
        return None;
    }
    ctx.preview_render_size.proxy_size().filter(|size| strip.has_proxy(*size))
}

pub fn can_use_proxy(ctx: &RenderContext, strip: &Strip) -> bool {
    proxy_size_for(ctx, strip).is_some()
}

/// Views to load when the strip renders as multi-view.
fn multiview_count(ctx: &RenderContext, strip: &Strip) -> Option<usize> {
    (ctx.scene.use_multiview && strip.flags.use_views).then(|| ctx.scene.num_views())
}

/// File name of `view_id`: any view suffix on the stem is swapped for
/// the view's own (`shot_L.png` -> `shot_R.png`).
pub fn view_file_name(scene: &Scene, name: &str, view_id: usize) -> String {
    let Some(suffix) = scene.view_suffix(view_id) else {
        return name.to_string();
    };
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    };
    let prefix = scene
        .views
        .iter()
        .map(|v| v.suffix.as_str())
        .filter(|s| !s.is_empty())
        .find_map(|s| stem.strip_suffix(s))
        .unwrap_or(stem);
    format!("{}{}{}", prefix, suffix, ext)
}

fn view_path(scene: &Scene, path: &Path, view_id: usize) -> PathBuf {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => path.with_file_name(view_file_name(scene, name, view_id)),
        None => path.to_path_buf(),
    }
}

/// Split a packed stereo frame into `total` views (left, right, then copies).
fn split_stereo(frame: Option<Frame>, layout: StereoLayout, total: usize) -> Vec<Option<Frame>> {
    let Some(frame) = frame else {
        return vec![None; total];
    };
    let (w, h) = frame.resolution();
    let (left, right) = match layout {
        StereoLayout::SideBySide if w >= 2 => (
            frame.cropped(0, 0, w / 2 - 1, h.saturating_sub(1)),
            frame.cropped(w / 2, 0, w - 1, h.saturating_sub(1)),
        ),
        StereoLayout::TopBottom if h >= 2 => (
            frame.cropped(0, 0, w.saturating_sub(1), h / 2 - 1),
            frame.cropped(0, h / 2, w.saturating_sub(1), h - 1),
        ),
        _ => (frame.clone(), frame),
    };
    let mut views = vec![Some(left), Some(right)];
    views.resize(total.max(1), None);
    views
}

impl RenderPass<'_> {
    /// Keep the context's view; preprocess and cache the others.
    fn finish_views(&self, ctx: &RenderContext, strip: &Strip, frame: f32, mut views: Vec<Option<Frame>>) -> Option<Frame> {
        for (view_id, view) in views.iter_mut().enumerate() {
            if view_id == ctx.view_id {
                continue;
            }
            if let Some(image) = view.take() {
                let mut local = ctx.clone();
                local.view_id = view_id;
                self.preprocess_ibuf(&local, strip, image, frame, true, false);
            }
        }
        views.get_mut(ctx.view_id).and_then(Option::take)
    }

    pub(crate) fn render_image_strip(
        &self,
        ctx: &RenderContext,
        strip: &Strip,
        frame_index: f32,
        frame: f32,
        is_proxy: &mut bool,
    ) -> Option<Frame> {
        let StripKind::Image { dir, files } = &strip.kind else {
            return None;
        };
        if frame_index < 0.0 {
            return None;
        }
        let slot = frame_index as i32 + strip.anim_startofs;
        let file = files.get(usize::try_from(slot).ok()?)?;

        if let Some(size) = proxy_size_for(ctx, strip)
            && let Some(proxy) = self.engine.backends.proxy.fetch_proxy(strip, slot, ctx.view_id, size)
        {
            trace!("Strip {}: proxy {}% at slot {}", strip.name, size.percent(), slot);
            *is_proxy = true;
            return Some(proxy);
        }

        let media = &self.engine.backends.media;
        let Some(total) = multiview_count(ctx, strip) else {
            return media.load_image(&dir.join(file));
        };
        let views = match strip.views_format {
            ViewsFormat::Individual => (0..total)
                .map(|view_id| media.load_image(&dir.join(view_file_name(&ctx.scene, file, view_id))))
                .collect(),
            ViewsFormat::Stereo3d(layout) => split_stereo(media.load_image(&dir.join(file)), layout, total),
        };
        self.finish_views(ctx, strip, frame, views)
    }

    /// One movie view: proxies largest to smallest, then the decoder.
    #[allow(clippy::too_many_arguments)]
    fn movie_view(
        &self,
        ctx: &RenderContext,
        strip: &Strip,
        path: &Path,
        stream: usize,
        view_id: usize,
        slot: i32,
        is_proxy: &mut bool,
    ) -> Option<Frame> {
        if let Some(requested) = proxy_size_for(ctx, strip) {
            let tiers = ProxySize::DESCENDING
                .into_iter()
                .filter(|size| *size <= requested && strip.has_proxy(*size));
            for size in tiers {
                if let Some(proxy) = self.engine.backends.proxy.fetch_proxy(strip, slot, view_id, size) {
                    trace!("Strip {}: movie proxy {}% at {}", strip.name, size.percent(), slot);
                    *is_proxy = true;
                    return Some(proxy);
                }
            }
        }

        let index = usize::try_from(slot).ok()?;
        let media = &self.engine.backends.media;
        self.engine
            .media
            .with_decoder(strip.uuid, view_id, || media.open_movie(path, stream), |decoder| decoder.decode(index))
            .flatten()
    }

    pub(crate) fn render_movie_strip(
        &self,
        ctx: &RenderContext,
        strip: &Strip,
        frame_index: f32,
        frame: f32,
        is_proxy: &mut bool,
    ) -> Option<Frame> {
        let StripKind::Movie { path, stream } = &strip.kind else {
            return None;
        };
        if frame_index < 0.0 {
            return None;
        }
        let slot = frame_index as i32 + strip.anim_startofs;

        let Some(total) = multiview_count(ctx, strip) else {
            return self.movie_view(ctx, strip, path, *stream, 0, slot, is_proxy);
        };
        let views = match strip.views_format {
            ViewsFormat::Individual => (0..total)
                .map(|view_id| {
                    let view_path = view_path(&ctx.scene, path, view_id);
                    self.movie_view(ctx, strip, &view_path, *stream, view_id, slot, is_proxy)
                })
                .collect(),
            ViewsFormat::Stereo3d(layout) => {
                split_stereo(self.movie_view(ctx, strip, path, *stream, 0, slot, is_proxy), layout, total)
            }
        };
        self.finish_views(ctx, strip, frame, views)
    }

    pub(crate) fn render_movieclip_strip(
        &self,
        ctx: &RenderContext,
        strip: &Strip,
        frame_index: i32,
        is_proxy: &mut bool,
    ) -> Option<Frame> {
        let StripKind::MovieClip { clip, undistorted, stabilized } = &strip.kind else {
            return None;
        };
        let proxy = proxy_size_for(ctx, strip);
        let frame = self.engine.backends.clips.fetch_clip(
            clip,
            frame_index + strip.anim_startofs,
            proxy,
            *undistorted,
            *stabilized,
        )?;
        if proxy.is_some() {
            *is_proxy = true;
        }
        Some(frame)
    }

    /// Mask coverage replicated into opaque RGBA.
    pub(crate) fn render_mask_strip(&self, ctx: &RenderContext, strip: &Strip, frame_index: f32) -> Option<Frame> {
        let StripKind::Mask { mask } = &strip.kind else {
            return None;
        };
        let (w, h) = ctx.rect();
        let coverage = self.engine.backends.masks.rasterize(mask, frame_index, w, h)?;
        if coverage.len() != w * h {
            warn!("Mask {}: rasterizer returned {} values for {}x{}", mask, coverage.len(), w, h);
            return None;
        }

        let frame = if strip.flags.make_float {
            let buffer = coverage.iter().flat_map(|&v| [v, v, v, 1.0]).collect();
            Frame::from_f32_buffer(buffer, w, h)
        } else {
            let buffer = coverage
                .iter()
                .flat_map(|&v| {
                    let b = (v.clamp(0.0, 1.0) * 255.0) as u8;
                    [b, b, b, 255]
                })
                .collect();
            Frame::from_u8_buffer(buffer, w, h)
        };
        Some(frame)
    }
}
