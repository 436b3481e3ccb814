//! Strip thumbnails for timeline drawing.
//!
//! Thumbnails are source images (no preprocessing) scaled so the longer
//! side is `THUMB_SIZE`, cached in the Thumbnail tier at whole frames.
//! A strip whose source cannot be read is flagged so callers stop asking.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace};

use crate::config::THUMB_SIZE;
use crate::entities::context::{CacheTier, RenderContext, RenderState, TaskId};
use crate::entities::frame::Frame;
use crate::entities::strip::Strip;
use crate::entities::timeline::Timeline;
use crate::entities::transform::scale_nearest;

use super::sequencer::Sequencer;
use super::stack::RenderPass;

/// Timeline frame range visible in the strip area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewArea {
    pub xmin: f32,
    pub xmax: f32,
}

/// Pixel rectangle of a thumbnail, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailCrop {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

/// First thumbnail frame: the left handle when visible, else the step
/// grid anchored at the content start.
pub fn thumbnail_first_frame(strip: &Strip, frame_step: f32, view: &ViewArea) -> f32 {
    let left = strip.left_handle() as f32;
    let start = strip.start as f32;
    let first_drawable = left.max(start).max(view.xmin);
    if first_drawable == left {
        return left;
    }
    start + ((first_drawable - start) / frame_step).trunc() * frame_step
}

/// Frame after `last_frame`; leaving the left handle snaps back to the grid.
pub fn thumbnail_next_frame(strip: &Strip, last_frame: f32, frame_step: f32) -> f32 {
    let left = strip.left_handle() as f32;
    if last_frame == left {
        let start = strip.start as f32;
        return start + (((left - start) / frame_step).trunc() + 1.0) * frame_step;
    }
    last_frame + frame_step
}

/// Step of the base set: at most 30 thumbnails, one per 100 frames.
pub fn guaranteed_frame_step(strip: &Strip) -> i32 {
    let content_len = strip.right_handle().min(strip.content_end()) - strip.left_handle().max(strip.start);
    let count = (content_len / 100).min(30);
    if count <= 0 {
        return content_len;
    }
    content_len / count
}

fn thumbnail_context(ctx: &RenderContext) -> RenderContext {
    ctx.clone().with_task(TaskId::Thumbnail)
}

impl RenderPass<'_> {
    /// Source image of `strip` downscaled to thumbnail size.
    pub(crate) fn uncached_thumbnail(
        &self,
        ctx: &RenderContext,
        state: &mut RenderState,
        timeline: &Timeline,
        strip: &Strip,
        frame: f32,
    ) -> Option<Frame> {
        let mut is_proxy = false;
        let ibuf = self.render_strip_uncached(ctx, state, timeline, strip, frame, &mut is_proxy)?;
        let (w, h) = ibuf.resolution();
        if w == 0 || h == 0 {
            return None;
        }
        let aspect = w as f32 / h as f32;
        let (tw, th) = if w > h {
            (THUMB_SIZE, (THUMB_SIZE as f32 / aspect).round() as usize)
        } else {
            ((THUMB_SIZE as f32 * aspect).round() as usize, THUMB_SIZE)
        };
        Some(scale_nearest(&ibuf, tw.max(1), th.max(1)))
    }
}

impl Sequencer {
    /// Render one missing thumbnail. Outer `None`: cancelled while
    /// waiting for the render lock.
    fn fill_thumbnail(
        &self,
        ctx: &RenderContext,
        state: &mut RenderState,
        timeline: &Timeline,
        strip: &Strip,
        frame: f32,
        stop: &AtomicBool,
    ) -> Option<Option<Frame>> {
        let thumb = self
            .core
            .with_pass(Some(stop), |pass| pass.uncached_thumbnail(ctx, state, timeline, strip, frame))?;
        if let Some(thumb) = &thumb {
            self.core.engine.cache_put(ctx, strip.uuid, frame, CacheTier::Thumbnail, thumb);
        }
        Some(thumb)
    }

    /// Thumbnails from `start_frame` every `frame_step` frames up to the
    /// strip end or just past the view.
    ///
    /// Stops when `stop` is raised. A source that cannot be read sets the
    /// strip's skip flag and ends the loop.
    #[allow(clippy::too_many_arguments)]
    pub fn render_thumbnails(
        &self,
        ctx: &RenderContext,
        timeline: &Timeline,
        strip: &Strip,
        start_frame: f32,
        frame_step: f32,
        view: &ViewArea,
        stop: &AtomicBool,
    ) {
        if frame_step <= 0.0 {
            return;
        }
        let ctx = thumbnail_context(ctx);
        let end = if strip.has_right_still_frames() { strip.content_end() } else { strip.right_handle() } as f32;
        let upper = if end > view.xmax { view.xmax + frame_step } else { end };

        let mut state = RenderState::new();
        let mut frame = start_frame;
        while frame < upper && !stop.load(Ordering::Relaxed) {
            let at = frame.round();
            if self.core.engine.cache_get(&ctx, strip.uuid, at, CacheTier::Thumbnail).is_none() {
                match self.fill_thumbnail(&ctx, &mut state, timeline, strip, at, stop) {
                    None => return,
                    Some(Some(_)) => strip.skip_thumbnails.set(false),
                    Some(None) => {
                        debug!("Strip {}: source unreadable, thumbnails disabled", strip.name);
                        strip.skip_thumbnails.set(true);
                        return;
                    }
                }
            }
            frame = thumbnail_next_frame(strip, frame, frame_step);
        }
    }

    /// Sparse thumbnails over the whole strip, drawn while the detailed
    /// set is still rendering.
    pub fn render_thumbnail_base_set(&self, ctx: &RenderContext, timeline: &Timeline, strip: &Strip, stop: &AtomicBool) {
        let ctx = thumbnail_context(ctx);
        let step = guaranteed_frame_step(strip);
        let mut state = RenderState::new();
        let mut frame = strip.left_handle();

        while frame < strip.right_handle() && !stop.load(Ordering::Relaxed) {
            let at = frame as f32;
            if self.core.engine.cache_get(&ctx, strip.uuid, at, CacheTier::Thumbnail).is_none()
                && self.fill_thumbnail(&ctx, &mut state, timeline, strip, at, stop).is_none()
            {
                return;
            }
            if step <= 0 {
                return;
            }
            frame += step;
        }
        trace!("Strip {}: base thumbnails every {} frames", strip.name, step);
    }

    /// Cached thumbnail at `frame`, optionally cropped (bounds clamped).
    pub fn get_thumbnail(&self, ctx: &RenderContext, strip: &Strip, frame: f32, crop: Option<ThumbnailCrop>) -> Option<Frame> {
        let ctx = thumbnail_context(ctx);
        let thumb = self.core.engine.cache_get(&ctx, strip.uuid, frame.round(), CacheTier::Thumbnail)?;
        let Some(mut crop) = crop else {
            return Some(thumb);
        };

        let (w, h) = thumb.resolution();
        if crop.xmin < 0 || crop.ymin < 0 {
            crop.xmin = 0;
            crop.ymin = 0;
        }
        if crop.xmax >= w as i32 || crop.ymax >= h as i32 {
            crop.xmax = w as i32 - 1;
            crop.ymax = h as i32 - 1;
        }
        Some(thumb.cropped(
            crop.xmin.max(0) as usize,
            crop.ymin.max(0) as usize,
            crop.xmax.max(0) as usize,
            crop.ymax.max(0) as usize,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::*;

    #[test]
    fn test_first_and_next_frame() {
        let mut strip = image_strip("a.png", 1, 10, 100);
        strip.startofs = 5;
        let view = ViewArea { xmin: 0.0, xmax: 200.0 };
        // Handle visible
        assert_eq!(thumbnail_first_frame(&strip, 20.0, &view), 15.0);
        assert_eq!(thumbnail_next_frame(&strip, 15.0, 20.0), 30.0);
        assert_eq!(thumbnail_next_frame(&strip, 30.0, 20.0), 50.0);

        let scrolled = ViewArea { xmin: 47.0, xmax: 200.0 };
        assert_eq!(thumbnail_first_frame(&strip, 20.0, &scrolled), 30.0);
    }

    #[test]
    fn test_guaranteed_frame_step() {
        assert_eq!(guaranteed_frame_step(&image_strip("a.png", 1, 0, 50)), 50);
        assert_eq!(guaranteed_frame_step(&image_strip("a.png", 1, 0, 450)), 112);
        assert_eq!(guaranteed_frame_step(&image_strip("a.png", 1, 0, 10_000)), 333);
    }

    /// Missing source flags the strip and leaves no thumbnail behind.
    #[test]
    fn test_missing_source_skips_thumbnails() {
        let scene = scene_with(vec![image_strip("missing.png", 1, 0, 10)]);
        let ctx = context_for(scene, 64, 32);
        let sequencer = sequencer_with(MemoryMedia::default());
        let strip = &ctx.scene.editing.timeline.strips[0];
        let stop = AtomicBool::new(false);
        let view = ViewArea { xmin: 0.0, xmax: 10.0 };

        sequencer.render_thumbnails(&ctx, &ctx.scene.editing.timeline, strip, 0.0, 2.0, &view, &stop);
        assert!(strip.skip_thumbnails.get());
        assert!(sequencer.get_thumbnail(&ctx, strip, 0.0, None).is_none());
    }

    #[test]
    fn test_thumbnail_size_and_crop() {
        let media = MemoryMedia::default();
        media.insert("wide.png", Frame::solid_u8(512, 128, [9, 9, 9, 255]));
        let scene = scene_with(vec![image_strip("wide.png", 1, 0, 1)]);
        let ctx = context_for(scene, 512, 128);
        let sequencer = sequencer_with(media);
        let strip = &ctx.scene.editing.timeline.strips[0];
        let stop = AtomicBool::new(false);
        let view = ViewArea { xmin: 0.0, xmax: 10.0 };

        sequencer.render_thumbnails(&ctx, &ctx.scene.editing.timeline, strip, 0.0, 1.0, &view, &stop);
        assert!(!strip.skip_thumbnails.get());
        let thumb = sequencer.get_thumbnail(&ctx, strip, 0.0, None).unwrap();
        assert_eq!(thumb.resolution(), (THUMB_SIZE, THUMB_SIZE / 4));

        let crop = ThumbnailCrop { xmin: 10, ymin: 0, xmax: 1000, ymax: 20 };
        let cropped = sequencer.get_thumbnail(&ctx, strip, 0.0, Some(crop)).unwrap();
        assert_eq!(cropped.resolution(), (THUMB_SIZE - 10, THUMB_SIZE / 4));
    }

    #[test]
    fn test_stop_flag_ends_loop() {
        let media = MemoryMedia::default();
        media.insert("a.png", Frame::solid_u8(8, 8, [1, 2, 3, 255]));
        let scene = scene_with(vec![image_strip("a.png", 1, 0, 10)]);
        let ctx = context_for(scene, 8, 8);
        let sequencer = sequencer_with(media.clone());
        let strip = &ctx.scene.editing.timeline.strips[0];
        let stop = AtomicBool::new(true);

        sequencer.render_thumbnail_base_set(&ctx, &ctx.scene.editing.timeline, strip, &stop);
        assert_eq!(media.loads("a.png"), 0);
        assert!(sequencer.get_thumbnail(&ctx, strip, 0.0, None).is_none());
    }
}
