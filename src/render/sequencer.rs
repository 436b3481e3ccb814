//! Render orchestration: final frames, direct strip renders, prefetch.
//!
//! # Frame request
//!
//! ```text
//! give_frame(ctx, frame, chanshown)
//!   ├── active timeline (meta stack aware)
//!   ├── Final tier hit? ──────────────────────────> return
//!   ├── drop temp cache entries of other frames, close hidden decoders
//!   ├── [render lock] stack composite -> Final tier
//!   └── kick prefetch of the following frames
//! ```
//!
//! The shared half (`RenderCore`) lives behind an `Arc` so prefetch jobs
//! can render through it on worker threads.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::RenderSettings;
use crate::core::cache_man::CacheManager;
use crate::core::prefetch::Prefetcher;
use crate::core::render_lock::RenderLock;
use crate::entities::context::{CacheTier, RenderContext, RenderState, TaskId};
use crate::entities::frame::Frame;
use crate::entities::strip::{Strip, StripKind};
use crate::entities::timeline::Timeline;

use super::backends::Backends;
use super::engine::RenderEngine;
use super::stack::{RenderPass, StackCompositor, StripStack};

pub(super) struct RenderCore {
    pub(super) engine: RenderEngine,
    compositor: Box<dyn StackCompositor>,
    lock: RenderLock,
}

impl RenderCore {
    /// Run `f` holding the render lock. With `cancel`, the lock is taken
    /// in background mode and `None` means the wait was cancelled.
    pub(super) fn with_pass<R>(&self, cancel: Option<&AtomicBool>, f: impl FnOnce(&RenderPass) -> R) -> Option<R> {
        let token = match cancel {
            Some(cancel) => self.lock.lock_background(cancel)?,
            None => self.lock.lock(),
        };
        let pass = RenderPass::new(&self.engine, self.compositor.as_ref(), &token);
        Some(f(&pass))
    }

    fn give_frame(&self, ctx: &RenderContext, frame: f32, chanshown: i32, cancel: Option<&AtomicBool>) -> Option<Frame> {
        let scene = &ctx.scene;
        let (timeline, chanshown) = match scene.editing.active_timeline(chanshown) {
            Ok(active) => active,
            Err(e) => {
                warn!("Scene {}: {}", scene.name, e);
                return None;
            }
        };

        let top = timeline.rendered_strips(frame, chanshown).last().map(|s| s.uuid);
        let mut out = top.and_then(|id| self.engine.cache_get(ctx, id, frame, CacheTier::Final));

        self.engine.cache.invalidate_temp(scene.uuid, ctx.task_id, frame);
        self.engine.media.release_except(&scene.editing.timeline.visible_ids(frame));

        if let (Some(top), None) = (top, &out) {
            out = self
                .with_pass(cancel, |pass| {
                    let mut state = RenderState::new();
                    let result = pass.render_timeline(ctx, &mut state, timeline, frame, chanshown)?;
                    if ctx.is_prefetch_render {
                        self.engine.cache_put(ctx, top, frame, CacheTier::Final, &result);
                    } else {
                        self.engine.cache_put_if_absent(ctx, top, frame, CacheTier::Final, &result);
                    }
                    Some(result)
                })
                .flatten();
        }
        out
    }
}

/// Level of `timeline` (or a nested meta) holding `strip`.
fn owning_timeline(timeline: &Timeline, strip: uuid::Uuid) -> Option<&Timeline> {
    if timeline.get(strip).is_some() {
        return Some(timeline);
    }
    timeline.strips.iter().find_map(|s| match &s.kind {
        StripKind::Meta { timeline: inner } => owning_timeline(inner, strip),
        _ => None,
    })
}

pub struct Sequencer {
    pub(super) core: Arc<RenderCore>,
    prefetch: Option<Prefetcher>,
}

impl Sequencer {
    pub fn new(engine: RenderEngine, compositor: Box<dyn StackCompositor>) -> Self {
        Self {
            core: Arc::new(RenderCore { engine, compositor, lock: RenderLock::new() }),
            prefetch: None,
        }
    }

    pub fn with_prefetch(mut self, prefetch: Prefetcher) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    /// Cache, decoder pool and prefetch built from `settings`.
    pub fn from_settings(settings: &RenderSettings, backends: Backends) -> std::io::Result<Self> {
        let manager = Arc::new(CacheManager::from_settings(settings));
        let engine = RenderEngine::from_settings(settings, Arc::clone(&manager), backends);
        let mut sequencer = Self::new(engine, Box::new(StripStack));
        sequencer.prefetch = Prefetcher::from_settings(settings, manager)?;
        info!(
            "Sequencer ready: cache {} frames, prefetch {}",
            settings.cache_capacity,
            sequencer.prefetch.as_ref().map_or(0, Prefetcher::radius)
        );
        Ok(sequencer)
    }

    pub fn engine(&self) -> &RenderEngine {
        &self.core.engine
    }

    pub fn prefetcher(&self) -> Option<&Prefetcher> {
        self.prefetch.as_ref()
    }

    pub fn is_rendering(&self) -> bool {
        self.core.lock.is_locked()
    }

    /// Final composited frame of the context's scene.
    ///
    /// `chanshown > 0` limits rendering to channels up to it; negative
    /// values inside a meta show that many levels up. `None` when no
    /// strip is visible.
    pub fn give_frame(&self, ctx: &RenderContext, frame: f32, chanshown: i32) -> Option<Frame> {
        let out = self.core.give_frame(ctx, frame, chanshown, None);
        if !ctx.is_prefetch_render {
            self.kick_prefetch(ctx, frame, chanshown);
        }
        out
    }

    fn kick_prefetch(&self, ctx: &RenderContext, frame: f32, chanshown: i32) {
        let Some(prefetch) = &self.prefetch else {
            return;
        };
        let core = Arc::clone(&self.core);
        let mut prefetch_ctx = ctx.clone().with_task(TaskId::Prefetch);
        prefetch_ctx.is_prefetch_render = true;
        let render = Arc::new(move |f: f32, cancel: &AtomicBool| {
            core.give_frame(&prefetch_ctx, f, chanshown, Some(cancel)).is_some()
        });
        prefetch.kick(ctx.scene.uuid, frame, render);
    }

    /// One strip rendered and preprocessed on its own.
    pub fn render_strip_direct(&self, ctx: &RenderContext, strip: &Strip, frame: f32) -> Frame {
        let empty = Timeline::new();
        let timeline = owning_timeline(&ctx.scene.editing.timeline, strip.uuid).unwrap_or(&empty);
        self.core
            .with_pass(None, |pass| {
                let mut state = RenderState::new();
                pass.render_strip(ctx, &mut state, timeline, strip, frame)
            })
            .unwrap_or_else(|| RenderEngine::blank(ctx))
    }

    /// Composite of an arbitrary timeline, bypassing the Final tier.
    pub fn render_timeline(&self, ctx: &RenderContext, timeline: &Timeline, frame: f32, chanshown: i32) -> Option<Frame> {
        self.core
            .with_pass(None, |pass| {
                let mut state = RenderState::new();
                pass.render_timeline(ctx, &mut state, timeline, frame, chanshown)
            })
            .flatten()
    }

    /// Drop every cached frame and stop pending prefetch work.
    pub fn invalidate(&self) {
        if let Some(prefetch) = &self.prefetch {
            prefetch.cancel();
        }
        self.core.engine.cache.clear_all();
        debug!("Sequencer caches invalidated");
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("engine", &self.core.engine)
            .field("prefetch", &self.prefetch.as_ref().map(Prefetcher::radius))
            .finish()
    }
}
