//! Per-call render parameters, the recursion guard, and cache keys.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scene::{Scene, SceneRegistry};
use super::strip::ProxySize;

/// Who asked for the render. Temporary cache entries are tagged with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskId {
    #[default]
    Main,
    Prefetch,
    Thumbnail,
}

/// Preview resolution: the scene's own size or a proxy tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderSize {
    #[default]
    Scene,
    P25,
    P50,
    P75,
    P100,
}

impl RenderSize {
    pub fn proxy_size(self) -> Option<ProxySize> {
        match self {
            RenderSize::Scene => None,
            RenderSize::P25 => Some(ProxySize::P25),
            RenderSize::P50 => Some(ProxySize::P50),
            RenderSize::P75 => Some(ProxySize::P75),
            RenderSize::P100 => Some(ProxySize::P100),
        }
    }

    pub fn scale_factor(self) -> f32 {
        match self {
            RenderSize::P25 => 0.25,
            RenderSize::P50 => 0.5,
            RenderSize::P75 => 0.75,
            RenderSize::Scene | RenderSize::P100 => 1.0,
        }
    }
}

/// Process-level facts used to pick the scene render path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderEnv {
    /// An offline render job is already running
    pub is_rendering: bool,
    /// No UI (command line batch)
    pub is_background: bool,
    pub main_thread: bool,
}

impl Default for RenderEnv {
    fn default() -> Self {
        Self { is_rendering: false, is_background: true, main_thread: true }
    }
}

/// Render parameters, immutable for the duration of one call.
///
/// Distinct contexts (views, tasks) may render concurrently; recursive
/// renders derive a local copy with `clone()` and adjust fields.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub scene: Arc<Scene>,
    pub scenes: Arc<SceneRegistry>,
    pub rectx: usize,
    pub recty: usize,
    pub preview_render_size: RenderSize,
    pub use_proxies: bool,
    /// Final render (not preview)
    pub for_render: bool,
    /// Building proxies: caching of intermediate tiers is bypassed
    pub is_proxy_render: bool,
    pub view_id: usize,
    pub task_id: TaskId,
    pub skip_cache: bool,
    pub is_prefetch_render: bool,
    pub env: RenderEnv,
}

impl RenderContext {
    /// Context rendering `scene` at its output size.
    pub fn new(scene: Arc<Scene>, scenes: Arc<SceneRegistry>) -> Self {
        let (rectx, recty) = scene.render_size();
        Self {
            scene,
            scenes,
            rectx,
            recty,
            preview_render_size: RenderSize::Scene,
            use_proxies: false,
            for_render: false,
            is_proxy_render: false,
            view_id: 0,
            task_id: TaskId::Main,
            skip_cache: false,
            is_prefetch_render: false,
            env: RenderEnv::default(),
        }
    }

    pub fn with_size(mut self, rectx: usize, recty: usize) -> Self {
        self.rectx = rectx;
        self.recty = recty;
        self
    }

    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn rect(&self) -> (usize, usize) {
        (self.rectx, self.recty)
    }

    /// Render size relative to the scene's full output size.
    pub fn preview_scale_factor(&self) -> f32 {
        match self.preview_render_size {
            RenderSize::Scene => self.scene.size_percent as f32 / 100.0,
            size => size.scale_factor(),
        }
    }
}

/// Ancestor scenes and effect strips of the current render, innermost last.
#[derive(Debug, Clone, Default)]
pub struct RenderState {
    scene_parents: Vec<Uuid>,
    effects: Vec<Uuid>,
}

impl RenderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, scene: Uuid) -> bool {
        self.scene_parents.contains(&scene)
    }

    pub fn depth(&self) -> usize {
        self.scene_parents.len()
    }

    /// Run `f` with `scene` pushed as an ancestor; `None` when it already is one.
    pub fn with_parent<R>(&mut self, scene: Uuid, f: impl FnOnce(&mut Self) -> Option<R>) -> Option<R> {
        if self.contains(scene) {
            return None;
        }
        self.scene_parents.push(scene);
        let result = f(self);
        self.scene_parents.pop();
        result
    }

    /// Effect strip is being evaluated further up the call chain.
    pub fn in_effect(&self, strip: Uuid) -> bool {
        self.effects.contains(&strip)
    }

    /// Run `f` with effect `strip` marked as evaluating; `None` when it already is.
    pub fn with_effect<R>(&mut self, strip: Uuid, f: impl FnOnce(&mut Self) -> Option<R>) -> Option<R> {
        if self.in_effect(strip) {
            return None;
        }
        self.effects.push(strip);
        let result = f(self);
        self.effects.pop();
        result
    }
}

/// Cached processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    /// Source buffer before preprocessing
    Raw,
    Preprocessed,
    /// Stack result up to and including this strip
    Composite,
    /// Whole frame
    Final,
    Thumbnail,
}

/// Subframe resolution of cache keys.
pub const FRAME_TICKS: f32 = 1000.0;

/// Cache entry identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scene: Uuid,
    /// Strip the entry belongs to (the top strip for `Final`)
    pub strip: Uuid,
    /// Timeline frame in 1/1000 frame ticks
    pub frame: i64,
    pub tier: CacheTier,
    pub view_id: usize,
    pub rect: (usize, usize),
}

impl CacheKey {
    pub fn new(ctx: &RenderContext, strip: Uuid, frame: f32, tier: CacheTier) -> Self {
        Self {
            scene: ctx.scene.uuid,
            strip,
            frame: frame_ticks(frame),
            tier,
            view_id: ctx.view_id,
            rect: ctx.rect(),
        }
    }
}

pub fn frame_ticks(frame: f32) -> i64 {
    (frame as f64 * FRAME_TICKS as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RenderContext {
        let mut scenes = SceneRegistry::new();
        let scene = scenes.insert(Scene::new("s", 100, 50));
        RenderContext::new(scene, Arc::new(scenes))
    }

    #[test]
    fn test_preview_scale() {
        let mut c = ctx();
        assert_eq!(c.rect(), (100, 50));
        assert_eq!(c.preview_scale_factor(), 1.0);
        c.preview_render_size = RenderSize::P25;
        assert_eq!(c.preview_scale_factor(), 0.25);
        assert_eq!(c.preview_render_size.proxy_size(), Some(ProxySize::P25));
    }

    /// Guard refuses to re-enter a scene and pops on the way out.
    #[test]
    fn test_render_state_guard() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut state = RenderState::new();
        let result = state.with_parent(a, |s| {
            assert_eq!(s.depth(), 1);
            assert!(s.with_parent(a, |_| Some(())).is_none());
            s.with_parent(b, |s| Some(s.depth()))
        });
        assert_eq!(result, Some(2));
        assert_eq!(state.depth(), 0);
    }

    #[test]
    fn test_render_state_effect_guard() {
        let (fx, input) = (Uuid::new_v4(), Uuid::new_v4());
        let mut state = RenderState::new();
        let result = state.with_effect(fx, |s| {
            assert!(s.in_effect(fx));
            assert!(s.with_effect(fx, |_| Some(())).is_none());
            s.with_effect(input, |s| Some(s.in_effect(fx) && s.in_effect(input)))
        });
        assert_eq!(result, Some(true));
        assert!(!state.in_effect(fx));
        // Effects and scenes are tracked apart
        assert_eq!(state.depth(), 0);
    }

    #[test]
    fn test_cache_key_discriminates() {
        let c = ctx();
        let strip = Uuid::new_v4();
        let k1 = CacheKey::new(&c, strip, 10.0, CacheTier::Raw);
        let k2 = CacheKey::new(&c, strip, 10.5, CacheTier::Raw);
        let k3 = CacheKey::new(&c.clone().with_size(10, 5), strip, 10.0, CacheTier::Raw);
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
        assert_eq!(k1.frame, 10_000);
    }
}
