//! Abstract traits for dependency inversion.
//!
//! These traits define what the render pipeline needs from infrastructure
//! and external collaborators (cache, media decoding, proxies, masks,
//! nested scene rendering), so `render` never depends on concrete backends.
//!
//! Implementations live in `core/` and `render/backends.rs`.

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use super::context::{CacheKey, TaskId};
use super::frame::Frame;
use super::scene::Scene;
use super::strip::{ProxySize, Strip};

/// Simple cache statistics (subset exposed via trait)
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// Multi-tier frame cache.
///
/// Entries are whole buffers: a key is either absent or maps to a complete
/// frame. Stored frames are shared, never mutated afterwards.
pub trait FrameCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Frame>;

    /// Store (or replace) an entry. `task` tags temporary tiers.
    fn put(&self, key: CacheKey, frame: Frame, task: TaskId);

    /// Store unless the key is already populated. Returns true if stored.
    fn put_if_absent(&self, key: CacheKey, frame: Frame, task: TaskId) -> bool;

    /// Drop temporary entries of `task` in `scene` that belong to other frames.
    fn invalidate_temp(&self, scene: Uuid, task: TaskId, frame: f32);

    fn clear_strip(&self, strip: Uuid);

    fn clear_scene(&self, scene: Uuid);

    fn clear_all(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats_snapshot(&self) -> CacheStatsSnapshot;
}

/// Abstract worker pool interface.
pub trait WorkerPool: Send + Sync {
    /// Execute closure on worker thread with epoch-based cancellation.
    ///
    /// If epoch changed before execution, the closure is skipped.
    /// This allows fast timeline scrubbing without wasted work.
    fn execute_with_epoch(&self, epoch: u64, f: Box<dyn FnOnce() + Send + 'static>);
}

/// Open movie stream, kept alive across frames.
pub trait MovieDecoder: Send {
    fn frame_count(&self) -> usize;

    fn decode(&mut self, frame_index: usize) -> Option<Frame>;
}

/// Source media decoding.
pub trait MediaBackend: Send + Sync {
    fn load_image(&self, path: &Path) -> Option<Frame>;

    fn open_movie(&self, path: &Path, stream: usize) -> Option<Box<dyn MovieDecoder>>;
}

/// Pre-built low resolution proxies.
pub trait ProxyBackend: Send + Sync {
    /// Proxy of `strip` at content frame `frame_index`, view `view_id`.
    fn fetch_proxy(&self, strip: &Strip, frame_index: i32, view_id: usize, size: ProxySize) -> Option<Frame>;
}

/// Tracked movie clips.
pub trait ClipBackend: Send + Sync {
    fn fetch_clip(
        &self,
        clip: &str,
        frame: i32,
        proxy: Option<ProxySize>,
        undistorted: bool,
        stabilized: bool,
    ) -> Option<Frame>;
}

/// Mask shape rasterization into single-channel coverage.
pub trait MaskRasterizer: Send + Sync {
    /// `width * height` coverage values, top row first.
    fn rasterize(&self, mask: &str, frame: f32, width: usize, height: usize) -> Option<Vec<f32>>;
}

/// Nested scene evaluation.
///
/// The scene's frame state (`Scene::frame_state`) is set to the requested
/// frame before any of these are called.
pub trait SceneRenderer: Send + Sync {
    /// Interactive (viewport) render of one view.
    fn render_viewport(
        &self,
        scene: &Scene,
        camera: Option<&str>,
        size: (usize, usize),
        view_id: usize,
    ) -> Option<Frame>;

    /// Offline render; one frame per scene view.
    fn render_offline(&self, scene: &Scene, camera: Option<&str>, size: (usize, usize)) -> Option<Vec<Frame>>;

    /// Result of the last offline render, if any.
    fn last_result(&self, scene: &Scene, view_id: usize) -> Option<Frame>;

    /// Re-evaluate the scene after its frame state was restored.
    fn reevaluate(&self, scene: &Scene);
}

/// Blanket impl: Arc<T> implements traits if T does
impl<T: FrameCache + ?Sized> FrameCache for Arc<T> {
    fn get(&self, key: &CacheKey) -> Option<Frame> {
        (**self).get(key)
    }

    fn put(&self, key: CacheKey, frame: Frame, task: TaskId) {
        (**self).put(key, frame, task)
    }

    fn put_if_absent(&self, key: CacheKey, frame: Frame, task: TaskId) -> bool {
        (**self).put_if_absent(key, frame, task)
    }

    fn invalidate_temp(&self, scene: Uuid, task: TaskId, frame: f32) {
        (**self).invalidate_temp(scene, task, frame)
    }

    fn clear_strip(&self, strip: Uuid) {
        (**self).clear_strip(strip)
    }

    fn clear_scene(&self, scene: Uuid) {
        (**self).clear_scene(scene)
    }

    fn clear_all(&self) {
        (**self).clear_all()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn stats_snapshot(&self) -> CacheStatsSnapshot {
        (**self).stats_snapshot()
    }
}

impl<T: WorkerPool + ?Sized> WorkerPool for Arc<T> {
    fn execute_with_epoch(&self, epoch: u64, f: Box<dyn FnOnce() + Send + 'static>) {
        (**self).execute_with_epoch(epoch, f)
    }
}
