//! Shared render services: frame cache, source backends, decoder pool.

use std::sync::Arc;

use log::trace;
use uuid::Uuid;

use crate::config::RenderSettings;
use crate::core::cache_man::CacheManager;
use crate::core::frame_cache::SequencerCache;
use crate::core::media_pool::MediaPool;
use crate::entities::context::{CacheKey, CacheTier, RenderContext};
use crate::entities::frame::Frame;
use crate::entities::traits::FrameCache;

use super::backends::Backends;

pub struct RenderEngine {
    pub cache: Arc<dyn FrameCache>,
    pub backends: Backends,
    pub media: MediaPool,
}

impl RenderEngine {
    pub fn new(cache: Arc<dyn FrameCache>, backends: Backends, media: MediaPool) -> Self {
        Self { cache, backends, media }
    }

    /// Cache, memory manager and decoder pool sized from `settings`.
    pub fn from_settings(settings: &RenderSettings, manager: Arc<CacheManager>, backends: Backends) -> Self {
        let cache = Arc::new(SequencerCache::from_settings(settings, manager));
        Self::new(cache, backends, MediaPool::new(settings.max_open_decoders))
    }

    /// Proxy renders and contexts with `skip_cache` never touch the cache.
    fn bypass_cache(ctx: &RenderContext) -> bool {
        ctx.skip_cache || ctx.is_proxy_render
    }

    pub fn cache_get(&self, ctx: &RenderContext, strip: Uuid, frame: f32, tier: CacheTier) -> Option<Frame> {
        if Self::bypass_cache(ctx) {
            return None;
        }
        let hit = self.cache.get(&CacheKey::new(ctx, strip, frame, tier));
        if hit.is_some() {
            trace!("Cache hit {:?} strip {} frame {}", tier, strip, frame);
        }
        hit
    }

    pub fn cache_put(&self, ctx: &RenderContext, strip: Uuid, frame: f32, tier: CacheTier, image: &Frame) {
        if Self::bypass_cache(ctx) {
            return;
        }
        self.cache.put(CacheKey::new(ctx, strip, frame, tier), image.clone(), ctx.task_id);
    }

    /// Store unless another thread already filled the slot.
    pub fn cache_put_if_absent(&self, ctx: &RenderContext, strip: Uuid, frame: f32, tier: CacheTier, image: &Frame) {
        if Self::bypass_cache(ctx) {
            return;
        }
        if !self.cache.put_if_absent(CacheKey::new(ctx, strip, frame, tier), image.clone(), ctx.task_id) {
            trace!("{:?} slot of strip {} frame {} already filled", tier, strip, frame);
        }
    }

    /// Transparent byte frame of the render size.
    pub fn blank(ctx: &RenderContext) -> Frame {
        Frame::new(ctx.rectx, ctx.recty)
    }
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("cached", &self.cache.len())
            .field("media", &self.media)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::scene::{Scene, SceneRegistry};

    fn engine() -> RenderEngine {
        let manager = Arc::new(CacheManager::with_limit(usize::MAX));
        let cache = Arc::new(SequencerCache::new(64, manager, &[CacheTier::Raw]));
        RenderEngine::new(cache, Backends::files(), MediaPool::default())
    }

    fn ctx() -> RenderContext {
        let mut registry = SceneRegistry::new();
        let scene = registry.insert(Scene::new("s", 4, 4));
        RenderContext::new(scene, Arc::new(registry)).with_size(4, 4)
    }

    #[test]
    fn test_skip_cache_bypasses_tiers() {
        let engine = engine();
        let mut ctx = ctx();
        let strip = Uuid::new_v4();
        let frame = Frame::new(4, 4);

        ctx.skip_cache = true;
        engine.cache_put(&ctx, strip, 1.0, CacheTier::Raw, &frame);
        assert!(engine.cache.is_empty());

        ctx.skip_cache = false;
        engine.cache_put(&ctx, strip, 1.0, CacheTier::Raw, &frame);
        assert!(engine.cache_get(&ctx, strip, 1.0, CacheTier::Raw).is_some());

        ctx.is_proxy_render = true;
        assert!(engine.cache_get(&ctx, strip, 1.0, CacheTier::Raw).is_none());
    }

    #[test]
    fn test_put_if_absent_keeps_first() {
        let engine = engine();
        let ctx = ctx();
        let strip = Uuid::new_v4();
        let first = Frame::solid_u8(4, 4, [1, 1, 1, 255]);
        engine.cache_put_if_absent(&ctx, strip, 2.0, CacheTier::Final, &first);
        engine.cache_put_if_absent(&ctx, strip, 2.0, CacheTier::Final, &Frame::new(4, 4));
        let hit = engine.cache_get(&ctx, strip, 2.0, CacheTier::Final).unwrap();
        assert!(hit.ptr_eq(&first));
    }
}
