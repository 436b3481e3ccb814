//! In-memory media, scene renderer and sequencer fixtures for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::core::cache_man::CacheManager;
use crate::core::frame_cache::SequencerCache;
use crate::core::media_pool::MediaPool;
use crate::entities::context::{CacheTier, RenderContext, RenderState};
use crate::entities::frame::Frame;
use crate::entities::scene::{FrameState, Scene, SceneRegistry};
use crate::entities::strip::{Strip, StripKind};
use crate::entities::timeline::Timeline;
use crate::entities::traits::{MaskRasterizer, MediaBackend, MovieDecoder, SceneRenderer};

use super::backends::Backends;
use super::engine::RenderEngine;
use super::sequencer::Sequencer;
use super::stack::{RenderPass, StackCompositor, StripStack};

/// Images keyed by file name, with per-name load counts. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedia {
    frames: Arc<Mutex<HashMap<String, Frame>>>,
    loads: Arc<Mutex<HashMap<String, usize>>>,
}

impl MemoryMedia {
    pub fn insert(&self, name: &str, frame: Frame) {
        self.frames.lock().unwrap().insert(name.to_string(), frame);
    }

    pub fn loads(&self, name: &str) -> usize {
        self.loads.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl MediaBackend for MemoryMedia {
    fn load_image(&self, path: &Path) -> Option<Frame> {
        let name = path.file_name()?.to_string_lossy().to_string();
        *self.loads.lock().unwrap().entry(name.clone()).or_default() += 1;
        self.frames.lock().unwrap().get(&name).cloned()
    }

    fn open_movie(&self, _path: &Path, _stream: usize) -> Option<Box<dyn MovieDecoder>> {
        None
    }
}

/// Scene renderer returning solid frames and recording the frame state
/// seen by each render.
#[derive(Debug, Default)]
pub struct RecordingSceneRenderer {
    reevaluated: AtomicUsize,
    seen: Mutex<Vec<(&'static str, FrameState)>>,
}

impl RecordingSceneRenderer {
    pub fn reevaluations(&self) -> usize {
        self.reevaluated.load(Ordering::SeqCst)
    }

    /// (path, frame state) per render call.
    pub fn seen(&self) -> Vec<(&'static str, FrameState)> {
        self.seen.lock().unwrap().clone()
    }

    fn record(&self, path: &'static str, scene: &Scene) {
        let state = scene.frame_state().clone();
        self.seen.lock().unwrap().push((path, state));
    }
}

impl SceneRenderer for RecordingSceneRenderer {
    fn render_viewport(
        &self,
        scene: &Scene,
        _camera: Option<&str>,
        size: (usize, usize),
        _view_id: usize,
    ) -> Option<Frame> {
        self.record("viewport", scene);
        Some(Frame::solid_f32(size.0, size.1, [0.0, 1.0, 0.0, 1.0]))
    }

    fn render_offline(&self, scene: &Scene, _camera: Option<&str>, size: (usize, usize)) -> Option<Vec<Frame>> {
        self.record("offline", scene);
        Some(
            (0..scene.num_views())
                .map(|view| Frame::solid_f32(size.0, size.1, [view as f32, 0.0, 1.0, 1.0]))
                .collect(),
        )
    }

    fn last_result(&self, _scene: &Scene, _view_id: usize) -> Option<Frame> {
        None
    }

    fn reevaluate(&self, _scene: &Scene) {
        self.reevaluated.fetch_add(1, Ordering::SeqCst);
    }
}

/// Uniform mask coverage.
#[derive(Debug)]
pub struct ConstantMask(pub f32);

impl MaskRasterizer for ConstantMask {
    fn rasterize(&self, _mask: &str, _frame: f32, width: usize, height: usize) -> Option<Vec<f32>> {
        Some(vec![self.0; width * height])
    }
}

/// Stack compositor counting its calls.
struct CountingStack {
    calls: Arc<AtomicUsize>,
}

impl StackCompositor for CountingStack {
    fn render_stack(
        &self,
        pass: &RenderPass,
        ctx: &RenderContext,
        state: &mut RenderState,
        timeline: &Timeline,
        strips: &[&Strip],
        frame: f32,
    ) -> Option<Frame> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        StripStack.render_stack(pass, ctx, state, timeline, strips, frame)
    }
}

/// Image strip of `len` frames all showing `file` from `/mem`.
pub fn image_strip(file: &str, channel: i32, start: i32, len: i32) -> Strip {
    Strip::new(
        file,
        StripKind::Image { dir: PathBuf::from("/mem"), files: vec![file.to_string(); len.max(0) as usize] },
        channel,
        start,
        len,
    )
}

/// Registered scene holding `strips`.
pub fn scene_with(strips: Vec<Strip>) -> (Arc<Scene>, Arc<SceneRegistry>) {
    let mut scene = Scene::new("main", 64, 64);
    for strip in strips {
        scene.editing.timeline.add_strip(strip).unwrap();
    }
    let mut registry = SceneRegistry::new();
    let scene = registry.insert(scene);
    (scene, Arc::new(registry))
}

pub fn context_for(scene: (Arc<Scene>, Arc<SceneRegistry>), width: usize, height: usize) -> RenderContext {
    let (scene, registry) = scene;
    RenderContext::new(scene, registry).with_size(width, height)
}

/// Context of an empty scene.
pub fn context(width: usize, height: usize) -> RenderContext {
    context_for(scene_with(Vec::new()), width, height)
}

/// Engine whose cache keeps Raw and Final entries across frames.
pub fn engine_with(media: MemoryMedia) -> RenderEngine {
    backends_engine(Backends::files().with_media(Arc::new(media)))
}

pub fn backends_engine(backends: Backends) -> RenderEngine {
    let manager = Arc::new(CacheManager::with_limit(usize::MAX));
    let cache = Arc::new(SequencerCache::new(256, manager, &[CacheTier::Raw, CacheTier::Final]));
    RenderEngine::new(cache, backends, MediaPool::new(4))
}

pub fn sequencer_with(media: MemoryMedia) -> Sequencer {
    Sequencer::new(engine_with(media), Box::new(StripStack))
}

/// Sequencer plus the number of stack composites it ran.
pub fn counting_sequencer(media: MemoryMedia) -> (Sequencer, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let compositor = CountingStack { calls: Arc::clone(&calls) };
    (Sequencer::new(engine_with(media), Box::new(compositor)), calls)
}

/// Scene A shows B's strips; B has a blue image under a strip showing A's.
/// Returns a context on A and the id of B.
pub fn cyclic_scenes(_media: MemoryMedia) -> (RenderContext, Uuid) {
    let mut a = Scene::new("A", 2, 2);
    let mut b = Scene::new("B", 2, 2);
    a.sfra = 0;
    b.sfra = 0;
    let (a_id, b_id) = (a.uuid, b.uuid);

    a.editing.timeline.add_strip(Strip::new(
        "to_b",
        StripKind::Scene { scene: b_id, camera: None, use_strips: true },
        1,
        0,
        20,
    )).unwrap();
    b.editing.timeline.add_strip(image_strip("blue.png", 1, 0, 20)).unwrap();
    b.editing.timeline.add_strip(Strip::new(
        "to_a",
        StripKind::Scene { scene: a_id, camera: None, use_strips: true },
        2,
        0,
        20,
    )).unwrap();

    let mut registry = SceneRegistry::new();
    let a = registry.insert(a);
    registry.insert(b);
    (RenderContext::new(a, Arc::new(registry)).with_size(2, 2), b_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::render_lock::RenderLock;
    use crate::entities::effects::EffectType;
    use crate::entities::scene::PreviewType;

    fn with_pass<R>(engine: &RenderEngine, f: impl FnOnce(&RenderPass) -> R) -> R {
        let lock = RenderLock::new();
        let token = lock.lock();
        let pass = RenderPass::new(engine, &StripStack, &token);
        f(&pass)
    }

    /// Cross at fac 0 hands back the first input untouched.
    #[test]
    fn test_effect_use_input_passthrough() {
        let media = MemoryMedia::default();
        media.insert("a.png", Frame::solid_u8(4, 4, [10, 20, 30, 255]));
        media.insert("b.png", Frame::solid_u8(4, 4, [200, 0, 0, 255]));
        let a = image_strip("a.png", 1, 0, 10);
        let b = image_strip("b.png", 2, 0, 10);
        let mut fx = Strip::new(
            "cross",
            StripKind::Effect { effect: EffectType::Cross, inputs: vec![a.uuid, b.uuid] },
            3,
            0,
            10,
        );
        fx.effect_fader = 0.0;

        let ctx = context_for(scene_with(vec![a.clone(), b, fx]), 4, 4);
        let sequencer = sequencer_with(media.clone());
        let out = sequencer.give_frame(&ctx, 2.0, 0).unwrap();
        let direct = sequencer.render_strip_direct(&ctx, &a, 2.0);
        assert_eq!(out.to_u8_vec(), direct.to_u8_vec());
        assert_eq!(media.loads("b.png"), 0);
    }

    #[test]
    fn test_unsupported_effect_renders_blank() {
        let fx = Strip::new(
            "unknown",
            StripKind::Effect { effect: EffectType::Unknown, inputs: vec![] },
            1,
            0,
            10,
        );
        let ctx = context_for(scene_with(vec![fx]), 3, 2);
        let out = sequencer_with(MemoryMedia::default()).give_frame(&ctx, 1.0, 0).unwrap();
        assert_eq!(out.resolution(), (3, 2));
        assert_eq!(out.pixel(1, 1), [0.0, 0.0, 0.0, 0.0]);
    }

    /// Frames inside a meta strip map through the meta's content offset.
    #[test]
    fn test_meta_strip_frame_offset() {
        let media = MemoryMedia::default();
        media.insert("f2.png", Frame::solid_u8(2, 2, [255, 0, 0, 255]));
        let files = (0..5).map(|i| format!("f{}.png", i)).collect();
        let inner_strip = Strip::new(
            "seq",
            StripKind::Image { dir: PathBuf::from("/mem"), files },
            1,
            10,
            5,
        );
        let mut inner = Timeline::new();
        inner.add_strip(inner_strip).unwrap();
        let meta = Strip::new("meta", StripKind::Meta { timeline: inner }, 1, 10, 5);

        let ctx = context_for(scene_with(vec![meta]), 2, 2);
        let out = sequencer_with(media.clone()).give_frame(&ctx, 12.0, 0).unwrap();
        assert_eq!(out.pixel(0, 0), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(media.loads("f2.png"), 1);
    }

    #[test]
    fn test_mask_strip_coverage() {
        let mask = Strip::new("mask", StripKind::Mask { mask: "matte".into() }, 1, 0, 10);
        let ctx = context_for(scene_with(vec![mask]), 2, 2);
        let backends = Backends::files().with_masks(Arc::new(ConstantMask(0.5)));
        let sequencer = Sequencer::new(backends_engine(backends), Box::new(StripStack));
        let out = sequencer.give_frame(&ctx, 1.0, 0).unwrap();
        assert_eq!(out.to_u8_vec()[..4], [127, 127, 127, 255]);
    }

    /// Offline scene render at the strip frame, frame state restored after.
    #[test]
    fn test_scene_strip_offline_render() {
        let mut inner = Scene::new("inner", 4, 4);
        inner.camera = Some("cam".into());
        inner.sfra = 100;
        let inner_id = inner.uuid;

        let mut main = Scene::new("main", 4, 4);
        main.editing.timeline.add_strip(Strip::new(
            "shot",
            StripKind::Scene { scene: inner_id, camera: None, use_strips: false },
            1,
            10,
            20,
        )).unwrap();
        let mut registry = SceneRegistry::new();
        let main = registry.insert(main);
        let inner = registry.insert(inner);
        let mut ctx = RenderContext::new(main, Arc::new(registry)).with_size(4, 4);
        ctx.for_render = true;

        let renderer = Arc::new(RecordingSceneRenderer::default());
        let backends = Backends::files().with_scenes(renderer.clone());
        let sequencer = Sequencer::new(backends_engine(backends), Box::new(StripStack));

        let out = sequencer.give_frame(&ctx, 13.0, 0).unwrap();
        assert_eq!(out.pixel(0, 0), [0.0, 0.0, 1.0, 1.0]);

        let seen = renderer.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "offline");
        assert_eq!(seen[0].1.cfra, 103);
        assert!(!seen[0].1.do_sequencer);
        assert_eq!(*inner.frame_state(), FrameState::default());
        assert_eq!(renderer.reevaluations(), 1);
    }

    #[test]
    fn test_scene_strip_viewport_preview() {
        let mut inner = Scene::new("inner", 8, 8);
        inner.camera = Some("cam".into());
        let inner_id = inner.uuid;
        let mut main = Scene::new("main", 4, 4);
        main.preview_type = PreviewType::Solid;
        main.editing.timeline.add_strip(Strip::new(
            "shot",
            StripKind::Scene { scene: inner_id, camera: None, use_strips: false },
            1,
            0,
            20,
        )).unwrap();
        let mut registry = SceneRegistry::new();
        let main = registry.insert(main);
        registry.insert(inner);
        let ctx = RenderContext::new(main, Arc::new(registry)).with_size(4, 4);

        let renderer = Arc::new(RecordingSceneRenderer::default());
        let backends = Backends::files().with_scenes(renderer.clone());
        let sequencer = Sequencer::new(backends_engine(backends), Box::new(StripStack));
        let out = sequencer.give_frame(&ctx, 2.0, 0).unwrap();

        assert_eq!(out.pixel(3, 3), [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(renderer.seen()[0].0, "viewport");
    }

    /// A scene with neither camera nor compositor yields no data.
    #[test]
    fn test_scene_without_camera_is_blank() {
        let inner = Scene::new("inner", 4, 4);
        let inner_id = inner.uuid;
        let mut main = Scene::new("main", 4, 4);
        main.editing.timeline.add_strip(Strip::new(
            "shot",
            StripKind::Scene { scene: inner_id, camera: None, use_strips: false },
            1,
            0,
            20,
        )).unwrap();
        let mut registry = SceneRegistry::new();
        let main = registry.insert(main);
        registry.insert(inner);
        let ctx = RenderContext::new(main, Arc::new(registry)).with_size(2, 2);

        let renderer = Arc::new(RecordingSceneRenderer::default());
        let backends = Backends::files().with_scenes(renderer.clone());
        let engine = backends_engine(backends);
        let strip = &ctx.scene.editing.timeline.strips[0];
        let out = with_pass(&engine, |pass| {
            let mut is_proxy = false;
            pass.render_strip_uncached(&ctx, &mut RenderState::new(), &ctx.scene.editing.timeline, strip, 1.0, &mut is_proxy)
        });
        assert!(out.is_none());
        assert!(renderer.seen().is_empty());
    }

    #[test]
    fn test_self_reference_is_no_data() {
        let (scene, registry) = scene_with(Vec::new());
        let strip = Strip::new(
            "self",
            StripKind::Scene { scene: scene.uuid, camera: None, use_strips: true },
            1,
            0,
            10,
        );
        let ctx = RenderContext::new(scene, registry).with_size(2, 2);
        let engine = engine_with(MemoryMedia::default());
        let out = with_pass(&engine, |pass| {
            let mut is_proxy = false;
            pass.render_strip_uncached(&ctx, &mut RenderState::new(), &Timeline::new(), &strip, 1.0, &mut is_proxy)
        });
        assert!(out.is_none());
    }
}
