// Data model: frames, strips, timelines, scenes, effects
pub mod entities;

// Infrastructure: cache, workers, locks, prefetch
pub mod core;

// Render pipeline
pub mod render;

// Settings and paths
pub mod config;
pub mod paths;

// Command line
pub mod cli;

pub use config::RenderSettings;
pub use core::cache_man::CacheManager;
pub use core::frame_cache::SequencerCache;
pub use core::render_lock::{RenderLock, RenderToken};
pub use entities::{
    BlendMode, CacheKey, CacheTier, Editing, EffectType, Frame, FrameError, PixelBuffer, Project,
    RenderContext, RenderSize, RenderState, Scene, SceneRegistry, Strip, StripKind, TaskId,
    Timeline,
};
pub use render::{Backends, RenderEngine, Sequencer, StackCompositor, StripStack};
