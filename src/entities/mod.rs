//! Entities module - data model of the sequencer.
//!
//! - `Frame` - copy-on-write pixel buffer
//! - `Strip` / `Timeline` / `Editing` - what is on the timeline
//! - `Scene` / `SceneRegistry` / `Project` - ownership and persistence
//! - `RenderContext` / `CacheKey` - per-render parameters and cache addressing
//! - `effects` / `modifiers` / `transform` / `color` - pixel operations
//! - `traits` - seams to caches, decoders and scene renderers

pub mod color;
pub mod context;
pub mod effects;
pub mod frame;
pub mod modifiers;
pub mod project;
pub mod scene;
pub mod strip;
pub mod timeline;
pub mod traits;
pub mod transform;

pub use context::{CacheKey, CacheTier, RenderContext, RenderEnv, RenderSize, RenderState, TaskId};
pub use effects::{EarlyOut, EffectHandle, EffectKind, EffectType, ExecMode};
pub use frame::{Frame, FrameError, PixelBuffer, PixelFormat, Planes};
pub use modifiers::{Modifier, ModifierKind};
pub use project::Project;
pub use scene::{AnimCurves, FCurve, Scene, SceneRegistry};
pub use strip::{BlendMode, ProxySize, Strip, StripKind};
pub use timeline::{Editing, Timeline, TimelineError};
pub use traits::FrameCache;
