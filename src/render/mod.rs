//! Render pipeline.
//!
//! - `sequencer` - entry point: final frames, direct strip renders, prefetch
//! - `stack` - per-strip tier walk and the stack compositor
//! - `source` - image, movie, clip and mask sources, proxies, views
//! - `preprocess` - crop, transform, filters, color, modifiers
//! - `effect` - effect strips and the threaded effect driver
//! - `scene_strip` - nested scene renders
//! - `thumbnail` - timeline thumbnails
//! - `backends` - file based media and proxy backends

pub mod backends;
pub mod effect;
pub mod engine;
pub mod preprocess;
pub mod scene_strip;
pub mod sequencer;
pub mod source;
pub mod stack;
pub mod thumbnail;

#[cfg(test)]
pub(crate) mod testing;

pub use backends::{Backends, FileMediaBackend, FileProxyBackend, FrameSequenceDecoder};
pub use effect::{EFFECT_FADER_PROPERTY, execute_effect};
pub use engine::RenderEngine;
pub use scene_strip::SceneFrameGuard;
pub use sequencer::Sequencer;
pub use stack::{RenderPass, StackCompositor, StripStack, blend_early_out};
pub use thumbnail::{ThumbnailCrop, ViewArea, guaranteed_frame_step, thumbnail_first_frame, thumbnail_next_frame};
