//! Infrastructure - memory budget, frame cache, workers, render lock,
//! decoder pool, prefetch.
//!
//! Independent of the render pipeline; `render` plugs these in through
//! the traits in `entities::traits`.

pub mod cache_man;
pub mod frame_cache;
pub mod media_pool;
pub mod prefetch;
pub mod render_lock;
pub mod workers;

pub use cache_man::CacheManager;
pub use frame_cache::{CacheStats, SequencerCache};
pub use media_pool::MediaPool;
pub use prefetch::{PrefetchEvent, Prefetcher};
pub use render_lock::{RenderLock, RenderToken};
pub use workers::Workers;
