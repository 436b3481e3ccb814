//! Multi-tier sequencer frame cache.
//!
//! Structure: HashMap<scene, HashMap<CacheKey, Entry>>
//! - Outer map: scene uuid -> entries, so `clear_scene()` drops one key
//! - LRU order in an IndexSet (insertion order, O(1) lookup by key)
//! - Memory accounted through `CacheManager`
//!
//! Tiers not listed as persistent are temporary: each entry remembers the
//! task that stored it, and `invalidate_temp` drops a task's temporaries
//! for every frame but the current one.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexSet;
use log::{debug, trace};
use uuid::Uuid;

use crate::config::RenderSettings;
use crate::core::cache_man::CacheManager;
use crate::entities::context::frame_ticks;
use crate::entities::traits::CacheStatsSnapshot;
use crate::entities::{CacheKey, CacheTier, Frame, FrameCache, TaskId};

/// Minimum entry capacity.
const MIN_CAPACITY: usize = 16;

/// Hit/miss counters
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct Entry {
    frame: Frame,
    /// Owning task of a temporary entry; `None` for persistent tiers
    temp_task: Option<TaskId>,
}

#[derive(Debug, Default)]
struct Inner {
    scenes: HashMap<Uuid, HashMap<CacheKey, Entry>>,
    lru: IndexSet<CacheKey>,
}

impl Inner {
    fn len(&self) -> usize {
        self.lru.len()
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Entry> {
        let entries = self.scenes.get_mut(&key.scene)?;
        let entry = entries.remove(key)?;
        if entries.is_empty() {
            self.scenes.remove(&key.scene);
        }
        self.lru.shift_remove(key);
        Some(entry)
    }
}

/// Sequencer cache with LRU + memory-limit eviction.
#[derive(Debug)]
pub struct SequencerCache {
    inner: Mutex<Inner>,
    cache_manager: Arc<CacheManager>,
    persistent: HashSet<CacheTier>,
    stats: CacheStats,
    capacity: usize,
}

impl SequencerCache {
    /// Cache holding up to `capacity` entries; `persistent` tiers survive
    /// frame changes (the thumbnail tier always does).
    pub fn new(capacity: usize, manager: Arc<CacheManager>, persistent: &[CacheTier]) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        let mut persistent: HashSet<CacheTier> = persistent.iter().copied().collect();
        persistent.insert(CacheTier::Thumbnail);

        debug!("SequencerCache created: capacity={}, persistent={:?}", capacity, persistent);

        Self {
            inner: Mutex::new(Inner::default()),
            cache_manager: manager,
            persistent,
            stats: CacheStats::default(),
            capacity,
        }
    }

    pub fn from_settings(settings: &RenderSettings, manager: Arc<CacheManager>) -> Self {
        Self::new(settings.cache_capacity, manager, &settings.persistent_tiers)
    }

    pub fn is_persistent(&self, tier: CacheTier) -> bool {
        self.persistent.contains(&tier)
    }

    /// Presence check without touching LRU order or stats
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock()
            .scenes
            .get(&key.scene)
            .is_some_and(|entries| entries.contains_key(key))
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Evict oldest entries until under both limits, leaving room for one.
    fn evict(&self, inner: &mut Inner) {
        while self.cache_manager.check_memory_limit() || inner.len() >= self.capacity {
            let Some(key) = inner.lru.first().copied() else { break };
            if let Some(evicted) = inner.remove(&key) {
                let size = evicted.frame.mem();
                self.cache_manager.free_memory(size);
                trace!("LRU evicted {:?} {}@{} ({} bytes)", key.tier, key.strip, key.frame, size);
            } else {
                inner.lru.shift_remove(&key);
            }
        }
    }

    fn insert(&self, inner: &mut Inner, key: CacheKey, frame: Frame, task: TaskId) {
        if let Some(old) = inner.remove(&key) {
            self.cache_manager.free_memory(old.frame.mem());
        }
        self.evict(inner);

        let size = frame.mem();
        let temp_task = (!self.is_persistent(key.tier)).then_some(task);
        inner.scenes.entry(key.scene).or_default().insert(key, Entry { frame, temp_task });
        inner.lru.insert(key);
        self.cache_manager.add_memory(size);

        debug!("Cached {:?} {}@{} ({} bytes)", key.tier, key.strip, key.frame, size);
    }

    fn remove_where(&self, inner: &mut Inner, keep: impl Fn(&CacheKey, &Entry) -> bool) -> usize {
        let doomed: Vec<CacheKey> = inner
            .scenes
            .values()
            .flat_map(|entries| entries.iter())
            .filter(|(k, e)| !keep(k, e))
            .map(|(k, _)| *k)
            .collect();
        for key in &doomed {
            if let Some(entry) = inner.remove(key) {
                self.cache_manager.free_memory(entry.frame.mem());
            }
        }
        doomed.len()
    }
}

impl FrameCache for SequencerCache {
    fn get(&self, key: &CacheKey) -> Option<Frame> {
        let mut inner = self.lock();
        let found = inner
            .scenes
            .get(&key.scene)
            .and_then(|entries| entries.get(key))
            .map(|e| e.frame.clone());

        if found.is_some() {
            self.stats.record_hit();
            // Move to the back (most recent)
            inner.lru.shift_remove(key);
            inner.lru.insert(*key);
        } else {
            self.stats.record_miss();
        }
        found
    }

    fn put(&self, key: CacheKey, frame: Frame, task: TaskId) {
        let mut inner = self.lock();
        self.insert(&mut inner, key, frame, task);
    }

    fn put_if_absent(&self, key: CacheKey, frame: Frame, task: TaskId) -> bool {
        let mut inner = self.lock();
        if inner.scenes.get(&key.scene).is_some_and(|entries| entries.contains_key(&key)) {
            return false;
        }
        self.insert(&mut inner, key, frame, task);
        true
    }

    fn invalidate_temp(&self, scene: Uuid, task: TaskId, frame: f32) {
        let ticks = frame_ticks(frame);
        let mut inner = self.lock();
        let removed = self.remove_where(&mut inner, |k, e| {
            !(k.scene == scene && e.temp_task == Some(task) && k.frame != ticks)
        });
        if removed > 0 {
            debug!("Invalidated {} temporary entries of {:?} in {}", removed, task, scene);
        }
    }

    fn clear_strip(&self, strip: Uuid) {
        let mut inner = self.lock();
        let removed = self.remove_where(&mut inner, |k, _| k.strip != strip);
        debug!("Cleared strip {}: {} entries", strip, removed);
    }

    fn clear_scene(&self, scene: Uuid) {
        let mut inner = self.lock();
        if let Some(entries) = inner.scenes.remove(&scene) {
            for entry in entries.values() {
                self.cache_manager.free_memory(entry.frame.mem());
            }
            inner.lru.retain(|k| k.scene != scene);
            debug!("Cleared scene {}: {} entries", scene, entries.len());
        }
    }

    fn clear_all(&self) {
        let mut inner = self.lock();
        for entries in inner.scenes.values() {
            for entry in entries.values() {
                self.cache_manager.free_memory(entry.frame.mem());
            }
        }
        inner.scenes.clear();
        inner.lru.clear();
        self.stats.reset();
        debug!("Cache cleared");
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn stats_snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            size: self.len(),
        }
    }
}
