//! Cache memory budget and the prefetch epoch.
//!
//! One manager is shared by the frame cache (memory accounting) and the
//! prefetcher (epoch bumped on every seek to drop stale render-ahead jobs).

use log::{debug, info};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use sysinfo::System;

use crate::config::RenderSettings;

#[derive(Debug)]
pub struct CacheManager {
    /// Bytes held by cached frames
    memory_usage: AtomicUsize,
    max_memory_bytes: AtomicUsize,
    /// Bumped on seek; jobs tagged with an older epoch are skipped
    current_epoch: Arc<AtomicU64>,
}

/// Budget as a fraction of available memory minus a system reserve.
fn memory_budget(mem_fraction: f64, reserve_gb: f64) -> (usize, usize) {
    let mut sys = System::new();
    sys.refresh_memory();

    let available = sys.available_memory() as usize;
    let reserve = (reserve_gb * 1024.0 * 1024.0 * 1024.0) as usize;
    let usable = available.saturating_sub(reserve);
    (available, (usable as f64 * mem_fraction.clamp(0.0, 1.0)) as usize)
}

impl CacheManager {
    /// Manager with a budget of `mem_fraction` of available memory,
    /// keeping `reserve_gb` free for the system.
    pub fn new(mem_fraction: f64, reserve_gb: f64) -> Self {
        let (available, limit) = memory_budget(mem_fraction, reserve_gb);
        info!(
            "CacheManager init: available={} MB, limit={} MB ({}%)",
            available / 1024 / 1024,
            limit / 1024 / 1024,
            (mem_fraction * 100.0) as u32
        );
        Self::with_limit(limit)
    }

    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self::new(settings.mem_fraction, settings.reserve_gb)
    }

    /// Manager with a fixed byte budget.
    pub fn with_limit(max_memory_bytes: usize) -> Self {
        Self {
            memory_usage: AtomicUsize::new(0),
            max_memory_bytes: AtomicUsize::new(max_memory_bytes),
            current_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Invalidate pending prefetch work; returns the new epoch.
    pub fn increment_epoch(&self) -> u64 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Epoch incremented: {}", new_epoch);
        new_epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Shared epoch counter (handed to the worker pool)
    pub fn epoch_ref(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.current_epoch)
    }

    pub fn check_memory_limit(&self) -> bool {
        self.memory_usage.load(Ordering::Relaxed) > self.max_memory_bytes.load(Ordering::Relaxed)
    }

    /// (usage, limit) in bytes
    pub fn mem(&self) -> (usize, usize) {
        (
            self.memory_usage.load(Ordering::Relaxed),
            self.max_memory_bytes.load(Ordering::Relaxed),
        )
    }

    pub fn add_memory(&self, bytes: usize) {
        let new_usage = self.memory_usage.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let limit = self.max_memory_bytes.load(Ordering::Relaxed);
        if new_usage > limit {
            debug!(
                "Memory limit exceeded: {} MB / {} MB",
                new_usage / 1024 / 1024,
                limit / 1024 / 1024
            );
        }
    }

    /// Saturating release.
    pub fn free_memory(&self, bytes: usize) {
        let _ = self
            .memory_usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| Some(current.saturating_sub(bytes)));
    }

    pub fn set_memory_limit(&self, mem_fraction: f64, reserve_gb: f64) {
        let (_, limit) = memory_budget(mem_fraction, reserve_gb);
        self.max_memory_bytes.store(limit, Ordering::Relaxed);
        info!("Memory limit updated: {} MB ({}%)", limit / 1024 / 1024, (mem_fraction * 100.0) as u32);
    }
}
