//! Renderer constants and persisted settings.

use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::entities::CacheTier;

/// Upper bound of strips composited at one frame.
pub const MAX_STRIPS: usize = 128;

/// Longest side of a strip thumbnail, in pixels.
pub const THUMB_SIZE: usize = 256;

/// Settings file name inside the config dir.
pub const SETTINGS_FILE: &str = "seqrender.json";

/// Renderer settings (cache budget, prefetch, decoder pool).
///
/// Missing fields fall back to defaults so older files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Maximum cached frames before LRU eviction kicks in
    pub cache_capacity: usize,
    /// Fraction of available memory the cache may use (0.0-1.0)
    pub mem_fraction: f64,
    /// Memory kept free for the system (GB)
    pub reserve_gb: f64,
    /// Tiers that survive frame changes; the rest are temporary per task
    pub persistent_tiers: Vec<CacheTier>,
    /// Frames rendered ahead of the playhead (0 disables prefetch)
    pub prefetch_frames: i32,
    /// Prefetch worker threads (None = 3/4 of the cores)
    pub workers: Option<usize>,
    /// Open movie decoders kept alive
    pub max_open_decoders: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            mem_fraction: 0.5,
            reserve_gb: 2.0,
            persistent_tiers: vec![CacheTier::Raw, CacheTier::Final],
            prefetch_frames: 0,
            workers: None,
            max_open_decoders: 32,
        }
    }
}

impl RenderSettings {
    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load settings, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save settings as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write settings: {}", path.display()))?;
        Ok(())
    }

    /// Worker count with the 3/4-of-cores default, at least one thread.
    pub fn worker_threads(&self) -> usize {
        self.workers
            .unwrap_or_else(|| num_cpus::get() * 3 / 4)
            .max(1)
    }
}
