//! Open movie decoders, reused across frames.
//!
//! Decoders are keyed by (strip, view) and bounded by an LRU. The
//! orchestrator calls `release_except` with the strips visible at the
//! rendered frame so handles of strips that left the frame get closed.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use log::{debug, trace};
use lru::LruCache;
use uuid::Uuid;

use crate::entities::traits::MovieDecoder;

const DEFAULT_MAX_OPEN: usize = 32;

type DecoderKey = (Uuid, usize);

pub struct MediaPool {
    decoders: Mutex<LruCache<DecoderKey, Box<dyn MovieDecoder>>>,
}

impl std::fmt::Debug for MediaPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPool").field("open", &self.len()).finish()
    }
}

impl MediaPool {
    pub fn new(max_open: usize) -> Self {
        let cap = NonZeroUsize::new(max_open).unwrap_or(NonZeroUsize::MIN);
        Self { decoders: Mutex::new(LruCache::new(cap)) }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<DecoderKey, Box<dyn MovieDecoder>>> {
        self.decoders.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` on the decoder of (`strip`, `view`), opening it with `open`
    /// on first use. `None` when opening fails.
    pub fn with_decoder<R>(
        &self,
        strip: Uuid,
        view: usize,
        open: impl FnOnce() -> Option<Box<dyn MovieDecoder>>,
        f: impl FnOnce(&mut dyn MovieDecoder) -> R,
    ) -> Option<R> {
        let mut decoders = self.lock();
        let key = (strip, view);
        if !decoders.contains(&key) {
            let decoder = open()?;
            debug!("Opened decoder for strip {} view {} ({} frames)", strip, view, decoder.frame_count());
            if let Some((old, _)) = decoders.push(key, decoder)
                && old != key
            {
                trace!("Closed decoder for strip {} (pool full)", old.0);
            }
        }
        let decoder = decoders.get_mut(&key)?;
        Some(f(decoder.as_mut()))
    }

    /// Close decoders of strips outside `visible`.
    pub fn release_except(&self, visible: &HashSet<Uuid>) {
        let mut decoders = self.lock();
        let stale: Vec<DecoderKey> = decoders
            .iter()
            .map(|(k, _)| *k)
            .filter(|(strip, _)| !visible.contains(strip))
            .collect();
        for key in stale {
            decoders.pop(&key);
            trace!("Released decoder for strip {} view {}", key.0, key.1);
        }
    }

    pub fn release_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MediaPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OPEN)
    }
}
