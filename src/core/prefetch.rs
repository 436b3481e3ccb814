//! Render-ahead of frames following the playhead.
//!
//! Each `kick` queues the next `radius` frames on the worker pool. A
//! non-contiguous kick is a seek: the epoch is bumped (queued jobs are
//! skipped) and the cancel flag of running jobs is raised so they give up
//! waiting for the render lock. Completion is reported on a channel.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, trace};
use uuid::Uuid;

use crate::config::RenderSettings;
use crate::core::cache_man::CacheManager;
use crate::core::workers::Workers;
use crate::entities::context::frame_ticks;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrefetchEvent {
    /// `rendered` is false when the frame produced nothing
    Done { scene: Uuid, frame: f32, rendered: bool },
    Cancelled { scene: Uuid, frame: f32 },
}

#[derive(Debug, Default)]
struct Playhead {
    scene: Option<Uuid>,
    frame: f32,
}

pub struct Prefetcher {
    workers: Workers,
    manager: Arc<CacheManager>,
    radius: i32,
    /// (scene, frame ticks) queued or rendering
    inflight: Arc<Mutex<HashSet<(Uuid, i64)>>>,
    /// Cancel flag of the current epoch
    cancel: Mutex<Arc<AtomicBool>>,
    playhead: Mutex<Playhead>,
    tx: Sender<PrefetchEvent>,
    rx: Receiver<PrefetchEvent>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Prefetcher {
    pub fn new(radius: i32, num_threads: usize, manager: Arc<CacheManager>) -> std::io::Result<Self> {
        let workers = Workers::new(num_threads, manager.epoch_ref())?;
        let (tx, rx) = unbounded();
        debug!("Prefetcher: radius={}, threads={}", radius, workers.num_threads());
        Ok(Self {
            workers,
            manager,
            radius,
            inflight: Arc::new(Mutex::new(HashSet::new())),
            cancel: Mutex::new(Arc::new(AtomicBool::new(false))),
            playhead: Mutex::new(Playhead::default()),
            tx,
            rx,
        })
    }

    /// `None` when prefetch is disabled (`prefetch_frames == 0`).
    pub fn from_settings(settings: &RenderSettings, manager: Arc<CacheManager>) -> std::io::Result<Option<Self>> {
        if settings.prefetch_frames <= 0 {
            return Ok(None);
        }
        Self::new(settings.prefetch_frames, settings.worker_threads(), manager).map(Some)
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    /// Completion events of prefetch jobs.
    pub fn events(&self) -> Receiver<PrefetchEvent> {
        self.rx.clone()
    }

    /// Drop queued jobs and stop running ones.
    pub fn cancel(&self) {
        self.manager.increment_epoch();
        let mut cancel = lock(&self.cancel);
        cancel.store(true, Ordering::Relaxed);
        *cancel = Arc::new(AtomicBool::new(false));
    }

    /// Queue frames after `frame`. `render(frame, cancel)` renders one
    /// frame and reports whether it produced anything.
    pub fn kick<F>(&self, scene: Uuid, frame: f32, render: Arc<F>)
    where
        F: Fn(f32, &AtomicBool) -> bool + Send + Sync + 'static,
    {
        {
            let mut playhead = lock(&self.playhead);
            let contiguous = playhead.scene == Some(scene) && {
                let delta = frame - playhead.frame;
                (0.0..=1.0).contains(&delta)
            };
            if !contiguous && playhead.scene.is_some() {
                trace!("Prefetch: seek to {} cancels pending work", frame);
                self.cancel();
            }
            playhead.scene = Some(scene);
            playhead.frame = frame;
        }

        let epoch = self.manager.current_epoch();
        let cancel = Arc::clone(&lock(&self.cancel));

        for offset in 1..=self.radius {
            let target = frame + offset as f32;
            let slot = (scene, frame_ticks(target));
            if !lock(&self.inflight).insert(slot) {
                continue;
            }

            let render = Arc::clone(&render);
            let cancel = Arc::clone(&cancel);
            let inflight = Arc::clone(&self.inflight);
            let tx = self.tx.clone();
            // Stale jobs run too, so they free their slot
            let job_epoch = epoch;
            let epoch_ref = self.manager.epoch_ref();
            self.workers.execute(move || {
                let event = if cancel.load(Ordering::Relaxed) || epoch_ref.load(Ordering::Relaxed) != job_epoch {
                    PrefetchEvent::Cancelled { scene, frame: target }
                } else {
                    let rendered = render(target, &cancel);
                    if cancel.load(Ordering::Relaxed) {
                        PrefetchEvent::Cancelled { scene, frame: target }
                    } else {
                        PrefetchEvent::Done { scene, frame: target, rendered }
                    }
                };
                lock(&inflight).remove(&slot);
                if tx.send(event).is_err() {
                    trace!("Prefetch: {:?} dropped, prefetcher is gone", event);
                }
            });
        }
    }

    pub fn inflight(&self) -> usize {
        lock(&self.inflight).len()
    }

    /// Block until queued work drains. Returns true if it did in time.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.workers.wait_idle(timeout)
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn prefetcher(radius: i32) -> Prefetcher {
        Prefetcher::new(radius, 2, Arc::new(CacheManager::with_limit(usize::MAX))).unwrap()
    }

    #[test]
    fn test_renders_ahead() {
        let p = prefetcher(3);
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&rendered);
        let render = Arc::new(move |f: f32, _c: &AtomicBool| {
            lock(&r).push(f);
            true
        });

        let scene = Uuid::new_v4();
        p.kick(scene, 10.0, render);
        assert!(p.wait_idle(Duration::from_secs(5)));

        let mut frames = lock(&rendered).clone();
        frames.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(frames, vec![11.0, 12.0, 13.0]);
        assert_eq!(p.inflight(), 0);

        let events: Vec<PrefetchEvent> = p.events().try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| matches!(e, PrefetchEvent::Done { rendered: true, .. })));
    }

    /// A seek raises the cancel flag seen by running jobs.
    #[test]
    fn test_seek_cancels_running_job() {
        let p = prefetcher(1);
        let started = Arc::new(AtomicBool::new(false));
        let observed_cancel = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&started);
        let o = Arc::clone(&observed_cancel);
        let slow = Arc::new(move |_f: f32, cancel: &AtomicBool| {
            s.store(true, Ordering::SeqCst);
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while !cancel.load(Ordering::Relaxed) && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            if cancel.load(Ordering::Relaxed) {
                o.fetch_add(1, Ordering::SeqCst);
            }
            false
        });

        let scene = Uuid::new_v4();
        p.kick(scene, 1.0, Arc::clone(&slow));
        while !started.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        p.kick(scene, 50.0, Arc::new(|_f: f32, _c: &AtomicBool| true));
        assert!(p.wait_idle(Duration::from_secs(5)));
        assert_eq!(observed_cancel.load(Ordering::SeqCst), 1);
    }

    /// A job outliving its prefetcher finishes without a listener.
    #[test]
    fn test_drop_with_running_job() {
        let p = prefetcher(1);
        let started = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let (s, r, f) = (Arc::clone(&started), Arc::clone(&release), Arc::clone(&finished));
        let blocked = Arc::new(move |_f: f32, _c: &AtomicBool| {
            s.store(true, Ordering::SeqCst);
            while !r.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            f.store(true, Ordering::SeqCst);
            true
        });
        p.kick(Uuid::new_v4(), 1.0, blocked);
        while !started.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }

        let dropped_at = std::time::Instant::now();
        drop(p);
        assert!(dropped_at.elapsed() < Duration::from_secs(5));

        release.store(true, Ordering::SeqCst);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !finished.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_disabled_by_settings() {
        let settings = RenderSettings::default();
        let manager = Arc::new(CacheManager::with_limit(usize::MAX));
        assert!(Prefetcher::from_settings(&settings, manager).unwrap().is_none());
    }
}
