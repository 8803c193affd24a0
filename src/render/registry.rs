// SPDX-License-Identifier: GPL-3.0-only

//! Destination registry shared between callers and the render worker
//!
//! Native targets live on the worker; this registry holds the parts every
//! thread may look at. All map access goes through the lock so readers never
//! observe a half-inserted entry.

use super::DestinationId;
use crate::errors::{EngineError, EngineResult};
use crate::gpu::Mat4;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Per-destination attributes callers may change without going through the queue
#[derive(Debug)]
pub struct DestinationAttributes {
    enabled: AtomicBool,
    transform: Mutex<Mat4>,
    max_fps: Option<u32>,
}

impl DestinationAttributes {
    pub fn new(transform: Mat4, max_fps: Option<u32>) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            transform: Mutex::new(transform),
            max_fps: max_fps.filter(|fps| *fps > 0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn transform(&self) -> Mat4 {
        *self.transform.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_transform(&self, transform: Mat4) {
        *self.transform.lock().unwrap_or_else(PoisonError::into_inner) = transform;
    }

    pub fn update_transform(&self, f: impl FnOnce(&mut Mat4)) {
        f(&mut self.transform.lock().unwrap_or_else(PoisonError::into_inner));
    }

    pub fn max_fps(&self) -> Option<u32> {
        self.max_fps
    }
}

/// "Next allowed draw time" gate of a frame-rate capped destination
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    interval: Duration,
    next_draw: Option<Instant>,
}

impl Throttle {
    /// `None` for an uncapped destination
    pub fn from_max_fps(max_fps: Option<u32>) -> Option<Self> {
        let fps = max_fps.filter(|fps| *fps > 0)?;
        Some(Self {
            interval: Duration::from_nanos(1_000_000_000 / u64::from(fps)),
            next_draw: None,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The first draw is always due
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_draw.is_none_or(|next| now >= next)
    }

    pub fn mark_drawn(&mut self, now: Instant) {
        self.next_draw = Some(now + self.interval);
    }
}

/// Result of a registry-changing command, handed to the caller waiting on it
#[derive(Debug, Clone)]
pub enum Outcome {
    Added,
    AlreadyPresent,
    Removed(usize),
    NotPresent,
    Recreated,
    Failed(EngineError),
}

struct RegistryState {
    entries: HashMap<DestinationId, Arc<DestinationAttributes>>,
    applied_seq: u64,
    outcomes: HashMap<u64, Outcome>,
    closed: bool,
}

pub struct SurfaceRegistry {
    state: Mutex<RegistryState>,
    changed: Condvar,
}

impl Default for SurfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                entries: HashMap::new(),
                applied_seq: 0,
                outcomes: HashMap::new(),
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert unless present; the first registration wins
    pub fn insert(&self, id: DestinationId, attributes: Arc<DestinationAttributes>) -> bool {
        let mut state = self.lock();
        if state.entries.contains_key(&id) {
            return false;
        }
        state.entries.insert(id, attributes);
        true
    }

    pub fn remove(&self, id: DestinationId) -> Option<Arc<DestinationAttributes>> {
        self.lock().entries.remove(&id)
    }

    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let removed = state.entries.len();
        state.entries.clear();
        removed
    }

    pub fn get(&self, id: DestinationId) -> Option<Arc<DestinationAttributes>> {
        self.lock().entries.get(&id).cloned()
    }

    pub fn contains(&self, id: DestinationId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<DestinationId> {
        let mut ids: Vec<_> = self.lock().entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Publish that command `seq` finished, with an optional outcome for its waiter
    pub fn complete(&self, seq: u64, outcome: Option<Outcome>) {
        let mut state = self.lock();
        state.applied_seq = state.applied_seq.max(seq);
        if let Some(outcome) = outcome {
            state.outcomes.insert(seq, outcome);
        }
        self.changed.notify_all();
    }

    /// Block until command `seq` was applied or the registry closed
    pub fn wait_applied(&self, seq: u64) -> EngineResult<Option<Outcome>> {
        let mut state = self.lock();
        loop {
            if state.applied_seq >= seq {
                return Ok(state.outcomes.remove(&seq));
            }
            if state.closed {
                return Err(EngineError::AlreadyReleased);
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Sleep up to `timeout`, waking early on any registry change or close
    pub fn pause(&self, timeout: Duration) {
        let state = self.lock();
        if state.closed {
            return;
        }
        let _unused = self
            .changed
            .wait_timeout(state, timeout)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Wake every waiter and refuse further waits
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.outcomes.clear();
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::MirrorMode;
    use std::thread;

    fn attrs() -> Arc<DestinationAttributes> {
        Arc::new(DestinationAttributes::new(Mat4::IDENTITY, None))
    }

    #[test]
    fn first_insert_wins() {
        let registry = SurfaceRegistry::new();
        let first = Arc::new(DestinationAttributes::new(Mat4::IDENTITY, Some(10)));
        assert!(registry.insert(1, Arc::clone(&first)));
        assert!(!registry.insert(1, attrs()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(1).unwrap().max_fps(), Some(10));
    }

    #[test]
    fn remove_unknown_is_none() {
        let registry = SurfaceRegistry::new();
        assert!(registry.remove(42).is_none());
        registry.insert(1, attrs());
        registry.insert(2, attrs());
        assert_eq!(registry.ids(), vec![1, 2]);
        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn zero_fps_means_unthrottled() {
        assert!(Throttle::from_max_fps(Some(0)).is_none());
        assert!(Throttle::from_max_fps(None).is_none());
        assert_eq!(DestinationAttributes::new(Mat4::IDENTITY, Some(0)).max_fps(), None);
    }

    #[test]
    fn throttle_interval_and_due() {
        let mut throttle = Throttle::from_max_fps(Some(4)).unwrap();
        assert_eq!(throttle.interval(), Duration::from_millis(250));
        let start = Instant::now();
        assert!(throttle.is_due(start));
        throttle.mark_drawn(start);
        assert!(!throttle.is_due(start + Duration::from_millis(100)));
        assert!(throttle.is_due(start + Duration::from_millis(250)));
    }

    #[test]
    fn enabled_and_transform_are_shared() {
        let a = attrs();
        assert!(a.is_enabled());
        a.set_enabled(false);
        assert!(!a.is_enabled());
        a.update_transform(|m| m.remirror(MirrorMode::Normal, MirrorMode::Horizontal));
        assert_eq!(a.transform().get(0, 0), -1.0);
    }

    #[test]
    fn waiter_receives_outcome() {
        let registry = Arc::new(SurfaceRegistry::new());
        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.wait_applied(3))
        };
        registry.complete(2, None);
        registry.complete(3, Some(Outcome::Added));
        let outcome = waiter.join().unwrap().unwrap();
        assert!(matches!(outcome, Some(Outcome::Added)));
    }

    #[test]
    fn close_releases_waiters() {
        let registry = Arc::new(SurfaceRegistry::new());
        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.wait_applied(10))
        };
        thread::sleep(Duration::from_millis(20));
        registry.close();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(EngineError::AlreadyReleased)
        ));
    }
}
