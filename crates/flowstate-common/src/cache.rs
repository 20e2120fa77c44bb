//! Time-windowed cache shared by every store.
//!
//! A [`RefreshCache`] holds one immutable snapshot and the instant it was
//! built. Every access goes through a single mutex: the freshness check,
//! the rebuild (when the window has elapsed) and the read all happen under
//! the same guard, so no caller ever observes a half-built snapshot.
//!
//! A failed rebuild leaves the previous snapshot and its timestamp in
//! place. Because the timestamp is unchanged the snapshot is still stale,
//! so the next call retries immediately.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::Result;

/// Source of the current instant, injectable for tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// The monotonic system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A snapshot rebuilt at most once per refresh interval.
pub struct RefreshCache<T> {
    name: &'static str,
    clock: Arc<dyn Clock>,
    interval: Duration,
    snapshot: Mutex<Option<(T, Instant)>>,
}

impl<T> RefreshCache<T> {
    /// Creates an empty cache; the first access always rebuilds.
    #[must_use]
    pub fn new(name: &'static str, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            name,
            clock,
            interval,
            snapshot: Mutex::new(None),
        }
    }

    /// Runs `read` against a fresh snapshot, calling `rebuild` first when
    /// the snapshot is missing or older than the refresh interval.
    ///
    /// The lock is held for the whole sequence, including `rebuild`.
    ///
    /// # Errors
    ///
    /// Returns the error from `rebuild`; the previous snapshot is kept.
    pub fn read<R>(
        &self,
        rebuild: impl FnOnce() -> Result<T>,
        read: impl FnOnce(&T) -> R,
    ) -> Result<R> {
        let mut guard = self.lock();
        let now = self.clock.now();

        if let Some((snapshot, built_at)) = guard.as_ref() {
            if now.saturating_duration_since(*built_at) <= self.interval {
                tracing::debug!(cache = self.name, "serving cached snapshot");
                return Ok(read(snapshot));
            }
        }

        let rebuilt = rebuild().inspect_err(|e| {
            tracing::warn!(cache = self.name, error = %e, "rebuild failed, keeping previous snapshot");
        })?;
        let (snapshot, _) = guard.insert((rebuilt, self.clock.now()));
        Ok(read(snapshot))
    }

    /// Returns the instant of the last successful rebuild, if any.
    pub fn last_refresh(&self) -> Option<Instant> {
        self.lock().as_ref().map(|(_, built_at)| *built_at)
    }

    fn lock(&self) -> MutexGuard<'_, Option<(T, Instant)>> {
        // A panic inside `read` cannot leave a half-written snapshot behind:
        // the snapshot is only ever replaced whole.
        self.snapshot.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(cache = self.name, "cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl<T> std::fmt::Debug for RefreshCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCache")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
