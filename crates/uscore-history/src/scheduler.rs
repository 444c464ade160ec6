#![forbid(unsafe_code)]

//! Time source and cancellable deferred calls.
//!
//! The history engine never sleeps and never spawns. Throttled commits,
//! the recovery drain and the deferred apply tick are entries in a
//! [`Deferred`] table; the host calls
//! [`HistorySession::poll`](crate::HistorySession::poll) from its event loop
//! and every entry whose deadline has passed fires, in deadline order.
//!
//! Tests inject a [`ManualClock`] and advance virtual time explicitly, so
//! every timing rule (2 s throttle window, 100 ms drain debounce) is
//! reproducible without real sleeps.
//!
//! ```
//! use uscore_history::scheduler::{Clock, Deferred, ManualClock};
//! use web_time::Duration;
//!
//! let clock = ManualClock::new();
//! let mut timers = Deferred::new();
//! timers.schedule("drain", clock.now() + Duration::from_millis(100));
//!
//! assert_eq!(timers.pop_due(clock.now()), None);
//! clock.advance(Duration::from_millis(100));
//! assert_eq!(timers.pop_due(clock.now()), Some("drain"));
//! ```

use std::cell::Cell;
use std::rc::Rc;

use web_time::{Duration, Instant};

/// Source of the current instant.
pub trait Clock {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Virtual clock that only moves when told to.
///
/// Clones share the same time line, so a test can keep one handle while the
/// session owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Rc<Cell<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Clock frozen at the moment of construction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.elapsed.set(self.elapsed.get().saturating_add(by));
    }

    /// Move time forward by `ms` milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Move time forward to `deadline`. Never moves backwards.
    pub fn advance_to(&self, deadline: Instant) {
        let target = deadline.saturating_duration_since(self.origin);
        if target > self.elapsed.get() {
            self.elapsed.set(target);
        }
    }

    /// Virtual time elapsed since construction.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }
}

/// Table of pending deferred calls, at most one per key.
///
/// `schedule` re-arms an existing entry (debounce), `schedule_if_idle`
/// leaves it alone (fixed window). Entries with equal deadlines fire in
/// scheduling order.
#[derive(Debug, Clone)]
pub struct Deferred<K> {
    pending: Vec<(K, Instant)>,
}

impl<K> Default for Deferred<K> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<K: Copy + Eq> Deferred<K> {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` for `due`, replacing any previous deadline.
    pub fn schedule(&mut self, key: K, due: Instant) {
        self.cancel(key);
        self.pending.push((key, due));
    }

    /// Arm `key` for `due` only if it is not already armed.
    ///
    /// Returns `true` when a new entry was created.
    pub fn schedule_if_idle(&mut self, key: K, due: Instant) -> bool {
        if self.is_scheduled(key) {
            return false;
        }
        self.pending.push((key, due));
        true
    }

    /// Disarm `key`. Returns `true` if it was armed.
    pub fn cancel(&mut self, key: K) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(k, _)| *k != key);
        self.pending.len() != before
    }

    /// Whether `key` is armed.
    #[must_use]
    pub fn is_scheduled(&self, key: K) -> bool {
        self.pending.iter().any(|(k, _)| *k == key)
    }

    /// Deadline of `key`, if armed.
    #[must_use]
    pub fn deadline(&self, key: K) -> Option<Instant> {
        self.pending
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, due)| *due)
    }

    /// Earliest deadline across all entries.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|(_, due)| *due).min()
    }

    /// Remove and return the earliest entry due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<K> {
        let (position, _) = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, (_, due))| *due <= now)
            .min_by_key(|(position, (_, due))| (*due, *position))?;
        Some(self.pending.remove(position).0)
    }

    /// Number of armed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is armed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Disarm everything.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();
        other.advance_ms(250);
        assert_eq!(clock.now() - start, Duration::from_millis(250));
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn advance_to_never_goes_back() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance_ms(100);
        clock.advance_to(start + Duration::from_millis(50));
        assert_eq!(clock.elapsed(), Duration::from_millis(100));
        clock.advance_to(start + Duration::from_millis(400));
        assert_eq!(clock.elapsed(), Duration::from_millis(400));
    }

    #[test]
    fn schedule_rearms_and_if_idle_keeps() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        let mut timers = Deferred::new();

        timers.schedule(1, t0 + Duration::from_millis(100));
        timers.schedule(1, t0 + Duration::from_millis(300));
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.deadline(1), Some(t0 + Duration::from_millis(300)));

        assert!(timers.schedule_if_idle(2, t0 + Duration::from_millis(2000)));
        assert!(!timers.schedule_if_idle(2, t0 + Duration::from_millis(3000)));
        assert_eq!(timers.deadline(2), Some(t0 + Duration::from_millis(2000)));
    }

    #[test]
    fn pop_due_orders_by_deadline_then_insertion() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        let mut timers = Deferred::new();
        timers.schedule('c', t0 + Duration::from_millis(5));
        timers.schedule('a', t0 + Duration::from_millis(1));
        timers.schedule('b', t0 + Duration::from_millis(1));

        assert_eq!(timers.next_deadline(), Some(t0 + Duration::from_millis(1)));
        assert_eq!(timers.pop_due(t0), None);

        let later = t0 + Duration::from_millis(10);
        assert_eq!(timers.pop_due(later), Some('a'));
        assert_eq!(timers.pop_due(later), Some('b'));
        assert_eq!(timers.pop_due(later), Some('c'));
        assert_eq!(timers.pop_due(later), None);
        assert!(timers.is_empty());
    }

    #[test]
    fn cancel_disarms() {
        let clock = ManualClock::new();
        let mut timers = Deferred::new();
        timers.schedule("apply", clock.now());
        assert!(timers.cancel("apply"));
        assert!(!timers.cancel("apply"));
        assert!(!timers.is_scheduled("apply"));
        assert_eq!(timers.next_deadline(), None);
    }
}
