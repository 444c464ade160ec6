#![forbid(unsafe_code)]

//! The editor-facing history session.
//!
//! A [`HistorySession`] owns everything one editor instance needs: the
//! undo/redo store, the document it records, the clock and deferred-call
//! table, registered recovery handlers, the notification bus and counters.
//! There is no global state, so any number of sessions can coexist.
//!
//! The commit side lives in [`recorder`](crate::recorder), the undo/redo side
//! in [`recovery`](crate::recovery). This module holds construction, queries,
//! the timer pump and maintenance.
//!
//! # Driving timers
//!
//! Nothing happens in the background. Throttled commits, the drain debounce
//! and the apply tick only fire from [`poll`](HistorySession::poll):
//!
//! ```text
//! loop {
//!     handle_ui_events(&mut session);
//!     session.poll();
//!     sleep_until(session.next_deadline());
//! }
//! ```

use serde::Serialize;
use web_time::{Duration, Instant};

use crate::adapter::{DocumentAdapter, EditPanel};
use crate::config::HistoryConfig;
use crate::events::{EventBus, HistoryEvent, HistoryStatus, Subscription};
use crate::handlers::HandlerRegistry;
use crate::record::ChangeRecord;
use crate::recorder::UpdateSnapshot;
use crate::recovery::Phase;
use crate::scheduler::{Clock, Deferred, ManualClock, SystemClock};
use crate::shortcuts::{HistoryCommand, KeyChord, ShortcutMap};
use crate::store::{HistorySnapshot, HistoryStore};

pub(crate) const LOG_TARGET: &str = "uscore.history";

/// Deferred calls a session can have armed.
///
/// `commit_change` and `commit_data` throttle in separate windows: a
/// throttled data commit neither suppresses nor flushes a pending change
/// capture, and the reverse holds too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timer {
    /// End of the `commit_change` throttle window.
    ChangeThrottle,
    /// End of the `commit_data` throttle window.
    DataThrottle,
    /// Debounced start of task draining.
    Drain,
    /// Deferred application of the in-flight task.
    Apply,
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HistoryStats {
    /// Records appended to the undo stack by commits.
    pub commits: u64,
    /// Commits skipped as duplicates of the last record of their kind.
    pub deduplicated: u64,
    /// Throttled calls superseded by a later call in the same window.
    pub coalesced: u64,
    /// Commits abandoned because the node preview was still loading.
    pub dropped_loading: u64,
    /// Commits refused because a recovery was queued or in flight.
    pub rejected_busy: u64,
    /// Recovery tasks applied to the document.
    pub recoveries_applied: u64,
    /// Recovery tasks that could not be applied.
    pub recoveries_failed: u64,
}

/// Change history of one editor instance.
pub struct HistorySession<D, C = SystemClock> {
    pub(crate) store: HistoryStore,
    pub(crate) document: D,
    pub(crate) clock: C,
    pub(crate) timers: Deferred<Timer>,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) events: EventBus,
    pub(crate) edit_panel: Option<Box<dyn EditPanel>>,
    pub(crate) shortcuts: ShortcutMap,
    pub(crate) config: HistoryConfig,
    pub(crate) stats: HistoryStats,
    pub(crate) epoch: Instant,
    pub(crate) phase: Phase,
    pub(crate) staged_update: Option<UpdateSnapshot>,
    pub(crate) pending_change: Option<ChangeRecord>,
    pub(crate) pending_data: Option<ChangeRecord>,
}

impl<D: std::fmt::Debug, C> std::fmt::Debug for HistorySession<D, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistorySession")
            .field("store", &self.store)
            .field("document", &self.document)
            .field("state", &self.phase.state())
            .field("timers", &self.timers.len())
            .field("handlers", &self.handlers)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<D: DocumentAdapter> HistorySession<D> {
    /// Session over `document` with default settings and the wall clock.
    #[must_use]
    pub fn new(document: D) -> Self {
        Self::with_config(document, HistoryConfig::default())
    }

    /// Session over `document` with `config` and the wall clock.
    #[must_use]
    pub fn with_config(document: D, config: HistoryConfig) -> Self {
        Self::with_clock(document, config, SystemClock)
    }
}

impl<D: DocumentAdapter, C: Clock> HistorySession<D, C> {
    /// Session over `document` reading time from `clock`.
    ///
    /// `config` is used as given; call [`HistoryConfig::validated`] first to
    /// reject out-of-range values.
    #[must_use]
    pub fn with_clock(document: D, config: HistoryConfig, clock: C) -> Self {
        let epoch = clock.now();
        Self {
            store: HistoryStore::new(config.max_history),
            document,
            clock,
            timers: Deferred::new(),
            handlers: HandlerRegistry::new(),
            events: EventBus::new(),
            edit_panel: None,
            shortcuts: ShortcutMap::default(),
            config,
            stats: HistoryStats::default(),
            epoch,
            phase: Phase::Idle,
            staged_update: None,
            pending_change: None,
            pending_data: None,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Records available for undo.
    #[must_use]
    pub fn len_undo(&self) -> usize {
        self.store.len_undo()
    }

    /// Records available for redo.
    #[must_use]
    pub fn len_redo(&self) -> usize {
        self.store.len_redo()
    }

    /// Recovery tasks waiting to be applied.
    #[must_use]
    pub fn len_tasks(&self) -> usize {
        self.store.len_tasks()
    }

    /// Current lengths and busy flag, as broadcast in
    /// [`HistoryEvent::HistoryChanged`].
    #[must_use]
    pub fn status(&self) -> HistoryStatus {
        HistoryStatus {
            undo: self.store.len_undo(),
            redo: self.store.len_redo(),
            tasks: self.store.len_tasks(),
            recovering: !matches!(self.phase, Phase::Idle),
        }
    }

    /// Read-only view of the stacks.
    #[must_use]
    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Counters since construction or the last [`clear`](Self::clear).
    #[must_use]
    pub fn stats(&self) -> HistoryStats {
        self.stats
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// The recorded document.
    #[must_use]
    pub fn document(&self) -> &D {
        &self.document
    }

    /// Mutable access to the recorded document, for edits made by the host.
    pub fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }

    /// The session clock.
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    // ========================================================================
    // Wiring
    // ========================================================================

    /// Listen for history notifications while the guard is alive.
    pub fn subscribe(&self, callback: impl Fn(&HistoryEvent) + 'static) -> Subscription {
        self.events.subscribe(callback)
    }

    /// Registry of handlers for `CALLBACK` records.
    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    /// Attach (or with `None`, detach) the edit panel refreshed after
    /// `UPDATE` recoveries.
    pub fn set_edit_panel(&mut self, panel: Option<Box<dyn EditPanel>>) {
        self.edit_panel = panel;
    }

    /// Keyboard bindings used by [`handle_shortcut`](Self::handle_shortcut).
    pub fn shortcuts_mut(&mut self) -> &mut ShortcutMap {
        &mut self.shortcuts
    }

    /// Run the undo or redo bound to `chord`. Returns `true` when the chord
    /// is bound, whether or not there was anything to recover.
    pub fn handle_shortcut(&mut self, chord: &KeyChord) -> bool {
        match self.shortcuts.resolve(chord) {
            Some(HistoryCommand::Undo) => {
                self.undo();
                true
            }
            Some(HistoryCommand::Redo) => {
                self.redo();
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Fire every deferred call that is due. Returns how many fired.
    pub fn poll(&mut self) -> usize {
        let mut fired = 0;
        while let Some(timer) = self.timers.pop_due(self.clock.now()) {
            fired += 1;
            match timer {
                Timer::ChangeThrottle => self.flush_change_throttle(),
                Timer::DataThrottle => self.flush_data_throttle(),
                Timer::Drain => self.drain(),
                Timer::Apply => self.apply_in_flight(),
            }
        }
        fired
    }

    /// When the next deferred call is due, if any is armed.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// No timer armed, no task queued and no recovery in flight.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.timers.is_empty() && self.store.len_tasks() == 0 && matches!(self.phase, Phase::Idle)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop all history, pending commits and queued recoveries.
    pub fn clear(&mut self) {
        self.store.clear();
        self.timers.clear();
        self.phase = Phase::Idle;
        self.staged_update = None;
        self.pending_change = None;
        self.pending_data = None;
        self.stats = HistoryStats::default();
        self.emit_history_changed();
    }

    /// Copy both stacks, e.g. to persist them with a draft.
    #[must_use]
    pub fn snapshot(&self) -> HistorySnapshot {
        self.store.snapshot()
    }

    /// Replace both stacks. Refused (returns `false`) while a recovery is
    /// queued or in flight.
    pub fn restore_snapshot(&mut self, snapshot: HistorySnapshot) -> bool {
        if !matches!(self.phase, Phase::Idle) {
            return false;
        }
        self.store.restore_snapshot(snapshot);
        self.emit_history_changed();
        true
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(crate) fn emit_history_changed(&self) {
        self.events.emit(&HistoryEvent::HistoryChanged(self.status()));
    }

    /// Milliseconds since the session was created.
    pub(crate) fn elapsed_ms(&self) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(self.epoch);
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    pub(crate) fn deadline_after(&self, delay: Duration) -> Instant {
        self.clock.now() + delay
    }
}

impl<D: DocumentAdapter> HistorySession<D, ManualClock> {
    /// Move virtual time forward by `by`, firing every timer on the way in
    /// deadline order. Returns how many fired.
    pub fn advance(&mut self, by: Duration) -> usize {
        let target = self.clock.now() + by;
        let mut fired = 0;
        while let Some(deadline) = self.timers.next_deadline() {
            if deadline > target {
                break;
            }
            self.clock.advance_to(deadline);
            fired += self.poll();
        }
        self.clock.advance_to(target);
        fired + self.poll()
    }

    /// Move virtual time forward until no timer is armed.
    pub fn run_until_settled(&mut self) -> usize {
        let mut fired = 0;
        while let Some(deadline) = self.timers.next_deadline() {
            self.clock.advance_to(deadline);
            fired += self.poll();
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDocument;
    use crate::record::Action;
    use crate::shortcuts::KeyChord;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn session() -> HistorySession<MemoryDocument, ManualClock> {
        HistorySession::with_clock(
            MemoryDocument::new(),
            HistoryConfig::default(),
            ManualClock::new(),
        )
    }

    #[test]
    fn new_session_is_idle_and_empty() {
        let session = session();
        assert_eq!(session.status(), HistoryStatus::default());
        assert!(session.is_settled());
        assert_eq!(session.next_deadline(), None);
    }

    #[test]
    fn commit_notifies_subscribers() {
        let mut session = session();
        let id = session.document_mut().create("us_btn", &"container".into(), 0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let _sub = session.subscribe(move |event| log.borrow_mut().push(event.clone()));

        assert!(session.commit_change(&id, Action::Create, false, None));
        assert_eq!(
            seen.borrow().as_slice(),
            &[HistoryEvent::HistoryChanged(HistoryStatus {
                undo: 1,
                ..HistoryStatus::default()
            })]
        );
    }

    #[test]
    fn advance_fires_chained_timers() {
        let mut session = session();
        let id = session.document_mut().create("us_btn", &"container".into(), 0);
        session.commit_change(&id, Action::Create, false, None);
        session.undo();
        assert!(!session.is_settled());

        // drain at 100 ms, apply 1 ms later
        session.advance(Duration::from_millis(150));
        assert!(session.is_settled());
        assert_eq!((session.len_undo(), session.len_redo()), (0, 1));
    }

    #[test]
    fn shortcut_dispatch() {
        let mut session = session();
        let id = session.document_mut().create("us_btn", &"container".into(), 0);
        session.commit_change(&id, Action::Create, false, None);

        assert!(!session.handle_shortcut(&KeyChord::new('z')));
        assert!(session.handle_shortcut(&KeyChord::ctrl('z')));
        assert_eq!(session.len_tasks(), 1);
        session.run_until_settled();
        assert!(session.handle_shortcut(&KeyChord::ctrl('z').with_shift()));
        session.run_until_settled();
        assert_eq!((session.len_undo(), session.len_redo()), (1, 0));
    }

    #[test]
    fn clear_resets_everything() {
        let mut session = session();
        let id = session.document_mut().create("us_btn", &"container".into(), 0);
        session.commit_change(&id, Action::Create, false, None);
        session.undo();
        session.clear();
        assert!(session.is_settled());
        assert_eq!(session.status(), HistoryStatus::default());
        assert_eq!(session.stats(), HistoryStats::default());
    }

    #[test]
    fn snapshot_refused_while_recovering() {
        let mut session = session();
        let id = session.document_mut().create("us_btn", &"container".into(), 0);
        session.commit_change(&id, Action::Create, false, None);
        let snapshot = session.snapshot();
        session.undo();
        assert!(!session.restore_snapshot(snapshot.clone()));
        session.run_until_settled();
        assert!(session.restore_snapshot(snapshot));
        assert_eq!((session.len_undo(), session.len_redo()), (1, 0));
    }

    #[test]
    fn timestamps_follow_virtual_clock() {
        let mut session = session();
        let id = session.document_mut().create("us_btn", &"container".into(), 0);
        session.clock().advance_ms(1234);
        session.commit_change(&id, Action::Create, false, None);
        assert_eq!(session.store().peek(crate::Direction::Undo).unwrap().timestamp, 1234);
    }
}
