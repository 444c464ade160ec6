#![forbid(unsafe_code)]

//! Undo and redo stacks plus the queue of pending recovery tasks.
//!
//! [`HistoryStore`] is plain owned state. It never talks to the document
//! and never notifies anyone; the session wraps every mutation with the
//! matching event.
//!
//! # Invariants
//!
//! 1. `undo.len() <= max_history` and `redo.len() <= max_history` after any
//!    operation. Overflow evicts from the front (oldest first).
//! 2. [`append`](HistoryStore::append) clears `redo`. Reversal pushes made
//!    during recovery never do.
//! 3. `tasks` is LIFO: the most recently requested recovery runs first.
//!
//! ```text
//! append(r4)                undo: [r1 r2 r3 r4]   redo: []
//! pop(Undo) -> r4           undo: [r1 r2 r3]      redo: []
//! push_reversal(Undo, r4')  undo: [r1 r2 r3]      redo: [r4']
//! append(r5)                undo: [r1 r2 r3 r5]   redo: []   <- new branch
//! ```

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::{Action, ChangeRecord, Direction, RecoveryTask};

/// Serializable copy of both stacks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistorySnapshot {
    /// Undo stack, oldest first.
    pub undo: Vec<ChangeRecord>,
    /// Redo stack, oldest first.
    pub redo: Vec<ChangeRecord>,
}

/// Bounded undo/redo stacks and the recovery task queue.
#[derive(Clone)]
pub struct HistoryStore {
    /// Records available for undo (newest at back).
    undo: VecDeque<ChangeRecord>,
    /// Records available for redo (newest at back).
    redo: VecDeque<ChangeRecord>,
    /// Popped records waiting to be replayed (newest at back).
    tasks: Vec<RecoveryTask>,
    max_history: usize,
}

impl fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryStore")
            .field("undo_depth", &self.undo.len())
            .field("redo_depth", &self.redo.len())
            .field("tasks", &self.tasks.len())
            .field("max_history", &self.max_history)
            .finish()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(100)
    }
}

impl HistoryStore {
    /// Empty store holding at most `max_history` records per stack.
    /// A cap of zero is treated as one.
    #[must_use]
    pub fn new(max_history: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            tasks: Vec::new(),
            max_history: max_history.max(1),
        }
    }

    /// Per-stack cap.
    #[must_use]
    pub fn max_history(&self) -> usize {
        self.max_history
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Records available for undo.
    #[must_use]
    pub fn len_undo(&self) -> usize {
        self.undo.len()
    }

    /// Records available for redo.
    #[must_use]
    pub fn len_redo(&self) -> usize {
        self.redo.len()
    }

    /// Recovery tasks waiting to be applied.
    #[must_use]
    pub fn len_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Most recent undo record of kind `action`, scanning from the top.
    #[must_use]
    pub fn find_last_by_action(&self, action: Action) -> Option<&ChangeRecord> {
        self.undo.iter().rev().find(|record| record.action() == action)
    }

    /// Top of the stack `direction` pops from.
    #[must_use]
    pub fn peek(&self, direction: Direction) -> Option<&ChangeRecord> {
        self.stack(direction).back()
    }

    /// Undo records, oldest first.
    pub fn undo_records(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.undo.iter()
    }

    /// Redo records, oldest first.
    pub fn redo_records(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.redo.iter()
    }

    /// Approximate bytes held by both stacks and the queue.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.undo
            .iter()
            .chain(&self.redo)
            .chain(self.tasks.iter().map(|task| &task.record))
            .map(ChangeRecord::size_bytes)
            .sum()
    }

    // ========================================================================
    // Core Operations
    // ========================================================================

    /// Push a freshly committed record. Evicts the oldest record at the cap
    /// and clears the redo stack.
    pub fn append(&mut self, record: ChangeRecord) {
        while self.undo.len() >= self.max_history {
            self.undo.pop_front();
        }
        self.undo.push_back(record);
        self.redo.clear();
    }

    /// Pop the top record of the stack `direction` replays from.
    pub fn pop(&mut self, direction: Direction) -> Option<ChangeRecord> {
        self.stack_mut(direction).pop_back()
    }

    /// Push the reversal of a `direction` task onto the opposite stack.
    pub fn push_reversal(&mut self, direction: Direction, record: ChangeRecord) {
        self.push_bounded(direction.opposite(), record);
    }

    /// Put a record back onto the stack it was popped from.
    pub fn restore(&mut self, direction: Direction, record: ChangeRecord) {
        self.push_bounded(direction, record);
    }

    /// Queue a popped record for replay.
    pub fn enqueue_recovery_task(&mut self, task: RecoveryTask) {
        self.tasks.push(task);
    }

    /// Take the most recently queued task.
    pub fn pop_task(&mut self) -> Option<RecoveryTask> {
        self.tasks.pop()
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop every record and task.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.tasks.clear();
    }

    /// Copy both stacks.
    #[must_use]
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            undo: self.undo.iter().cloned().collect(),
            redo: self.redo.iter().cloned().collect(),
        }
    }

    /// Replace both stacks with `snapshot`, keeping the newest records when
    /// it exceeds the cap. Pending tasks are discarded.
    pub fn restore_snapshot(&mut self, snapshot: HistorySnapshot) {
        self.clear();
        for record in snapshot.undo {
            self.push_bounded(Direction::Undo, record);
        }
        for record in snapshot.redo {
            self.push_bounded(Direction::Redo, record);
        }
    }

    fn push_bounded(&mut self, direction: Direction, record: ChangeRecord) {
        let max = self.max_history;
        let stack = self.stack_mut(direction);
        while stack.len() >= max {
            stack.pop_front();
        }
        stack.push_back(record);
    }

    fn stack(&self, direction: Direction) -> &VecDeque<ChangeRecord> {
        match direction {
            Direction::Undo => &self.undo,
            Direction::Redo => &self.redo,
        }
    }

    fn stack_mut(&mut self, direction: Direction) -> &mut VecDeque<ChangeRecord> {
        match direction {
            Direction::Undo => &mut self.undo,
            Direction::Redo => &mut self.redo,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Change, NodeId};

    fn update(id: &str, content: &str) -> ChangeRecord {
        ChangeRecord::new(
            NodeId::from(id),
            Change::Update {
                content: content.into(),
                preview: String::new(),
            },
        )
    }

    fn create(id: &str) -> ChangeRecord {
        ChangeRecord::new(NodeId::from(id), Change::Create)
    }

    #[test]
    fn append_evicts_oldest_at_cap() {
        let mut store = HistoryStore::new(3);
        for i in 0..5 {
            store.append(update("us_btn:1", &i.to_string()));
        }
        assert_eq!(store.len_undo(), 3);
        let contents: Vec<_> = store
            .undo_records()
            .map(|r| match &r.change {
                Change::Update { content, .. } => content.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(contents, ["2", "3", "4"]);
    }

    #[test]
    fn append_clears_redo() {
        let mut store = HistoryStore::default();
        store.append(create("us_btn:1"));
        let record = store.pop(Direction::Undo).unwrap();
        store.push_reversal(Direction::Undo, record);
        assert_eq!(store.len_redo(), 1);

        store.append(create("us_btn:2"));
        assert_eq!(store.len_redo(), 0);
        assert_eq!(store.len_undo(), 1);
    }

    #[test]
    fn reversal_goes_to_opposite_stack_without_clearing() {
        let mut store = HistoryStore::default();
        store.append(create("us_btn:1"));
        store.append(create("us_btn:2"));

        let top = store.pop(Direction::Undo).unwrap();
        store.push_reversal(Direction::Undo, top);
        let next = store.pop(Direction::Undo).unwrap();
        store.push_reversal(Direction::Undo, next);
        assert_eq!((store.len_undo(), store.len_redo()), (0, 2));

        let back = store.pop(Direction::Redo).unwrap();
        assert_eq!(back.id, Some(NodeId::from("us_btn:1")));
        store.push_reversal(Direction::Redo, back);
        assert_eq!((store.len_undo(), store.len_redo()), (1, 1));
    }

    #[test]
    fn find_last_by_action_scans_from_top() {
        let mut store = HistoryStore::default();
        store.append(update("us_btn:1", "a"));
        store.append(update("us_btn:1", "b"));
        store.append(create("us_btn:2"));

        let last = store.find_last_by_action(Action::Update).unwrap();
        assert_eq!(last, &update("us_btn:1", "b"));
        assert!(store.find_last_by_action(Action::Move).is_none());
    }

    #[test]
    fn tasks_are_lifo() {
        let mut store = HistoryStore::default();
        store.enqueue_recovery_task(RecoveryTask::new(Direction::Undo, create("us_btn:1")));
        store.enqueue_recovery_task(RecoveryTask::new(Direction::Undo, create("us_btn:2")));
        assert_eq!(store.len_tasks(), 2);
        let first = store.pop_task().unwrap();
        assert_eq!(first.record.id, Some(NodeId::from("us_btn:2")));
    }

    #[test]
    fn restore_returns_record_to_source() {
        let mut store = HistoryStore::default();
        store.append(create("us_btn:1"));
        let record = store.pop(Direction::Undo).unwrap();
        store.restore(Direction::Undo, record);
        assert_eq!((store.len_undo(), store.len_redo()), (1, 0));
    }

    #[test]
    fn zero_cap_is_clamped() {
        let mut store = HistoryStore::new(0);
        store.append(create("us_btn:1"));
        store.append(create("us_btn:2"));
        assert_eq!(store.max_history(), 1);
        assert_eq!(store.len_undo(), 1);
    }

    #[test]
    fn snapshot_round_trip_keeps_newest() {
        let mut store = HistoryStore::new(5);
        for i in 0..4 {
            store.append(update("us_btn:1", &i.to_string()));
        }
        let snapshot = store.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: HistorySnapshot = serde_json::from_str(&json).unwrap();

        let mut small = HistoryStore::new(2);
        small.enqueue_recovery_task(RecoveryTask::new(Direction::Undo, create("us_btn:9")));
        small.restore_snapshot(back);
        assert_eq!(small.len_undo(), 2);
        assert_eq!(small.len_tasks(), 0);
        assert_eq!(small.peek(Direction::Undo), Some(&update("us_btn:1", "3")));
    }

    #[test]
    fn memory_usage_tracks_payload() {
        let mut store = HistoryStore::default();
        assert_eq!(store.memory_usage(), 0);
        store.append(update("us_btn:1", &"x".repeat(1000)));
        assert!(store.memory_usage() >= 1000);
        store.clear();
        assert_eq!(store.memory_usage(), 0);
    }
}
