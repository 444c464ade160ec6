#![forbid(unsafe_code)]

//! Recovery task manager: replays undo and redo requests one at a time.
//!
//! # State Machine
//!
//! ```text
//!             undo()/redo()                 drain timer (100 ms after
//! ┌──────┐   (record popped,   ┌─────────────┐  the last request)   ┌───────────┐
//! │ Idle │──────────────────▶│ TaskPending │────────────────────▶│ Replaying │
//! └──────┘   task queued)     └─────────────┘                      └───────────┘
//!     ▲                          ▲      │ queue empty                    │
//!     │                          │      ▼                                │ apply tick
//!     └──────────────────────────┼──────┘                                │
//!                                └───────────────────────────────────────┘
//!                                  task applied (or failed), next task
//! ```
//!
//! While a session is not `Idle` every commit is refused. Requests made
//! during `Replaying` only grow the queue; the in-flight task always
//! completes first.
//!
//! # Reversal
//!
//! Before a task touches the document, the manager captures the record that
//! will undo it: `CREATE` and `REMOVE` swap, `MOVE` and `UPDATE` recapture
//! position or content. Once the task is applied, the reversal is pushed onto
//! the opposite stack. A task that cannot be applied leaves no reversal.

use std::fmt;

use serde::Serialize;
use tracing::{debug, debug_span, error, warn};

use crate::adapter::DocumentAdapter;
use crate::config::FailedRecoveryPolicy;
use crate::events::HistoryEvent;
use crate::record::{Action, Change, ChangeRecord, Direction, NodeId, RecoveryTask};
use crate::scheduler::Clock;
use crate::session::{HistorySession, LOG_TARGET, Timer};

/// Public view of the recovery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    /// Nothing queued.
    Idle,
    /// Tasks are queued and the drain has not started them yet.
    TaskPending,
    /// One task is being applied.
    Replaying,
}

/// A task taken off the queue together with its captured reversal.
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    task: RecoveryTask,
    reversal: ChangeRecord,
}

#[derive(Debug, Clone)]
pub(crate) enum Phase {
    Idle,
    TaskPending,
    Replaying(Box<InFlight>),
}

impl Phase {
    pub(crate) fn state(&self) -> RecoveryState {
        match self {
            Self::Idle => RecoveryState::Idle,
            Self::TaskPending => RecoveryState::TaskPending,
            Self::Replaying(_) => RecoveryState::Replaying,
        }
    }
}

/// Why a recovery task could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    /// The document refused to re-insert removed content.
    InsertRejected { parent_id: NodeId, index: usize },
    /// The node the task refers to is not in the document.
    UnknownNode(NodeId),
    /// The document refused to replace the node's content.
    UpdateRejected(NodeId),
    /// A node record without a node id; it can never be applied.
    MissingNodeId(Action),
}

impl RecoveryError {
    /// Whether retrying the record later could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingNodeId(_))
    }
}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsertRejected { parent_id, index } => {
                write!(f, "content rejected at {parent_id}[{index}]")
            }
            Self::UnknownNode(id) => write!(f, "node {id} not found"),
            Self::UpdateRejected(id) => write!(f, "content of {id} could not be replaced"),
            Self::MissingNodeId(action) => write!(f, "{action} record has no node id"),
        }
    }
}

impl std::error::Error for RecoveryError {}

fn node_id(record: &ChangeRecord) -> Result<&NodeId, RecoveryError> {
    record
        .id
        .as_ref()
        .ok_or(RecoveryError::MissingNodeId(record.action()))
}

impl<D: DocumentAdapter, C: Clock> HistorySession<D, C> {
    /// Revert the most recent change. Returns `false` if there is nothing
    /// to undo. The document changes once the drain and apply timers fire.
    pub fn undo(&mut self) -> bool {
        self.request_recovery(Direction::Undo)
    }

    /// Re-apply the most recently reverted change. Returns `false` if there
    /// is nothing to redo.
    pub fn redo(&mut self) -> bool {
        self.request_recovery(Direction::Redo)
    }

    /// A task is being applied right now.
    #[must_use]
    pub fn is_active_recovery_task(&self) -> bool {
        matches!(self.phase, Phase::Replaying(_))
    }

    /// Current state of the recovery machine.
    #[must_use]
    pub fn recovery_state(&self) -> RecoveryState {
        self.phase.state()
    }

    fn request_recovery(&mut self, direction: Direction) -> bool {
        let Some(record) = self.store.pop(direction) else {
            return false;
        };
        debug!(
            target: LOG_TARGET,
            %direction,
            action = %record.action(),
            id = ?record.id,
            "recovery requested"
        );
        self.store
            .enqueue_recovery_task(RecoveryTask::new(direction, record));
        if matches!(self.phase, Phase::Idle) {
            self.phase = Phase::TaskPending;
        }
        let due = self.deadline_after(self.config.drain_delay());
        self.timers.schedule(Timer::Drain, due);
        self.emit_history_changed();
        true
    }

    /// Start the next queued task, or go idle when none is left.
    pub(crate) fn drain(&mut self) {
        if self.is_active_recovery_task() {
            return;
        }
        while let Some(task) = self.store.pop_task() {
            match self.build_reversal(&task.record) {
                Ok(reversal) => {
                    self.phase = Phase::Replaying(Box::new(InFlight { task, reversal }));
                    let due = self.deadline_after(self.config.apply_delay());
                    self.timers.schedule(Timer::Apply, due);
                    self.emit_history_changed();
                    return;
                }
                Err(err) => self.fail_task(task, &err),
            }
        }
        if !matches!(self.phase, Phase::Idle) {
            self.phase = Phase::Idle;
            self.emit_history_changed();
        }
    }

    /// Apply the in-flight task, then move on to the next one.
    pub(crate) fn apply_in_flight(&mut self) {
        let phase = std::mem::replace(&mut self.phase, Phase::TaskPending);
        let Phase::Replaying(in_flight) = phase else {
            self.phase = phase;
            return;
        };
        let InFlight { task, mut reversal } = *in_flight;

        let span = debug_span!(
            target: LOG_TARGET,
            "history.recovery",
            direction = %task.direction,
            action = %task.record.action(),
            id = ?task.record.id,
        );
        let entered = span.enter();
        match self.apply(&task.record, &mut reversal) {
            Ok(()) => {
                if task.record.action() != Action::Callback
                    && reversal.action().captures_content()
                {
                    if let Some(id) = reversal.id.clone() {
                        self.events.emit(&HistoryEvent::ContentChanged { id });
                    }
                }
                self.store.push_reversal(task.direction, reversal);
                self.stats.recoveries_applied += 1;
                debug!(target: LOG_TARGET, "recovery applied");
            }
            Err(err) => self.fail_task(task, &err),
        }
        drop(entered);

        self.drain();
    }

    /// Capture the record that reverses `record`, from the document state
    /// before `record` is applied.
    fn build_reversal(&self, record: &ChangeRecord) -> Result<ChangeRecord, RecoveryError> {
        let change = match &record.change {
            Change::Create => {
                let id = self.existing_node(record)?;
                let (index, parent_id) = self.position_of(id)?;
                Change::Remove {
                    index,
                    parent_id,
                    content: self.document.serialized_content(id),
                    preview: self.document.rendered_markup(id),
                    values: self.document.field_values(id),
                }
            }
            Change::Remove { .. } => {
                node_id(record)?;
                Change::Create
            }
            Change::Move { .. } => {
                let id = self.existing_node(record)?;
                let (index, parent_id) = self.position_of(id)?;
                Change::Move { index, parent_id }
            }
            Change::Update { .. } => {
                let id = self.existing_node(record)?;
                Change::Update {
                    content: self.document.serialized_content(id),
                    preview: self.document.rendered_markup(id),
                }
            }
            Change::Callback { data, handler } => Change::Callback {
                data: data.clone(),
                handler: handler.clone(),
            },
        };
        Ok(ChangeRecord {
            id: record.id.clone(),
            timestamp: record.timestamp,
            ext_data: record.ext_data.clone(),
            change,
        })
    }

    fn apply(
        &mut self,
        record: &ChangeRecord,
        reversal: &mut ChangeRecord,
    ) -> Result<(), RecoveryError> {
        match &record.change {
            Change::Create => {
                let id = self.existing_node(record)?;
                self.document.remove_node(id);
            }
            Change::Move { index, parent_id } => {
                let id = self.existing_node(record)?;
                self.document.move_node(id, parent_id, *index);
            }
            Change::Remove {
                index,
                parent_id,
                content,
                preview,
                ..
            } => {
                let id = node_id(record)?;
                if !self
                    .document
                    .insert_serialized_content(parent_id, *index, content)
                {
                    return Err(RecoveryError::InsertRejected {
                        parent_id: parent_id.clone(),
                        index: *index,
                    });
                }
                self.document.render_preview(id, preview);
                self.document.init_node_behavior(id);
            }
            Change::Update { content, preview } => {
                let id = self.existing_node(record)?;
                if !self.document.replace_serialized_content(id, content) {
                    return Err(RecoveryError::UpdateRejected(id.clone()));
                }
                self.document.render_preview(id, preview);
                if let Some(panel) = self.edit_panel.as_mut() {
                    if panel.editing_node().as_ref() == Some(id) {
                        let values = self.document.field_values(id);
                        panel.set_values_quietly(id, &values);
                    }
                }
            }
            Change::Callback { data, handler } => {
                if let Change::Callback {
                    data: reversal_data,
                    ..
                } = &mut reversal.change
                {
                    if !self.handlers.invoke(handler, data.clone(), reversal_data) {
                        warn!(target: LOG_TARGET, %handler, "no recovery handler registered");
                    }
                }
            }
        }
        Ok(())
    }

    fn fail_task(&mut self, task: RecoveryTask, err: &RecoveryError) {
        self.stats.recoveries_failed += 1;
        let RecoveryTask { direction, record } = task;
        if !err.is_retryable() {
            error!(target: LOG_TARGET, %direction, %err, "unappliable record dropped");
            return;
        }
        warn!(
            target: LOG_TARGET,
            %direction,
            action = %record.action(),
            id = ?record.id,
            %err,
            policy = ?self.config.failed_recovery,
            "recovery task failed"
        );
        match self.config.failed_recovery {
            FailedRecoveryPolicy::Restore => self.store.restore(direction, record),
            FailedRecoveryPolicy::Drop => {}
        }
    }

    fn existing_node<'r>(&self, record: &'r ChangeRecord) -> Result<&'r NodeId, RecoveryError> {
        let id = node_id(record)?;
        if self.document.is_valid_id(id) {
            Ok(id)
        } else {
            Err(RecoveryError::UnknownNode(id.clone()))
        }
    }

    fn position_of(&self, id: &NodeId) -> Result<(usize, NodeId), RecoveryError> {
        let index = self.document.index_of(id);
        let parent_id = self.document.parent_id_of(id);
        index
            .zip(parent_id)
            .ok_or_else(|| RecoveryError::UnknownNode(id.clone()))
    }
}
