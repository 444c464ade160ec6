#![forbid(unsafe_code)]

//! Command recorder: turns "this node is about to change" into a record.
//!
//! Every commit reads the node's state from the [`DocumentAdapter`] at the
//! moment of the call, so callers commit immediately before applying an
//! edit. All precondition failures
//! are silent: the call returns `false` and history is left untouched.
//!
//! # Throttling
//!
//! With `use_throttle`, the call that opens the window captures its record
//! right away, so the record holds the state from before the burst of
//! edits. Later calls for the same node and action inside the window are
//! suppressed. When the window closes the captured record is saved. A
//! throttled call for a different target saves the open capture early and
//! starts a new window. `commit_change` and `commit_data` have separate
//! windows.
//!
//! ```text
//! t=0     commit(A, throttle)   window opens, A captured
//! t=0.5s  commit(A, throttle)   suppressed             (coalesced)
//! t=2s    window closes         first capture of A saved
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::adapter::DocumentAdapter;
use crate::handlers::HandlerKey;
use crate::record::{Action, Change, ChangeRecord, ExtData, NodeId};
use crate::recovery::Phase;
use crate::scheduler::Clock;
use crate::session::{HistorySession, LOG_TARGET, Timer};

/// Externally known content of the next `UPDATE` commit.
///
/// Callers that already hold the exact serialized content (for instance
/// from a field change handler) stage it here; the next `UPDATE` capture
/// uses it instead of what the document reports, then clears the slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSnapshot {
    /// Serialized content to record.
    pub content: Option<String>,
    /// Rendered preview to record.
    pub preview: Option<String>,
}

impl UpdateSnapshot {
    /// True when neither field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.preview.is_none()
    }
}

impl<D: DocumentAdapter, C: Clock> HistorySession<D, C> {
    /// Record the current state of `id` ahead of an `action` edit.
    ///
    /// `ext_data` is carried through recovery unchanged; anything other
    /// than a JSON object is replaced by an empty one. Returns `true` when
    /// a record was appended, or, with `use_throttle`, when the call was
    /// captured for the window or suppressed by an open one.
    pub fn commit_change(
        &mut self,
        id: &NodeId,
        action: Action,
        use_throttle: bool,
        ext_data: Option<Value>,
    ) -> bool {
        if !self.accepts_change(id, action) {
            return false;
        }
        let ext_data = match ext_data {
            Some(Value::Object(map)) => map,
            _ => ExtData::new(),
        };

        if use_throttle {
            return self.throttle_change(id, action, ext_data);
        }
        self.save_change(id, action, ext_data)
    }

    /// Record handler-owned state as a `CALLBACK` entry.
    ///
    /// `handler` must already be registered; on undo/redo it receives
    /// `data` back. `Value::Null` is rejected as "no data".
    pub fn commit_data(&mut self, data: Value, handler: &HandlerKey, use_throttle: bool) -> bool {
        if !self.accepts_data(&data, handler) {
            return false;
        }

        if use_throttle {
            return self.throttle_data(data, handler);
        }
        self.save(ChangeRecord::callback(data, handler.clone()))
    }

    /// Fill the single-slot cache consumed by the next `UPDATE` commit.
    /// A later call overwrites an unconsumed snapshot.
    pub fn stage_update(&mut self, snapshot: UpdateSnapshot) {
        self.staged_update = (!snapshot.is_empty()).then_some(snapshot);
    }

    /// Snapshot waiting for the next `UPDATE` commit.
    #[must_use]
    pub fn staged_update(&self) -> Option<&UpdateSnapshot> {
        self.staged_update.as_ref()
    }

    // ========================================================================
    // Throttle
    // ========================================================================

    fn throttle_change(&mut self, id: &NodeId, action: Action, ext_data: ExtData) -> bool {
        let same_target = self
            .pending_change
            .as_ref()
            .is_some_and(|pending| pending.id.as_ref() == Some(id) && pending.action() == action);
        if same_target {
            self.suppress_throttled(Timer::ChangeThrottle);
            return true;
        }
        if let Some(open) = self.pending_change.take() {
            self.save(open);
        }
        let Some(change) = self.capture(id, action) else {
            self.timers.cancel(Timer::ChangeThrottle);
            return false;
        };
        self.pending_change = Some(ChangeRecord::new(id.clone(), change).with_ext_data(ext_data));
        self.open_throttle(Timer::ChangeThrottle);
        true
    }

    fn throttle_data(&mut self, data: Value, handler: &HandlerKey) -> bool {
        let same_handler = self.pending_data.as_ref().is_some_and(|pending| {
            matches!(&pending.change, Change::Callback { handler: open, .. } if open == handler)
        });
        if same_handler {
            self.suppress_throttled(Timer::DataThrottle);
            return true;
        }
        if let Some(open) = self.pending_data.take() {
            self.save(open);
        }
        self.pending_data = Some(ChangeRecord::callback(data, handler.clone()));
        self.open_throttle(Timer::DataThrottle);
        true
    }

    fn open_throttle(&mut self, timer: Timer) {
        let due = self.deadline_after(self.config.throttle_window());
        self.timers.schedule(timer, due);
        debug!(target: LOG_TARGET, ?timer, "throttle window opened");
    }

    fn suppress_throttled(&mut self, timer: Timer) {
        self.stats.coalesced += 1;
        debug!(target: LOG_TARGET, ?timer, "throttled commit coalesced");
    }

    pub(crate) fn flush_change_throttle(&mut self) {
        let Some(record) = self.pending_change.take() else {
            return;
        };
        let still_valid = record
            .id
            .as_ref()
            .is_some_and(|id| self.document.is_valid_id(id));
        if still_valid && self.accepts_while_idle() {
            self.save(record);
        }
    }

    pub(crate) fn flush_data_throttle(&mut self) {
        let Some(record) = self.pending_data.take() else {
            return;
        };
        if self.accepts_while_idle() {
            self.save(record);
        }
    }

    // ========================================================================
    // Preconditions
    // ========================================================================

    fn accepts_change(&mut self, id: &NodeId, action: Action) -> bool {
        if action == Action::Callback {
            debug!(target: LOG_TARGET, %id, "CALLBACK records go through commit_data");
            return false;
        }
        if !self.accepts_while_idle() {
            return false;
        }
        self.document.is_valid_id(id)
    }

    fn accepts_data(&mut self, data: &Value, handler: &HandlerKey) -> bool {
        if data.is_null() || !self.handlers.contains(handler) {
            debug!(target: LOG_TARGET, %handler, "commit_data without data or registered handler");
            return false;
        }
        self.accepts_while_idle()
    }

    fn accepts_while_idle(&mut self) -> bool {
        if matches!(self.phase, Phase::Idle) {
            return true;
        }
        self.stats.rejected_busy += 1;
        debug!(target: LOG_TARGET, state = ?self.phase.state(), "commit rejected during recovery");
        false
    }

    // ========================================================================
    // Capture
    // ========================================================================

    fn save_change(&mut self, id: &NodeId, action: Action, ext_data: ExtData) -> bool {
        let Some(change) = self.capture(id, action) else {
            return false;
        };
        self.save(ChangeRecord::new(id.clone(), change).with_ext_data(ext_data))
    }

    fn capture(&mut self, id: &NodeId, action: Action) -> Option<Change> {
        match action {
            Action::Create => Some(Change::Create),
            Action::Move => {
                let (index, parent_id) = self.capture_position(id)?;
                Some(Change::Move { index, parent_id })
            }
            Action::Update => {
                let (mut content, mut preview) = self.capture_content(id)?;
                if let Some(staged) = self.staged_update.take() {
                    content = staged.content.unwrap_or(content);
                    preview = staged.preview.unwrap_or(preview);
                }
                Some(Change::Update { content, preview })
            }
            Action::Remove => {
                let (index, parent_id) = self.capture_position(id)?;
                let (content, preview) = self.capture_content(id)?;
                Some(Change::Remove {
                    index,
                    parent_id,
                    content,
                    preview,
                    values: self.document.field_values(id),
                })
            }
            Action::Callback => None,
        }
    }

    fn capture_position(&self, id: &NodeId) -> Option<(usize, NodeId)> {
        let index = self.document.index_of(id)?;
        let parent_id = self.document.parent_id_of(id)?;
        Some((index, parent_id))
    }

    fn capture_content(&mut self, id: &NodeId) -> Option<(String, String)> {
        let preview = self.document.rendered_markup(id);
        if preview.contains(self.config.loading_marker.as_str()) {
            self.stats.dropped_loading += 1;
            warn!(target: LOG_TARGET, %id, "node still loading, commit dropped");
            return None;
        }
        Some((self.document.serialized_content(id), preview))
    }

    /// Dedup against the last record of the same kind, stamp and append.
    fn save(&mut self, mut record: ChangeRecord) -> bool {
        let action = record.action();
        if self
            .store
            .find_last_by_action(action)
            .is_some_and(|last| record.duplicates(last))
        {
            self.stats.deduplicated += 1;
            debug!(target: LOG_TARGET, %action, id = ?record.id, "duplicate commit skipped");
            return false;
        }

        record.timestamp = self.elapsed_ms();
        let id = record.id.clone();
        self.store.append(record);
        self.stats.commits += 1;
        debug!(
            target: LOG_TARGET,
            %action,
            id = ?id,
            undo = self.store.len_undo(),
            "change committed"
        );
        self.emit_history_changed();
        true
    }
}
