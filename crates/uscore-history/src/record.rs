#![forbid(unsafe_code)]

//! Change records stored on the undo and redo stacks.
//!
//! A [`ChangeRecord`] describes one mutation of the page document with
//! enough captured state to reverse it. The action-specific payload lives
//! in [`Change`], so a `MOVE` record can never be missing its parent and a
//! `CREATE` record never carries stale content.
//!
//! # Wire shape
//!
//! Records serialize to flat JSON objects tagged by `action`:
//!
//! ```text
//! {"id":"us_btn:1","timestamp":1200,"extData":{},"action":"MOVE","index":2,"parentId":"vc_column:3"}
//! ```
//!
//! Unknown `action` tags are rejected at deserialization time, which keeps
//! imported history from carrying kinds the recovery manager cannot replay.
//!
//! # Invariants
//!
//! - `id` is `Some` for every action except [`Action::Callback`].
//! - [`Action::inverse`] is an involution: `a.inverse().inverse() == a`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::handlers::HandlerKey;

/// Free-form auxiliary data carried through recovery unchanged.
pub type ExtData = Map<String, Value>;

/// Full field-value snapshot of a node, as shown in the edit panel.
pub type FieldValues = Map<String, Value>;

/// Opaque identifier of a document node.
///
/// Builder elements use the `"<type>:<index>"` shape (`"us_btn:1"`),
/// containers may use bare names (`"container"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap a raw identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build an element id from its type and index.
    #[must_use]
    pub fn from_parts(kind: &str, index: u32) -> Self {
        Self(format!("{kind}:{index}"))
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a well-formed `"<type>:<index>"` id.
    ///
    /// Returns `None` for bare container names and malformed ids.
    #[must_use]
    pub fn parts(&self) -> Option<(&str, u32)> {
        let (kind, index) = self.0.rsplit_once(':')?;
        if kind.is_empty() {
            return None;
        }
        index.parse().ok().map(|index| (kind, index))
    }

    /// Element type (`"us_btn"` for `"us_btn:1"`).
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.parts().map(|(kind, _)| kind)
    }

    /// True for an empty identifier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Kind of mutation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// A node was added.
    Create,
    /// A node changed parent and/or position.
    Move,
    /// A node was deleted.
    Remove,
    /// A node's content changed in place.
    Update,
    /// Free-form state owned by a registered recovery handler.
    Callback,
}

impl Action {
    /// All action kinds, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Create,
        Self::Move,
        Self::Remove,
        Self::Update,
        Self::Callback,
    ];

    /// The action that reverses this one. `CREATE` and `REMOVE` swap; the
    /// others reverse into themselves with freshly captured state.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Create => Self::Remove,
            Self::Remove => Self::Create,
            other => other,
        }
    }

    /// Wire name (`"CREATE"`, `"MOVE"`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Move => "MOVE",
            Self::Remove => "REMOVE",
            Self::Update => "UPDATE",
            Self::Callback => "CALLBACK",
        }
    }

    /// Parse a wire name, case-insensitively.
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Whether records of this kind carry `content`/`preview`.
    #[must_use]
    pub const fn captures_content(self) -> bool {
        matches!(self, Self::Update | Self::Remove)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action-specific payload of a [`ChangeRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Change {
    /// The node was created; reversing it removes the node.
    Create,
    /// Position of the node before the move.
    Move { index: usize, parent_id: NodeId },
    /// Everything needed to put a removed node back.
    Remove {
        index: usize,
        parent_id: NodeId,
        content: String,
        preview: String,
        #[serde(default)]
        values: FieldValues,
    },
    /// Serialized and rendered node state before the update.
    Update { content: String, preview: String },
    /// Payload handed to a registered recovery handler.
    Callback { data: Value, handler: HandlerKey },
}

impl Change {
    /// The action this payload belongs to.
    #[must_use]
    pub const fn action(&self) -> Action {
        match self {
            Self::Create => Action::Create,
            Self::Move { .. } => Action::Move,
            Self::Remove { .. } => Action::Remove,
            Self::Update { .. } => Action::Update,
            Self::Callback { .. } => Action::Callback,
        }
    }
}

/// One entry of the undo or redo stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Affected node; `None` only for callback records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    /// Milliseconds since the owning session started. Used for ordering,
    /// never for display.
    #[serde(default)]
    pub timestamp: u64,
    /// Caller data carried through recovery (e.g. an original id to
    /// re-select after undo).
    #[serde(default)]
    pub ext_data: ExtData,
    /// Action and captured state.
    #[serde(flatten)]
    pub change: Change,
}

impl ChangeRecord {
    /// Record for a node mutation.
    #[must_use]
    pub fn new(id: NodeId, change: Change) -> Self {
        Self {
            id: Some(id),
            timestamp: 0,
            ext_data: ExtData::new(),
            change,
        }
    }

    /// Record for handler-owned state.
    #[must_use]
    pub fn callback(data: Value, handler: HandlerKey) -> Self {
        Self {
            id: None,
            timestamp: 0,
            ext_data: ExtData::new(),
            change: Change::Callback { data, handler },
        }
    }

    /// Attach auxiliary data.
    #[must_use]
    pub fn with_ext_data(mut self, ext_data: ExtData) -> Self {
        self.ext_data = ext_data;
        self
    }

    /// The record's action kind.
    #[must_use]
    pub const fn action(&self) -> Action {
        self.change.action()
    }

    /// Rough in-memory size, for diagnostics.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        let payload = match &self.change {
            Change::Create | Change::Move { .. } => 0,
            Change::Remove {
                content,
                preview,
                values,
                ..
            } => content.len() + preview.len() + Value::Object(values.clone()).to_string().len(),
            Change::Update { content, preview } => content.len() + preview.len(),
            Change::Callback { data, handler } => data.to_string().len() + handler.as_str().len(),
        };
        std::mem::size_of::<Self>() + self.id.as_ref().map_or(0, |id| id.as_str().len()) + payload
    }

    /// Two `UPDATE` records carry the same payload, ignoring position and
    /// timestamp.
    #[must_use]
    pub fn same_update_payload(&self, other: &Self) -> bool {
        match (&self.change, &other.change) {
            (
                Change::Update { content, preview },
                Change::Update {
                    content: other_content,
                    preview: other_preview,
                },
            ) => {
                self.id == other.id
                    && self.ext_data == other.ext_data
                    && content == other_content
                    && preview == other_preview
            }
            _ => false,
        }
    }

    /// Two `CALLBACK` records carry the same data, ignoring the handler and
    /// timestamp.
    #[must_use]
    pub fn same_callback_payload(&self, other: &Self) -> bool {
        match (&self.change, &other.change) {
            (Change::Callback { data, .. }, Change::Callback { data: other_data, .. }) => {
                self.id == other.id && self.ext_data == other.ext_data && data == other_data
            }
            _ => false,
        }
    }

    /// Whether committing `self` after `last` would add nothing new.
    ///
    /// Only `UPDATE` and `CALLBACK` records are ever collapsed.
    #[must_use]
    pub fn duplicates(&self, last: &Self) -> bool {
        match self.action() {
            Action::Update => self.same_update_payload(last),
            Action::Callback => self.same_callback_payload(last),
            _ => false,
        }
    }
}

/// Which stack a recovery request pops from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Pop from `undo`, push the reversal onto `redo`.
    Undo,
    /// Pop from `redo`, push the reversal onto `undo`.
    Redo,
}

impl Direction {
    /// The other direction.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Undo => Self::Redo,
            Self::Redo => Self::Undo,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Undo => "UNDO",
            Self::Redo => "REDO",
        })
    }
}

/// A record popped for replay, tagged with the stack it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryTask {
    /// Stack the record was popped from.
    #[serde(rename = "type")]
    pub direction: Direction,
    /// The record being replayed.
    #[serde(flatten)]
    pub record: ChangeRecord,
}

impl RecoveryTask {
    /// Tag `record` with the stack it was popped from.
    #[must_use]
    pub fn new(direction: Direction, record: ChangeRecord) -> Self {
        Self { direction, record }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(id: &str, content: &str) -> ChangeRecord {
        ChangeRecord::new(
            NodeId::from(id),
            Change::Update {
                content: content.into(),
                preview: format!("<p>{content}</p>"),
            },
        )
    }

    #[test]
    fn node_id_parts() {
        let id = NodeId::from("us_btn:12");
        assert_eq!(id.parts(), Some(("us_btn", 12)));
        assert_eq!(id.kind(), Some("us_btn"));
        assert_eq!(NodeId::from("container").parts(), None);
        assert_eq!(NodeId::from(":3").parts(), None);
        assert_eq!(NodeId::from("vc_row:x").parts(), None);
        assert_eq!(NodeId::from_parts("vc_row", 2).as_str(), "vc_row:2");
    }

    #[test]
    fn inverse_swaps_create_and_remove() {
        assert_eq!(Action::Create.inverse(), Action::Remove);
        assert_eq!(Action::Remove.inverse(), Action::Create);
        for action in Action::ALL {
            assert_eq!(action.inverse().inverse(), action);
        }
        assert_eq!(Action::Move.inverse(), Action::Move);
        assert_eq!(Action::Update.inverse(), Action::Update);
    }

    #[test]
    fn action_names_parse_case_insensitively() {
        assert_eq!(Action::from_str_opt("update"), Some(Action::Update));
        assert_eq!(Action::from_str_opt(" CALLBACK "), Some(Action::Callback));
        assert_eq!(Action::from_str_opt("rename"), None);
    }

    #[test]
    fn update_dedup_ignores_timestamp() {
        let mut a = update("us_btn:1", "A");
        let mut b = update("us_btn:1", "A");
        a.timestamp = 10;
        b.timestamp = 99;
        assert!(b.duplicates(&a));
        assert!(!update("us_btn:1", "B").duplicates(&a));
        assert!(!update("us_btn:2", "A").duplicates(&a));
    }

    #[test]
    fn update_dedup_respects_ext_data() {
        let a = update("us_btn:1", "A");
        let mut ext = ExtData::new();
        ext.insert("originalId".into(), json!("us_btn:7"));
        let b = update("us_btn:1", "A").with_ext_data(ext);
        assert!(!b.duplicates(&a));
    }

    #[test]
    fn callback_dedup_ignores_handler() {
        let a = ChangeRecord::callback(json!({"css": "a{}"}), HandlerKey::new("css"));
        let b = ChangeRecord::callback(json!({"css": "a{}"}), HandlerKey::new("other"));
        let c = ChangeRecord::callback(json!({"css": "b{}"}), HandlerKey::new("css"));
        assert!(b.duplicates(&a));
        assert!(!c.duplicates(&a));
    }

    #[test]
    fn create_and_move_never_dedup() {
        let a = ChangeRecord::new(NodeId::from("us_btn:1"), Change::Create);
        assert!(!a.clone().duplicates(&a));
        let m = ChangeRecord::new(
            NodeId::from("us_btn:1"),
            Change::Move {
                index: 0,
                parent_id: NodeId::from("container"),
            },
        );
        assert!(!m.clone().duplicates(&m));
    }

    #[test]
    fn record_wire_shape_is_flat() {
        let record = ChangeRecord::new(
            NodeId::from("us_btn:1"),
            Change::Move {
                index: 2,
                parent_id: NodeId::from("vc_column:3"),
            },
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["action"], "MOVE");
        assert_eq!(value["parentId"], "vc_column:3");
        assert_eq!(value["index"], 2);
        assert_eq!(value["id"], "us_btn:1");
        assert!(value.get("change").is_none());
    }

    #[test]
    fn unknown_action_is_rejected() {
        let raw = r#"{"id":"us_btn:1","timestamp":0,"extData":{},"action":"RENAME"}"#;
        assert!(serde_json::from_str::<ChangeRecord>(raw).is_err());
    }

    #[test]
    fn task_carries_type_tag() {
        let task = RecoveryTask::new(
            Direction::Undo,
            ChangeRecord::new(NodeId::from("us_btn:1"), Change::Create),
        );
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], "UNDO");
        assert_eq!(value["action"], "CREATE");
        let back: RecoveryTask = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn direction_opposite() {
        assert_eq!(Direction::Undo.opposite(), Direction::Redo);
        assert_eq!(Direction::Redo.opposite(), Direction::Undo);
        assert_eq!(Direction::Undo.to_string(), "UNDO");
    }
}
