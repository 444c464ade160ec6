#![forbid(unsafe_code)]

//! Seams between the history engine and the page builder it records.
//!
//! The engine never touches the document tree directly. Everything it needs
//! to capture state before a change, and to put state back during recovery,
//! goes through [`DocumentAdapter`]. The edit panel is a second, optional
//! seam: when the node being recovered is open for editing, its fields are
//! refreshed through [`EditPanel`] without triggering a new commit.

use crate::record::{FieldValues, NodeId};

/// Query and mutation surface of the page document.
///
/// Positions are zero-based indexes among the parent's children.
pub trait DocumentAdapter {
    /// Whether `id` names a node currently present in the document.
    fn is_valid_id(&self, id: &NodeId) -> bool;

    /// Position of `id` among its siblings.
    fn index_of(&self, id: &NodeId) -> Option<usize>;

    /// Parent of `id`. `None` for the root or an unknown node.
    fn parent_id_of(&self, id: &NodeId) -> Option<NodeId>;

    /// Serialized content of the subtree rooted at `id`.
    fn serialized_content(&self, id: &NodeId) -> String;

    /// Rendered preview markup of `id`.
    fn rendered_markup(&self, id: &NodeId) -> String;

    /// Current field values of `id`, as the edit panel shows them.
    fn field_values(&self, id: &NodeId) -> FieldValues;

    /// Delete `id` and its subtree. Unknown ids are ignored.
    fn remove_node(&mut self, id: &NodeId);

    /// Detach `id` and insert it under `parent_id` at `index`.
    fn move_node(&mut self, id: &NodeId, parent_id: &NodeId, index: usize);

    /// Parse `content` and insert the resulting subtree under `parent_id`
    /// at `index`. Returns `false` when nothing was inserted.
    fn insert_serialized_content(&mut self, parent_id: &NodeId, index: usize, content: &str)
    -> bool;

    /// Replace the subtree at `id` with `content`, keeping its position.
    /// Returns `false` when the content could not be applied.
    fn replace_serialized_content(&mut self, id: &NodeId, content: &str) -> bool;

    /// Show `preview` as the rendered markup of `id`.
    fn render_preview(&mut self, _id: &NodeId, _preview: &str) {}

    /// Re-run per-node behaviour initialization after a node reappears.
    fn init_node_behavior(&mut self, _id: &NodeId) {}
}

/// Field editor currently open in the builder sidebar.
pub trait EditPanel {
    /// Node whose fields are shown, if any.
    fn editing_node(&self) -> Option<NodeId>;

    /// Replace the shown fields of `id` without emitting change
    /// notifications back into the recorder.
    fn set_values_quietly(&mut self, id: &NodeId, values: &FieldValues);
}
