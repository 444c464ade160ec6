#![forbid(unsafe_code)]

//! In-memory page document.
//!
//! [`MemoryDocument`] is a small element tree that implements
//! [`DocumentAdapter`] the way the builder's content model behaves, without a
//! browser. The replay harness and the integration tests run against it.
//!
//! - The root is a container with id `"container"`.
//! - Element ids are `"<type>:<n>"`, `n` counting up per type.
//! - Serialized content of a node is the JSON of its subtree.
//! - Rendered markup is `<div class="<type>" data-id="<id>">text</div>`, with
//!   `g-preloader` added to the class while a node is flagged as loading.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::DocumentAdapter;
use crate::record::{FieldValues, NodeId};

const ROOT_ID: &str = "container";
const LOADING_CLASS: &str = "g-preloader";

/// One element of a [`MemoryDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "FieldValues::is_empty")]
    pub attrs: FieldValues,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MemoryNode>,
}

impl MemoryNode {
    fn new(id: NodeId, kind: &str) -> Self {
        Self {
            id,
            kind: kind.to_owned(),
            text: String::new(),
            attrs: FieldValues::new(),
            children: Vec::new(),
        }
    }

    fn find(&self, id: &NodeId) -> Option<&Self> {
        if &self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    fn find_mut(&mut self, id: &NodeId) -> Option<&mut Self> {
        if &self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// Parent id and position of `id` below `self`.
    fn locate(&self, id: &NodeId) -> Option<(&NodeId, usize)> {
        if let Some(index) = self.children.iter().position(|child| &child.id == id) {
            return Some((&self.id, index));
        }
        self.children.iter().find_map(|child| child.locate(id))
    }

    /// Remove `id` from below `self`, returning it with its old position.
    fn detach(&mut self, id: &NodeId) -> Option<(MemoryNode, NodeId, usize)> {
        if let Some(index) = self.children.iter().position(|child| &child.id == id) {
            return Some((self.children.remove(index), self.id.clone(), index));
        }
        self.children.iter_mut().find_map(|child| child.detach(id))
    }

    fn insert_child(&mut self, index: usize, node: MemoryNode) {
        let index = index.min(self.children.len());
        self.children.insert(index, node);
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a MemoryNode)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }

    fn render(&self, loading: &HashSet<NodeId>, out: &mut String) {
        out.push_str("<div class=\"");
        out.push_str(&self.kind);
        if loading.contains(&self.id) {
            out.push(' ');
            out.push_str(LOADING_CLASS);
        }
        out.push_str("\" data-id=\"");
        out.push_str(self.id.as_str());
        out.push_str("\">");
        out.push_str(&self.text);
        for child in &self.children {
            child.render(loading, out);
        }
        out.push_str("</div>");
    }
}

/// Element tree implementing [`DocumentAdapter`].
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    root: MemoryNode,
    counters: HashMap<String, u32>,
    loading: HashSet<NodeId>,
    failing_inserts: usize,
    last_preview: Option<(NodeId, String)>,
    initialized: Vec<NodeId>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    /// Document holding only the root container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: MemoryNode::new(NodeId::from(ROOT_ID), ROOT_ID),
            counters: HashMap::new(),
            loading: HashSet::new(),
            failing_inserts: 0,
            last_preview: None,
            initialized: Vec::new(),
        }
    }

    /// Id of the root container.
    #[must_use]
    pub fn root_id(&self) -> &NodeId {
        &self.root.id
    }

    // ========================================================================
    // Host-side edits
    // ========================================================================

    /// Add a new `kind` element under `parent` at `index` (clamped to the
    /// child count). An unknown parent falls back to the root.
    pub fn create(&mut self, kind: &str, parent: &NodeId, index: usize) -> NodeId {
        let counter = self.counters.entry(kind.to_owned()).or_insert(0);
        *counter += 1;
        let id = NodeId::from_parts(kind, *counter);
        let node = MemoryNode::new(id.clone(), kind);
        match self.root.find_mut(parent) {
            Some(parent) => parent.insert_child(index, node),
            None => {
                let end = self.root.children.len();
                self.root.insert_child(end, node);
            }
        }
        id
    }

    /// Set the text of `id`.
    pub fn set_text(&mut self, id: &NodeId, text: &str) -> bool {
        self.root.find_mut(id).is_some_and(|node| {
            node.text = text.to_owned();
            true
        })
    }

    /// Set one attribute of `id`.
    pub fn set_attr(&mut self, id: &NodeId, key: &str, value: Value) -> bool {
        self.root.find_mut(id).is_some_and(|node| {
            node.attrs.insert(key.to_owned(), value);
            true
        })
    }

    /// Flag `id` as still loading; its preview then carries `g-preloader`.
    pub fn set_loading(&mut self, id: &NodeId, loading: bool) -> bool {
        if self.root.find(id).is_none() {
            return false;
        }
        if loading {
            self.loading.insert(id.clone());
        } else {
            self.loading.remove(id);
        }
        true
    }

    /// Make the next `n` calls to `insert_serialized_content` fail.
    pub fn fail_next_inserts(&mut self, n: usize) {
        self.failing_inserts = n;
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Node `id`, if present.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&MemoryNode> {
        self.root.find(id)
    }

    /// Text of `id`, if present.
    #[must_use]
    pub fn text(&self, id: &NodeId) -> Option<&str> {
        self.root.find(id).map(|node| node.text.as_str())
    }

    /// Child ids of `id`, in order.
    #[must_use]
    pub fn children_of(&self, id: &NodeId) -> Vec<NodeId> {
        self.root
            .find(id)
            .map(|node| node.children.iter().map(|c| c.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of elements, not counting the root.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.root.visit(&mut |_| count += 1);
        count - 1
    }

    /// True when only the root exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// The whole page as one serialized string.
    #[must_use]
    pub fn page_content(&self) -> String {
        serde_json::to_string(&self.root).unwrap_or_default()
    }

    /// Last preview handed to `render_preview`.
    #[must_use]
    pub fn last_preview(&self) -> Option<(&NodeId, &str)> {
        self.last_preview
            .as_ref()
            .map(|(id, preview)| (id, preview.as_str()))
    }

    /// Nodes passed to `init_node_behavior`, in call order.
    #[must_use]
    pub fn initialized(&self) -> &[NodeId] {
        &self.initialized
    }

    /// Keep id counters ahead of every id in `node`'s subtree.
    fn bump_counters(&mut self, node: &MemoryNode) {
        let counters = &mut self.counters;
        node.visit(&mut |n| {
            if let Some((kind, index)) = n.id.parts() {
                let counter = counters.entry(kind.to_owned()).or_insert(0);
                *counter = (*counter).max(index);
            }
        });
    }

    fn contains_any(&self, node: &MemoryNode) -> bool {
        let mut found = false;
        node.visit(&mut |n| found |= self.root.find(&n.id).is_some());
        found
    }
}

impl DocumentAdapter for MemoryDocument {
    fn is_valid_id(&self, id: &NodeId) -> bool {
        self.root.find(id).is_some()
    }

    fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.root.locate(id).map(|(_, index)| index)
    }

    fn parent_id_of(&self, id: &NodeId) -> Option<NodeId> {
        self.root.locate(id).map(|(parent, _)| parent.clone())
    }

    fn serialized_content(&self, id: &NodeId) -> String {
        self.root
            .find(id)
            .and_then(|node| serde_json::to_string(node).ok())
            .unwrap_or_default()
    }

    fn rendered_markup(&self, id: &NodeId) -> String {
        let mut out = String::new();
        if let Some(node) = self.root.find(id) {
            node.render(&self.loading, &mut out);
        }
        out
    }

    fn field_values(&self, id: &NodeId) -> FieldValues {
        let Some(node) = self.root.find(id) else {
            return FieldValues::new();
        };
        let mut values = node.attrs.clone();
        values.insert("text".into(), Value::String(node.text.clone()));
        values
    }

    fn remove_node(&mut self, id: &NodeId) {
        if self.root.detach(id).is_some() {
            self.loading.remove(id);
        }
    }

    fn move_node(&mut self, id: &NodeId, parent_id: &NodeId, index: usize) {
        let Some((node, old_parent, old_index)) = self.root.detach(id) else {
            return;
        };
        // Unknown target, or one inside the moved subtree: put it back.
        let (target, index) = if self.root.find(parent_id).is_some() {
            (parent_id.clone(), index)
        } else {
            (old_parent, old_index)
        };
        if let Some(parent) = self.root.find_mut(&target) {
            parent.insert_child(index, node);
        }
    }

    fn insert_serialized_content(
        &mut self,
        parent_id: &NodeId,
        index: usize,
        content: &str,
    ) -> bool {
        if self.failing_inserts > 0 {
            self.failing_inserts -= 1;
            return false;
        }
        let Ok(node) = serde_json::from_str::<MemoryNode>(content) else {
            return false;
        };
        if self.contains_any(&node) {
            return false;
        }
        if self.root.find(parent_id).is_none() {
            return false;
        }
        self.bump_counters(&node);
        match self.root.find_mut(parent_id) {
            Some(parent) => {
                parent.insert_child(index, node);
                true
            }
            None => false,
        }
    }

    fn replace_serialized_content(&mut self, id: &NodeId, content: &str) -> bool {
        let Ok(node) = serde_json::from_str::<MemoryNode>(content) else {
            return false;
        };
        if &node.id != id {
            return false;
        }
        self.bump_counters(&node);
        match self.root.find_mut(id) {
            Some(slot) => {
                *slot = node;
                true
            }
            None => false,
        }
    }

    fn render_preview(&mut self, id: &NodeId, preview: &str) {
        self.last_preview = Some((id.clone(), preview.to_owned()));
    }

    fn init_node_behavior(&mut self, id: &NodeId) {
        self.initialized.push(id.clone());
    }
}
