#![forbid(unsafe_code)]

//! Registry of recovery handlers for `CALLBACK` records.
//!
//! Callback records never hold a closure. They store a [`HandlerKey`] and a
//! JSON payload; the recovery manager looks the key up here when the record
//! is replayed. This keeps every history entry serializable and lets a
//! session be rebuilt from a snapshot as long as the same handlers are
//! registered again.
//!
//! A handler receives:
//!
//! 1. a clone of the record's `data` (the state to restore), and
//! 2. a mutable reference to the `data` of the reversal record that will be
//!    pushed onto the opposite stack.
//!
//! Writing the state being replaced into the second argument is how a
//! handler makes its own change redoable:
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use serde_json::Value;
//! use uscore_history::handlers::{HandlerKey, HandlerRegistry};
//!
//! let css = Rc::new(RefCell::new(String::from("b{}")));
//! let mut registry = HandlerRegistry::new();
//! let target = Rc::clone(&css);
//! registry.register(HandlerKey::new("custom_css"), move |restore, reversal| {
//!     let current = target.replace(restore.as_str().unwrap_or_default().to_owned());
//!     *reversal = Value::String(current);
//! });
//! assert!(registry.contains(&HandlerKey::new("custom_css")));
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name under which a recovery handler is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerKey(String);

impl HandlerKey {
    /// Create a key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Callback invoked when a `CALLBACK` record is replayed.
pub type RecoveryHandler = Box<dyn FnMut(Value, &mut Value)>;

/// Keyed set of recovery handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, RecoveryHandler>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.handlers.keys().map(HandlerKey::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("keys", &keys)
            .finish()
    }
}

impl HandlerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`. Returns `true` if an existing
    /// handler was replaced.
    pub fn register<F>(&mut self, key: HandlerKey, handler: F) -> bool
    where
        F: FnMut(Value, &mut Value) + 'static,
    {
        self.handlers.insert(key, Box::new(handler)).is_some()
    }

    /// Remove the handler under `key`.
    pub fn unregister(&mut self, key: &HandlerKey) -> bool {
        self.handlers.remove(key).is_some()
    }

    /// Whether a handler is registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &HandlerKey) -> bool {
        self.handlers.contains_key(key)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler under `key`. Returns `false` when none is registered.
    pub(crate) fn invoke(&mut self, key: &HandlerKey, restore: Value, reversal: &mut Value) -> bool {
        match self.handlers.get_mut(key) {
            Some(handler) => {
                handler(restore, reversal);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn register_replace_unregister() {
        let mut registry = HandlerRegistry::new();
        let key = HandlerKey::new("css");
        assert!(!registry.register(key.clone(), |_, _| {}));
        assert!(registry.register(key.clone(), |_, _| {}));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(&key));
        assert!(registry.is_empty());
        assert!(!registry.unregister(&key));
    }

    #[test]
    fn invoke_passes_clone_and_reversal_slot() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let mut registry = HandlerRegistry::new();
        registry.register(HandlerKey::new("css"), move |restore, reversal| {
            log.borrow_mut().push(restore);
            *reversal = json!("current");
        });

        let mut reversal = json!("old");
        assert!(registry.invoke(&HandlerKey::new("css"), json!("old"), &mut reversal));
        assert_eq!(reversal, json!("current"));
        assert_eq!(seen.borrow().as_slice(), &[json!("old")]);
    }

    #[test]
    fn invoke_unknown_key_is_noop() {
        let mut registry = HandlerRegistry::new();
        let mut reversal = json!(1);
        assert!(!registry.invoke(&HandlerKey::new("missing"), json!(2), &mut reversal));
        assert_eq!(reversal, json!(1));
    }

    #[test]
    fn debug_lists_sorted_keys() {
        let mut registry = HandlerRegistry::new();
        registry.register(HandlerKey::new("b"), |_, _| {});
        registry.register(HandlerKey::new("a"), |_, _| {});
        let debug = format!("{registry:?}");
        assert!(debug.contains(r#"["a", "b"]"#));
    }
}
