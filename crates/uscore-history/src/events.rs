#![forbid(unsafe_code)]

//! Notification channel from the history engine to the host UI.
//!
//! Two things are broadcast:
//!
//! - [`HistoryEvent::HistoryChanged`] whenever stack or queue lengths move,
//!   so undo/redo buttons can enable, disable, and show a busy state.
//! - [`HistoryEvent::ContentChanged`] after a replay rewrote document
//!   content, so previews and navigators re-render.
//!
//! There is no failure event. A recovery that could not be applied is
//! logged and otherwise only visible through the stack lengths.
//!
//! # Failure Modes
//!
//! - **Subscriber leak**: callbacks live as long as their [`Subscription`]
//!   guard. Dead entries are pruned lazily on the next emit.
//! - **Re-entrant emit**: a subscriber may subscribe or emit again; the
//!   callback list is snapshotted before any callback runs.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::Serialize;

use crate::record::NodeId;

/// Stack and queue lengths at the time of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HistoryStatus {
    /// Records available to undo.
    pub undo: usize,
    /// Records available to redo.
    pub redo: usize,
    /// Recovery tasks waiting to be applied.
    pub tasks: usize,
    /// A recovery is queued or being applied.
    pub recovering: bool,
}

impl HistoryStatus {
    /// Undo button should be enabled.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.undo > 0
    }

    /// Redo button should be enabled.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.redo > 0
    }
}

/// Something the host may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    /// Stack or queue lengths changed.
    HistoryChanged(HistoryStatus),
    /// A replay rewrote the content of `id`.
    ContentChanged { id: NodeId },
}

type CallbackRc = Rc<dyn Fn(&HistoryEvent)>;
type CallbackWeak = Weak<dyn Fn(&HistoryEvent)>;

/// Broadcast list of event subscribers.
///
/// Cloning an `EventBus` yields a handle to the same subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Rc<RefCell<Vec<CallbackWeak>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    /// Bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`. It stays registered while the returned guard
    /// is alive.
    pub fn subscribe(&self, callback: impl Fn(&HistoryEvent) + 'static) -> Subscription {
        let strong: CallbackRc = Rc::new(callback);
        self.subscribers.borrow_mut().push(Rc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Deliver `event` to every live subscriber in registration order.
    pub fn emit(&self, event: &HistoryEvent) {
        let callbacks: Vec<CallbackRc> = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.retain(|w| w.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in &callbacks {
            callback(event);
        }
    }

    /// Registered subscribers, including dead ones not yet pruned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

/// RAII guard for an event subscriber. Dropping it unsubscribes.
pub struct Subscription {
    _guard: Box<dyn std::any::Any>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
