#![forbid(unsafe_code)]

//! us-core change history engine.
//!
//! Undo/redo for the page builder: edits to the page document are recorded
//! as [`ChangeRecord`]s on bounded undo and redo stacks, and replayed back
//! one at a time through a [`DocumentAdapter`].
//!
//! # Key Components
//!
//! - [`HistorySession`] - Public surface: commit, undo, redo, timers, events
//! - [`HistoryStore`] - Bounded undo/redo stacks and the recovery task queue
//! - [`DocumentAdapter`] - The page document as the engine sees it
//! - [`HandlerRegistry`] - Named handlers replaying `CALLBACK` records
//! - [`EventBus`] - `HistoryChanged` / `ContentChanged` notifications
//! - [`Deferred`] / [`Clock`] - Poll-driven timers with injectable time
//! - [`MemoryDocument`] - In-memory document for tests and replays
//!
//! # Example
//!
//! ```
//! use uscore_history::{Action, HistoryConfig, HistorySession, ManualClock, MemoryDocument};
//!
//! let mut session =
//!     HistorySession::with_clock(MemoryDocument::new(), HistoryConfig::default(), ManualClock::new());
//! let root = session.document().root_id().clone();
//! let id = session.document_mut().create("us_btn", &root, 0);
//!
//! session.commit_change(&id, Action::Create, false, None);
//! assert_eq!(session.len_undo(), 1);
//!
//! session.undo();
//! session.run_until_settled();
//! assert_eq!((session.len_undo(), session.len_redo()), (0, 1));
//! assert!(session.document().get(&id).is_none());
//! ```

pub mod adapter;
pub mod config;
pub mod events;
pub mod handlers;
pub mod memory;
pub mod record;
pub mod recorder;
pub mod recovery;
pub mod scheduler;
pub mod session;
pub mod shortcuts;
pub mod store;

pub use adapter::{DocumentAdapter, EditPanel};
pub use config::{ConfigError, FailedRecoveryPolicy, HistoryConfig};
pub use events::{EventBus, HistoryEvent, HistoryStatus, Subscription};
pub use handlers::{HandlerKey, HandlerRegistry, RecoveryHandler};
pub use memory::{MemoryDocument, MemoryNode};
pub use record::{Action, Change, ChangeRecord, Direction, ExtData, FieldValues, NodeId, RecoveryTask};
pub use recorder::UpdateSnapshot;
pub use recovery::{RecoveryError, RecoveryState};
pub use scheduler::{Clock, Deferred, ManualClock, SystemClock};
pub use session::{HistorySession, HistoryStats};
pub use shortcuts::{HistoryCommand, KeyChord, ShortcutMap};
pub use store::{HistorySnapshot, HistoryStore};
