#![forbid(unsafe_code)]

//! Deterministic replay harness for the change history engine.
//!
//! A script is a JSONL file of [`Step`]s driven against an in-memory page
//! under virtual time. Each step produces a [`StepReport`] carrying the
//! history status and a BLAKE3 hash of the page, so two runs of the same
//! script can be compared line by line.
//!
//! ```
//! use uscore_harness::{Replay, parse_script};
//!
//! let script = r#"
//! {"op":"create","kind":"us_btn"}
//! {"op":"commit","id":"us_btn:1","action":"CREATE"}
//! {"op":"undo"}
//! {"op":"settle"}
//! "#;
//! let steps = parse_script(script).unwrap();
//! let mut replay = Replay::new(Default::default());
//! let reports = replay.run(&steps);
//! assert_eq!(reports.last().unwrap().status.redo, 1);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info_span};
use uscore_history::{
    Action, ConfigError, DocumentAdapter, HandlerKey, HistoryConfig, HistorySession,
    HistoryStats, HistoryStatus, KeyChord, ManualClock, MemoryDocument, NodeId, UpdateSnapshot,
};
use web_time::Duration;

/// Log target for harness events.
const LOG_TARGET: &str = "uscore.harness";

/// Handler key for the page settings replayed by `commit_data` steps.
pub const SETTINGS_HANDLER: &str = "page.settings";

// ============================================================================
// Script
// ============================================================================

/// One line of a replay script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Add an element. Ids are assigned as `kind:n`.
    Create {
        kind: String,
        #[serde(default)]
        parent: Option<NodeId>,
        #[serde(default)]
        index: usize,
    },
    SetText {
        id: NodeId,
        text: String,
    },
    SetLoading {
        id: NodeId,
        loading: bool,
    },
    Move {
        id: NodeId,
        parent: NodeId,
        index: usize,
    },
    Remove {
        id: NodeId,
    },
    /// Record the current state of `id` before the edit that follows.
    Commit {
        id: NodeId,
        action: Action,
        #[serde(default)]
        throttle: bool,
        #[serde(default)]
        ext_data: Option<Value>,
    },
    /// Record the current page settings, then replace them with `value`.
    CommitData {
        value: Value,
        #[serde(default)]
        throttle: bool,
    },
    StageUpdate {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        preview: Option<String>,
    },
    Undo,
    Redo,
    /// Move virtual time forward.
    Advance {
        ms: u64,
    },
    /// Fire timers until nothing is pending.
    Settle,
    /// Press a key chord such as `Ctrl+Shift+Z`.
    Shortcut {
        keys: String,
    },
    /// Make the next `count` reinsertion attempts fail.
    FailInserts {
        count: usize,
    },
}

impl Step {
    /// The `op` tag of this step.
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::SetText { .. } => "set_text",
            Self::SetLoading { .. } => "set_loading",
            Self::Move { .. } => "move",
            Self::Remove { .. } => "remove",
            Self::Commit { .. } => "commit",
            Self::CommitData { .. } => "commit_data",
            Self::StageUpdate { .. } => "stage_update",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::Advance { .. } => "advance",
            Self::Settle => "settle",
            Self::Shortcut { .. } => "shortcut",
            Self::FailInserts { .. } => "fail_inserts",
        }
    }
}

/// Parse a JSONL script. Blank lines and lines starting with `#` are
/// skipped.
pub fn parse_script(src: &str) -> Result<Vec<Step>, HarnessError> {
    src.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|source| HarnessError::Parse {
                line: n + 1,
                source,
            })
        })
        .collect()
}

/// Read and parse a script file.
pub fn load_script(path: impl AsRef<Path>) -> Result<Vec<Step>, HarnessError> {
    let src = std::fs::read_to_string(path)?;
    parse_script(&src)
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading a replay.
#[derive(Debug)]
pub enum HarnessError {
    Io(io::Error),
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    Config(ConfigError),
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "script I/O error: {e}"),
            Self::Parse { line, source } => write!(f, "script line {line}: {source}"),
            Self::Config(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse { source, .. } => Some(source),
            Self::Config(e) => Some(e),
        }
    }
}

impl From<io::Error> for HarnessError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ConfigError> for HarnessError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ============================================================================
// Replay
// ============================================================================

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// Zero-based step number.
    pub step: usize,
    pub op: &'static str,
    /// Whether the engine accepted the call. Document edits and timer
    /// steps always report `true`.
    pub accepted: bool,
    pub status: HistoryStatus,
    /// BLAKE3 of the page content and page settings, hex encoded.
    pub page_hash: String,
}

/// A history session over a [`MemoryDocument`] driven by virtual time.
pub struct Replay {
    session: HistorySession<MemoryDocument, ManualClock>,
    settings: Rc<RefCell<Value>>,
    settings_key: HandlerKey,
}

impl Replay {
    /// Start from an empty page with `config`.
    pub fn new(config: HistoryConfig) -> Self {
        let mut session =
            HistorySession::with_clock(MemoryDocument::new(), config, ManualClock::new());
        let settings = Rc::new(RefCell::new(Value::Object(Default::default())));
        let settings_key = HandlerKey::new(SETTINGS_HANDLER);

        let target = Rc::clone(&settings);
        session
            .handlers_mut()
            .register(settings_key.clone(), move |restore, reversal| {
                *reversal = target.replace(restore);
            });

        Self {
            session,
            settings,
            settings_key,
        }
    }

    /// Load and validate `config_path` (TOML), then start a replay with it.
    pub fn from_config_file(config_path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let config = HistoryConfig::from_toml_file(config_path)?.validated()?;
        Ok(Self::new(config))
    }

    pub fn session(&self) -> &HistorySession<MemoryDocument, ManualClock> {
        &self.session
    }

    /// Current page settings. Starts as an empty object.
    pub fn settings(&self) -> Value {
        self.settings.borrow().clone()
    }

    pub fn stats(&self) -> HistoryStats {
        self.session.stats()
    }

    /// Run every step in order.
    pub fn run(&mut self, steps: &[Step]) -> Vec<StepReport> {
        steps
            .iter()
            .enumerate()
            .map(|(n, step)| self.apply(n, step))
            .collect()
    }

    /// Run a single step.
    pub fn apply(&mut self, n: usize, step: &Step) -> StepReport {
        let span = info_span!(target: LOG_TARGET, "replay.step", step = n, op = step.op());
        let _entered = span.enter();

        let accepted = self.dispatch(step);
        debug!(target: LOG_TARGET, accepted, "step applied");

        StepReport {
            step: n,
            op: step.op(),
            accepted,
            status: self.session.status(),
            page_hash: self.page_hash(),
        }
    }

    /// Hash of the page content plus settings.
    #[must_use]
    pub fn page_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.session.document().page_content().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.settings.borrow().to_string().as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    fn dispatch(&mut self, step: &Step) -> bool {
        let s = &mut self.session;
        match step {
            Step::Create {
                kind,
                parent,
                index,
            } => {
                let parent = parent
                    .clone()
                    .unwrap_or_else(|| s.document().root_id().clone());
                s.document_mut().create(kind, &parent, *index);
                true
            }
            Step::SetText { id, text } => s.document_mut().set_text(id, text),
            Step::SetLoading { id, loading } => s.document_mut().set_loading(id, *loading),
            Step::Move { id, parent, index } => {
                s.document_mut().move_node(id, parent, *index);
                true
            }
            Step::Remove { id } => {
                s.document_mut().remove_node(id);
                true
            }
            Step::Commit {
                id,
                action,
                throttle,
                ext_data,
            } => s.commit_change(id, *action, *throttle, ext_data.clone()),
            Step::CommitData { value, throttle } => {
                let current = self.settings.borrow().clone();
                let accepted = s.commit_data(current, &self.settings_key, *throttle);
                self.settings.replace(value.clone());
                accepted
            }
            Step::StageUpdate { content, preview } => {
                s.stage_update(UpdateSnapshot {
                    content: content.clone(),
                    preview: preview.clone(),
                });
                true
            }
            Step::Undo => s.undo(),
            Step::Redo => s.redo(),
            Step::Advance { ms } => {
                s.advance(Duration::from_millis(*ms));
                true
            }
            Step::Settle => {
                s.run_until_settled();
                true
            }
            Step::Shortcut { keys } => KeyChord::parse(keys)
                .map(|chord| s.handle_shortcut(&chord))
                .unwrap_or(false),
            Step::FailInserts { count } => {
                s.document_mut().fail_next_inserts(*count);
                true
            }
        }
    }
}

impl Default for Replay {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_blank_and_comment_lines() {
        let steps = parse_script("# setup\n\n{\"op\":\"undo\"}\n  \n{\"op\":\"advance\",\"ms\":5}\n")
            .expect("parse");
        assert_eq!(steps, vec![Step::Undo, Step::Advance { ms: 5 }]);
    }

    #[test]
    fn parse_error_reports_line() {
        let err = parse_script("{\"op\":\"undo\"}\n{\"op\":\"jump\"}").unwrap_err();
        match err {
            HarnessError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = parse_script(r#"{"op":"commit","id":"us_btn:1","action":"PASTE"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn step_op_matches_serialized_tag() {
        let steps = [
            Step::Undo,
            Step::Settle,
            Step::FailInserts { count: 1 },
            Step::CommitData {
                value: Value::Null,
                throttle: false,
            },
        ];
        for step in steps {
            let json = serde_json::to_value(&step).expect("serialize");
            assert_eq!(json["op"], step.op());
        }
    }

    #[test]
    fn hash_tracks_page_changes() {
        let mut replay = Replay::default();
        let empty = replay.page_hash();
        replay.apply(
            0,
            &Step::Create {
                kind: "us_btn".into(),
                parent: None,
                index: 0,
            },
        );
        assert_ne!(replay.page_hash(), empty);
        assert_eq!(replay.page_hash().len(), 64);
    }

    #[test]
    fn commit_data_round_trips_settings() {
        let mut replay = Replay::default();
        let steps = parse_script(
            r#"{"op":"commit_data","value":{"css":"a{}"}}
{"op":"undo"}
{"op":"settle"}"#,
        )
        .expect("parse");
        let reports = replay.run(&steps);
        assert!(reports[0].accepted);
        assert_eq!(replay.settings(), serde_json::json!({}));

        replay.apply(3, &Step::Redo);
        replay.apply(4, &Step::Settle);
        assert_eq!(replay.settings()["css"], "a{}");
    }

    #[test]
    fn bad_shortcut_is_not_accepted() {
        let mut replay = Replay::default();
        let report = replay.apply(
            0,
            &Step::Shortcut {
                keys: "Ctrl+".into(),
            },
        );
        assert!(!report.accepted);
    }
}
