#![forbid(unsafe_code)]

//! Keyboard shortcuts for undo and redo.
//!
//! The builder binds Ctrl+Z to undo and Ctrl+Shift+Z to redo. Hosts feed
//! key presses through [`HistorySession::handle_shortcut`](crate::HistorySession::handle_shortcut),
//! which simply calls the public `undo`/`redo` entry points.
//!
//! ```
//! use uscore_history::shortcuts::{HistoryCommand, KeyChord, ShortcutMap};
//!
//! let map = ShortcutMap::default();
//! let chord = KeyChord::parse("ctrl+shift+z").unwrap();
//! assert_eq!(map.resolve(&chord), Some(HistoryCommand::Redo));
//! assert_eq!(chord.to_string(), "Ctrl+Shift+Z");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a shortcut asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryCommand {
    /// Revert the most recent change.
    Undo,
    /// Re-apply the most recently reverted change.
    Redo,
}

impl HistoryCommand {
    /// Parse a command name.
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "undo" => Some(Self::Undo),
            "redo" => Some(Self::Redo),
            _ => None,
        }
    }
}

/// A key plus modifier state.
///
/// Letter keys are stored lowercase so `Ctrl+Z` and `ctrl+z` compare equal;
/// Shift is tracked only through the `shift` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyChord {
    /// The non-modifier key.
    pub key: char,
    /// Ctrl (or Cmd on macOS).
    pub ctrl: bool,
    /// Shift.
    pub shift: bool,
    /// Alt (Option on macOS).
    pub alt: bool,
}

impl KeyChord {
    /// A bare key with no modifiers.
    #[must_use]
    pub fn new(key: char) -> Self {
        Self {
            key: key.to_ascii_lowercase(),
            ctrl: false,
            shift: false,
            alt: false,
        }
    }

    /// `key` with Ctrl held.
    #[must_use]
    pub fn ctrl(key: char) -> Self {
        Self::new(key).with_ctrl()
    }

    /// Add Ctrl.
    #[must_use]
    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    /// Add Shift.
    #[must_use]
    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    /// Add Alt.
    #[must_use]
    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }

    /// Parse `"Ctrl+Shift+Z"`-style notation. Modifier names are
    /// case-insensitive; `Cmd`/`Meta` count as Ctrl and `Option` as Alt.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts: Vec<&str> = s.split('+').map(str::trim).collect();
        let key = parts.pop()?;
        let mut chars = key.chars();
        let (Some(key), None) = (chars.next(), chars.next()) else {
            return None;
        };

        let mut chord = Self::new(key);
        for modifier in parts {
            match modifier.to_lowercase().as_str() {
                "ctrl" | "control" | "cmd" | "meta" => chord.ctrl = true,
                "shift" => chord.shift = true,
                "alt" | "option" => chord.alt = true,
                _ => return None,
            }
        }
        Some(chord)
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            f.write_str("Ctrl+")?;
        }
        if self.alt {
            f.write_str("Alt+")?;
        }
        if self.shift {
            f.write_str("Shift+")?;
        }
        write!(f, "{}", self.key.to_ascii_uppercase())
    }
}

/// Chord-to-command bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutMap {
    bindings: Vec<(KeyChord, HistoryCommand)>,
}

impl Default for ShortcutMap {
    fn default() -> Self {
        Self {
            bindings: vec![
                (KeyChord::ctrl('z'), HistoryCommand::Undo),
                (KeyChord::ctrl('z').with_shift(), HistoryCommand::Redo),
            ],
        }
    }
}

impl ShortcutMap {
    /// Map with no bindings.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Bind `chord` to `command`, replacing any existing binding of the
    /// same chord.
    pub fn bind(&mut self, chord: KeyChord, command: HistoryCommand) {
        self.unbind(&chord);
        self.bindings.push((chord, command));
    }

    /// Remove the binding of `chord`. Returns `true` if one existed.
    pub fn unbind(&mut self, chord: &KeyChord) -> bool {
        let before = self.bindings.len();
        self.bindings.retain(|(bound, _)| bound != chord);
        self.bindings.len() != before
    }

    /// Command bound to `chord`, if any.
    #[must_use]
    pub fn resolve(&self, chord: &KeyChord) -> Option<HistoryCommand> {
        self.bindings
            .iter()
            .find(|(bound, _)| bound == chord)
            .map(|(_, command)| *command)
    }
}
