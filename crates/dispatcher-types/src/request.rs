//! Wire-independent request shapes understood by the dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A key scoped to a project, e.g. `sub-project/compile`.
///
/// Equality and hashing are structural, so a `ScopedKey` can be used directly
/// as a `HashMap`/`HashSet` key for listener bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopedKey {
    /// Project/sub-project scope. `None` means the root project.
    #[serde(default)]
    pub scope: Option<String>,
    /// The key name itself (e.g. `compile`, `test`, `version`).
    pub key: String,
}

impl ScopedKey {
    pub fn new(scope: Option<impl Into<String>>, key: impl Into<String>) -> Self {
        Self {
            scope: scope.map(Into::into),
            key: key.into(),
        }
    }

    /// Parse the legacy `scope/key` or bare `key` text form.
    ///
    /// This never fails: unparseable text just yields no match further up the
    /// stack (`KeyLookup` replies with an empty list rather than an error).
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        match text.rsplit_once('/') {
            Some((scope, key)) if !key.is_empty() => Some(Self::new(Some(scope), key)),
            _ => Some(Self::new(None::<String>, text)),
        }
    }
}

impl fmt::Display for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{scope}/{}", self.key),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Depth of detail requested from `CommandCompletions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionLevel {
    /// Only complete the current token.
    Token,
    /// Complete the current token and show a one-line summary of each candidate.
    Described,
}

/// Everything a client may ask the dispatcher to do.
///
/// This intentionally mirrors the legacy wire protocol's request taxonomy,
/// not a convenient internal shape, so that the Reader's dispatch table
/// can match on it exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Subscribe to global events.
    ListenToEvents,
    /// Subscribe to build-structure change events.
    ListenToBuildChange,
    /// Synthetic: the client's transport closed.
    ClientClosed,
    /// Parse `text` into a scoped key list.
    KeyLookup { text: String },
    /// Subscribe to a key's value; if task-valued, also schedule its execution.
    ListenToValue { key: ScopedKey },
    /// Tab-completion query.
    CommandCompletions {
        id: u64,
        line: String,
        level: CompletionLevel,
    },
    /// Run a command.
    Execution { command: String },
    /// Cancel a specific in-flight command by its work id.
    Cancel { work_id: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_scope_and_key() {
        let key = ScopedKey::parse("sub-project/compile").unwrap();
        assert_eq!(key.scope.as_deref(), Some("sub-project"));
        assert_eq!(key.key, "compile");
    }

    #[test]
    fn parse_bare_key_has_no_scope() {
        let key = ScopedKey::parse("compile").unwrap();
        assert_eq!(key.scope, None);
        assert_eq!(key.key, "compile");
    }

    #[test]
    fn parse_rejects_blank_text() {
        assert!(ScopedKey::parse("   ").is_none());
    }

    #[test]
    fn parse_treats_trailing_slash_as_bare_key() {
        // "a/" has an empty key after the last slash, so it falls back to a
        // bare (unscoped) key rather than producing a key named "".
        let key = ScopedKey::parse("a/").unwrap();
        assert_eq!(key.scope, None);
        assert_eq!(key.key, "a/");
    }

    #[test]
    fn display_round_trips_scoped_and_bare() {
        assert_eq!(ScopedKey::new(Some("a"), "b").to_string(), "a/b");
        assert_eq!(ScopedKey::new(None::<String>, "b").to_string(), "b");
    }
}
