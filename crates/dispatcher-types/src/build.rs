//! The `BuildState` snapshot and the `BuildEngineBackend` collaborator trait.
//!
//! Everything here is the narrow boundary the dispatcher core requires of
//! the real build engine: a way to turn `(BuildState, command)`
//! into a new `BuildState`, and a handful of pure, synchronous accessors the
//! Reader needs to answer read-only requests against a snapshot.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::request::{CompletionLevel, ScopedKey};
use crate::response::{BuildStructure, Completion, Value};

/// A task's renderable command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDef {
    pub key: ScopedKey,
    pub command_template: String,
}

/// Opaque, read-only (from the Reader's perspective) post-command snapshot.
///
/// Real implementations would back this with a compiled dependency graph;
/// here it is a plain value so the dispatcher core can be exercised without
/// a real compiler.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildState {
    /// Monotonically increasing; bumped on every successful command.
    pub generation: u64,
    pub settings: HashMap<ScopedKey, String>,
    pub tasks: HashMap<ScopedKey, TaskDef>,
}

impl BuildState {
    pub fn resolve(&self, key: &ScopedKey) -> Option<Value> {
        if self.settings.contains_key(key) {
            Some(Value::Setting(self.settings[key].clone()))
        } else if self.tasks.contains_key(key) {
            Some(Value::Task)
        } else {
            None
        }
    }

    pub fn structure(&self) -> BuildStructure {
        let mut settings: Vec<_> = self.settings.keys().cloned().collect();
        let mut tasks: Vec<_> = self.tasks.keys().cloned().collect();
        settings.sort_by_key(|k| k.to_string());
        tasks.sort_by_key(|k| k.to_string());
        BuildStructure {
            generation: self.generation,
            settings,
            tasks,
        }
    }
}

/// Cooperative cancellation signal threaded into `BuildEngineBackend::execute`.
///
/// Best-effort only: a command is free to ignore it and run to
/// completion. Cloning shares the same underlying flag, matching the
/// dispatcher core's single `LastCommand` per in-flight execution.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called. A command that wants to bail
    /// out early can race this against its own work with `tokio::select!`.
    ///
    /// Registers interest in the next notification before checking the flag,
    /// so a `cancel()` landing between the check and the wait is never
    /// missed: `notify_waiters` only wakes waiters already registered.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Failure reported by the build engine backend while executing a command.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("unknown command: {command}")]
    UnknownCommand { command: String },
    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

/// The dispatcher core is generic over this trait rather than over a
/// concrete build engine, so it never needs to know how commands are
/// actually interpreted.
pub trait BuildEngineBackend: Send + Sync + 'static {
    /// Execute `command` against `state`, producing the next `BuildState`.
    fn execute(
        &self,
        state: &BuildState,
        command: &str,
        cancel: &CancelToken,
    ) -> impl Future<Output = Result<BuildState, BackendError>> + Send;

    /// Resolve free-form lookup text into scoped keys. Never fails; an
    /// unparseable or unmatched `text` simply yields no keys.
    fn resolve_key(&self, state: &BuildState, text: &str) -> Vec<ScopedKey>;

    /// The command line to run in order to produce a task key's value.
    fn render_task_command(&self, state: &BuildState, key: &ScopedKey) -> Option<String>;

    /// Completions for a partially typed command line.
    fn completions(&self, state: &BuildState, line: &str, level: CompletionLevel)
        -> Vec<Completion>;
}
