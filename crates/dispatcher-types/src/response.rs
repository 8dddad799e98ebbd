//! Replies and broadcast events the dispatcher sends back to clients.

use serde::{Deserialize, Serialize};

use crate::request::ScopedKey;

/// A single completion candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub display: String,
    pub append: String,
}

/// A snapshot of the build's key/task structure, as returned to
/// `ListenToBuildChange` subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStructure {
    pub generation: u64,
    pub settings: Vec<ScopedKey>,
    pub tasks: Vec<ScopedKey>,
}

/// A resolved value, as returned for `ListenToValue` on a setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Setting(String),
    Task,
}

/// Correlated replies to a single request (see `ServerRequest::serial`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Resolution for `KeyLookup`; `keys` may be empty but this is never an error.
    KeyLookupResponse { text: String, keys: Vec<ScopedKey> },
    /// `ListenToValue` resolved to nothing.
    KeyNotFound { key: ScopedKey },
    /// `ListenToValue` resolved to a setting's current value.
    ValueChange { key: ScopedKey, value: Value },
    /// Current build structure, sent immediately on `ListenToBuildChange`.
    BuildStructureResponse { structure: BuildStructure },
    /// Completions for a `CommandCompletions` query.
    CommandCompletionsResponse { id: u64, completions: Vec<Completion> },
    /// Acknowledges an `Execution` request; `id` may be shared across clients
    /// that requested the same command (coalescing).
    ExecutionRequestReceived { id: u64 },
    /// A steady-state handler raised an exception while servicing a request.
    ErrorResponse { message: String },
}

/// Events broadcast to all subscribed listeners (not correlated to a serial).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Sent to a client right after it subscribes via `ListenToEvents`, once
    /// the build is up.
    NowListening,
    /// The initial build load completed.
    BuildLoaded,
    /// The build's key/task structure changed as a result of a command.
    BuildStructureChanged { structure: BuildStructure },
    /// A coalesced command execution completed successfully.
    ExecutionSuccess { id: u64 },
    /// A coalesced command execution failed.
    ExecutionFailure { id: u64, message: String },
    /// A setting value changed as a result of a command.
    ValueChange { key: ScopedKey, value: Value },
    /// A diagnostic log line, mirrored to subscribers for convenience.
    LogEvent { level: LogLevel, message: String },
}

/// Severity of a mirrored `LogEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}
