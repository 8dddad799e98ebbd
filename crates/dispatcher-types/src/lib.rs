//! Wire-independent types shared by the dispatcher core and its consumers.
//!
//! Nothing in this crate knows about channels, tasks, or client identity —
//! that belongs to `dispatcher-core`. This crate only defines the request,
//! response, and event shapes, plus the narrow `BuildEngineBackend`
//! collaborator trait.

pub mod build;
pub mod request;
pub mod response;

pub use build::{BackendError, BuildEngineBackend, BuildState, CancelToken, TaskDef};
pub use request::{CompletionLevel, Request, ScopedKey};
pub use response::{BuildStructure, Completion, Event, LogLevel, Response, Value};
