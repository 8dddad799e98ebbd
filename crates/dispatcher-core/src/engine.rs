//! Engine Loop: the sequential command loop that drives the Build
//! Engine Backend. The cancel bookkeeping below generalizes a single global
//! stop flag into a per-in-flight-command cancel handle keyed by work id.

use std::sync::Arc;
use std::time::Instant;

use dispatcher_types::{BuildEngineBackend, BuildState, CancelToken};
use tokio::sync::{mpsc, Mutex};

use crate::client::ClientHandle;
use crate::engine_ref::EngineStateWriter;
use crate::error::DispatcherError;
use crate::work::{Work, WorkQueue};

/// Outcome of a coalesced command execution, destined for every requester
/// that was waiting on it. The Engine has no access to `ServerState` (it is
/// Reader-owned), so it reports outcomes directly to the requesters
/// carried on the `Work` item rather than through a listener set.
#[derive(Debug)]
pub enum EngineEvent {
    ExecutionSucceeded {
        id: u64,
        requesters: Vec<ClientHandle>,
    },
    ExecutionFailed {
        id: u64,
        message: String,
        requesters: Vec<ClientHandle>,
    },
}

struct CancelSlot {
    work_id: u64,
    token: CancelToken,
}

/// Per-execution cancel bookkeeping (the current "last command"): which work id is
/// currently running and the token used to signal it. Shared between the
/// Engine (arms/clears it around each command) and the Reader (forwards
/// `Cancel{work_id}` requests into it).
#[derive(Default)]
pub struct CancelRegistry {
    current: Mutex<Option<CancelSlot>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a fresh cancel token for `work_id`, replacing whatever was there.
    pub async fn arm(&self, work_id: u64) -> CancelToken {
        let token = CancelToken::new();
        *self.current.lock().await = Some(CancelSlot {
            work_id,
            token: token.clone(),
        });
        token
    }

    /// Clear the current slot once its command has finished.
    pub async fn clear(&self) {
        *self.current.lock().await = None;
    }

    /// Best-effort cancellation: only takes effect if `work_id` matches
    /// the command currently running. Returns whether it matched.
    pub async fn try_cancel(&self, work_id: u64) -> bool {
        let guard = self.current.lock().await;
        match guard.as_ref() {
            Some(slot) if slot.work_id == work_id => {
                slot.token.cancel();
                true
            }
            _ => false,
        }
    }
}

/// Sequential command loop. Generic over the backend so the
/// dispatcher core never depends on a concrete build engine.
pub struct EngineLoop<B: BuildEngineBackend> {
    backend: Arc<B>,
    work: Arc<WorkQueue>,
    state_writer: EngineStateWriter,
    cancel_registry: Arc<CancelRegistry>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl<B: BuildEngineBackend> EngineLoop<B> {
    pub fn new(
        backend: Arc<B>,
        work: Arc<WorkQueue>,
        state_writer: EngineStateWriter,
        cancel_registry: Arc<CancelRegistry>,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            backend,
            work,
            state_writer,
            cancel_registry,
            events_tx,
        }
    }

    /// Run to completion. Publishes `initial_state` immediately
    /// (`SendReadyForRequests`), then repeatedly calls `take_next_work`
    /// (`HandleNextServerRequest`) until `Work::EndOfWork`.
    ///
    /// An `InvariantViolation` surfaced from `take_next_work` is not
    /// recoverable and crashes the process with a diagnostic.
    pub async fn run(self, initial_state: BuildState) {
        let mut current = initial_state;
        self.state_writer.publish(current.clone());
        tracing::info!(generation = current.generation, "engine booted, now idle");

        loop {
            let work = match self.work.take_next_work().await {
                Ok(work) => work,
                Err(err @ DispatcherError::InvariantViolation(_)) => {
                    panic!("work queue invariant violated: {err}");
                }
                Err(err) => {
                    tracing::error!(error = %err, "unexpected error from take_next_work");
                    continue;
                }
            };

            let (id, command, requesters) = match work {
                Work::EndOfWork => {
                    tracing::info!("engine exiting: end of work");
                    break;
                }
                Work::CommandExecution {
                    id,
                    command,
                    requesters,
                } => (id, command, requesters),
            };

            let cancel = self.cancel_registry.arm(id).await;
            let started_at = Instant::now();
            tracing::info!(id, command = %command, "command starting");

            match self.backend.execute(&current, &command, &cancel).await {
                Ok(next) => {
                    current = next;
                    self.state_writer.publish(current.clone());
                    self.cancel_registry.clear().await;
                    tracing::info!(
                        id,
                        generation = current.generation,
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        "command succeeded"
                    );
                    let _ = self.events_tx.send(EngineEvent::ExecutionSucceeded {
                        id,
                        requesters: requesters.into_iter().collect(),
                    });
                }
                Err(err) => {
                    self.cancel_registry.clear().await;
                    tracing::warn!(
                        id,
                        error = %err,
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        "command failed"
                    );
                    let _ = self.events_tx.send(EngineEvent::ExecutionFailed {
                        id,
                        message: err.to_string(),
                        requesters: requesters.into_iter().collect(),
                    });
                }
            }
        }
    }
}
