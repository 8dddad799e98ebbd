//! The dispatcher core: a two-task (Reader/Engine) request dispatcher that
//! fronts a pluggable, single-threaded build engine.
//!
//! Nothing in this crate knows how to listen on a socket or interpret a
//! build command — those are the narrow collaborator boundaries
//! (`dispatcher_types::BuildEngineBackend` and a transport of the caller's
//! choosing). This crate owns only the ordering and liveness contract
//! between the Reader and the Engine.

pub mod client;
pub mod config;
pub mod engine;
pub mod engine_ref;
pub mod error;
pub mod queue;
pub mod reader;
pub mod state;
pub mod work;

pub use client::{ClientHandle, ClientId, Outbound};
pub use config::{ConfigError, DispatcherConfig};
pub use engine::{CancelRegistry, EngineEvent, EngineLoop};
pub use engine_ref::{engine_state_ref, EngineStateReader, EngineStateWriter};
pub use error::{DispatcherError, DispatcherResult};
pub use queue::{request_queue, RequestQueueReceiver, RequestQueueSender, ServerRequest};
pub use reader::ReaderLoop;
pub use state::ServerState;
pub use work::{Work, WorkQueue};

use std::sync::Arc;

use dispatcher_types::{BuildEngineBackend, BuildState};
use tokio::sync::mpsc;

/// Everything needed to run the dispatcher: the two task bodies, plus the
/// producer handle transports use to feed the Request Queue. Wires up the
/// Request Queue, Work Queue, Engine State Ref, and Cancel Registry
/// according to `config`.
pub struct Dispatcher<B: BuildEngineBackend> {
    pub request_sender: RequestQueueSender,
    pub reader: ReaderLoop<B>,
    pub engine: EngineLoop<B>,
}

impl<B: BuildEngineBackend> Dispatcher<B> {
    /// Assemble a fresh dispatcher. Does not start either task; the caller
    /// decides how to spawn `reader.run()` and `engine.run(initial_state)`
    /// (native OS threads or, as in the provided demo, tokio tasks — see
    /// the REDESIGN FLAGS on task vs. thread terminology).
    pub fn new(backend: B, config: DispatcherConfig) -> Self {
        let (request_sender, request_receiver) = request_queue(config.request_queue_capacity);
        let work = Arc::new(WorkQueue::new(config.work_raw_capacity));
        let (state_writer, state_reader) = engine_state_ref();
        let cancel_registry = Arc::new(CancelRegistry::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let backend = Arc::new(backend);

        let reader = ReaderLoop::new(
            request_receiver,
            work.clone(),
            state_reader,
            events_rx,
            cancel_registry.clone(),
            backend.clone(),
            config,
        );
        let engine = EngineLoop::new(backend, work, state_writer, cancel_registry, events_tx);

        Self {
            request_sender,
            reader,
            engine,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatcher_types::{BackendError, CancelToken, CompletionLevel, Completion, Request, Response, ScopedKey};
    use std::time::Duration;

    struct EchoBackend;

    impl BuildEngineBackend for EchoBackend {
        async fn execute(
            &self,
            state: &BuildState,
            _command: &str,
            _cancel: &CancelToken,
        ) -> Result<BuildState, BackendError> {
            let mut next = state.clone();
            next.generation += 1;
            Ok(next)
        }

        fn resolve_key(&self, _state: &BuildState, _text: &str) -> Vec<ScopedKey> {
            Vec::new()
        }

        fn render_task_command(&self, _state: &BuildState, _key: &ScopedKey) -> Option<String> {
            None
        }

        fn completions(
            &self,
            _state: &BuildState,
            _line: &str,
            _level: CompletionLevel,
        ) -> Vec<Completion> {
            Vec::new()
        }
    }

    /// Assembles a full dispatcher (Reader + Engine, both spawned) and
    /// drives one command end to end through real channels, exercising
    /// the wiring `Dispatcher::new` performs rather than any one
    /// component in isolation.
    #[tokio::test]
    async fn a_submitted_command_is_executed_and_reported_back() {
        let mut config = DispatcherConfig::default();
        config.boot_poll_interval = Duration::from_millis(5);
        let dispatcher = Dispatcher::new(EchoBackend, config);

        let reader_handle = tokio::spawn(dispatcher.reader.run());
        let engine_handle = tokio::spawn(dispatcher.engine.run(BuildState::default()));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let client = ClientHandle::new(tx);
        dispatcher
            .request_sender
            .try_send(ServerRequest {
                client: client.clone(),
                serial: 1,
                request: Request::Execution {
                    command: "build".into(),
                },
            })
            .unwrap();

        let received = match rx.recv().await.unwrap() {
            Outbound::Reply {
                response: Response::ExecutionRequestReceived { id },
                ..
            } => id,
            other => panic!("unexpected: {other:?}"),
        };
        assert_eq!(received, 1);

        match rx.recv().await.unwrap() {
            Outbound::Event(dispatcher_types::Event::ExecutionSuccess { id }) => {
                assert_eq!(id, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }

        drop(dispatcher.request_sender);
        tokio::time::timeout(Duration::from_millis(200), reader_handle)
            .await
            .unwrap()
            .unwrap();
        engine_handle.abort();
    }
}
