//! Reader Loop: the non-blocking half of the dispatcher. Owns
//! `ServerState` exclusively, classifies every inbound request, answers
//! read-only ones directly, and forwards execution work to the Engine.

use std::collections::VecDeque;

use dispatcher_types::{
    BuildEngineBackend, BuildState, Event, LogLevel, Request, Response, ScopedKey, Value,
};

use crate::client::ClientHandle;
use crate::config::DispatcherConfig;
use crate::engine::{CancelRegistry, EngineEvent};
use crate::engine_ref::EngineStateReader;
use crate::error::DispatcherError;
use crate::queue::{RequestQueueReceiver, ServerRequest};
use crate::state::ServerState;
use crate::work::WorkQueue;
use std::sync::Arc;

/// Drives the three-phase Reader loop. Generic over the
/// backend purely to reach its synchronous, read-only accessors
/// (`resolve_key`, `completions`, `render_task_command`); it never calls
/// `execute` — that is the Engine's job.
pub struct ReaderLoop<B: BuildEngineBackend> {
    requests: RequestQueueReceiver,
    work: Arc<WorkQueue>,
    engine_state: EngineStateReader,
    engine_events: tokio::sync::mpsc::UnboundedReceiver<EngineEvent>,
    cancel_registry: Arc<CancelRegistry>,
    backend: Arc<B>,
    config: DispatcherConfig,
    state: ServerState,
    deferred: VecDeque<ServerRequest>,
    last_published: Option<BuildState>,
}

impl<B: BuildEngineBackend> ReaderLoop<B> {
    pub fn new(
        requests: RequestQueueReceiver,
        work: Arc<WorkQueue>,
        engine_state: EngineStateReader,
        engine_events: tokio::sync::mpsc::UnboundedReceiver<EngineEvent>,
        cancel_registry: Arc<CancelRegistry>,
        backend: Arc<B>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            requests,
            work,
            engine_state,
            engine_events,
            cancel_registry,
            backend,
            config,
            state: ServerState::new(),
            deferred: VecDeque::new(),
            last_published: None,
        }
    }

    /// Run all three phases to completion. Returns once the Request Queue's
    /// producers have all gone away (a clean shutdown, not an error).
    pub async fn run(mut self) {
        if !self.run_pre_build().await {
            tracing::info!("request queue closed before the engine booted");
            return;
        }
        self.boot_handover().await;
        self.run_steady_state().await;
    }

    /// Phase 1: pre-build. Returns `false` if the Request Queue closed before
    /// the engine ever booted.
    async fn run_pre_build(&mut self) -> bool {
        loop {
            if self.engine_state.current().is_some() {
                return true;
            }

            let next = tokio::time::timeout(self.config.boot_poll_interval, self.requests.recv()).await;
            match next {
                Ok(Some(request)) => self.handle_pre_build(request),
                Ok(None) => return false,
                Err(_elapsed) => continue,
            }
        }
    }

    fn handle_pre_build(&mut self, request: ServerRequest) {
        let ServerRequest {
            client,
            serial,
            request,
        } = request;
        match request {
            Request::ListenToEvents => {
                self.state = std::mem::take(&mut self.state).add_event_listener(client);
            }
            Request::ClientClosed => {
                self.state = std::mem::take(&mut self.state).disconnect(&client);
            }
            Request::Execution { command } => {
                self.forward_execution(client, serial, command);
            }
            other => {
                if self.deferred.len() >= self.config.deferred_startup_capacity {
                    let message = format!(
                        "deferred_startup_buffer is full (capacity {})",
                        self.config.deferred_startup_capacity
                    );
                    tracing::warn!(
                        capacity = self.config.deferred_startup_capacity,
                        "deferred startup buffer full, rejecting request"
                    );
                    self.broadcast_log(LogLevel::Warn, message.clone());
                    client.reply(serial, Response::ErrorResponse { message });
                } else {
                    self.deferred.push_back(ServerRequest {
                        client,
                        serial,
                        request: other,
                    });
                }
            }
        }
    }

    /// Phase 2: boot handover. Broadcast `NowListening`, then drain the deferred
    /// buffer in arrival order.
    async fn boot_handover(&mut self) {
        let state = self
            .engine_state
            .current()
            .expect("boot_handover only runs once the engine has published");
        self.last_published = Some(state.clone());
        tracing::info!(generation = state.generation, "engine booted, now listening");

        for listener in self.state.event_listeners() {
            listener.send(Event::BuildLoaded);
            listener.send(Event::NowListening);
        }

        let deferred = std::mem::take(&mut self.deferred);
        for request in deferred {
            self.dispatch_steady_state(request).await;
        }
    }

    /// Phase 3: steady state. Block on whichever of the Request Queue, the Engine
    /// State Ref, or the Engine's outcome channel has something next.
    async fn run_steady_state(&mut self) {
        loop {
            tokio::select! {
                changed = self.engine_state.changed() => {
                    if changed {
                        self.handle_state_change();
                    }
                }
                event = self.engine_events.recv() => {
                    match event {
                        Some(event) => self.handle_engine_event(event),
                        None => tracing::warn!("engine event channel closed"),
                    }
                }
                request = self.requests.recv() => {
                    match request {
                        Some(request) => self.dispatch_steady_state(request).await,
                        None => {
                            tracing::info!("request queue closed, reader exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle_state_change(&mut self) {
        let Some(state) = self.engine_state.current() else {
            return;
        };
        let previous = self.last_published.replace(state.clone());
        let generation_changed = previous.as_ref().map(|p| p.generation) != Some(state.generation);
        if !generation_changed {
            return;
        }

        if let Some(previous) = previous {
            for key in self.state.listened_keys().cloned().collect::<Vec<_>>() {
                let before = previous.resolve(&key);
                let after = state.resolve(&key);
                if before != after {
                    if let Some(value) = after {
                        for listener in self.state.key_listeners(&key) {
                            listener.send(Event::ValueChange {
                                key: key.clone(),
                                value: value.clone(),
                            });
                        }
                    }
                }
            }
        }

        let structure = state.structure();
        for listener in self.state.build_listeners() {
            listener.send(Event::BuildStructureChanged {
                structure: structure.clone(),
            });
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ExecutionSucceeded { id, requesters } => {
                for client in requesters {
                    client.send(Event::ExecutionSuccess { id });
                }
            }
            EngineEvent::ExecutionFailed {
                id,
                message,
                requesters,
            } => {
                for client in requesters {
                    client.send(Event::ExecutionFailure {
                        id,
                        message: message.clone(),
                    });
                }
            }
        }
    }

    async fn dispatch_steady_state(&mut self, request: ServerRequest) {
        let ServerRequest {
            client,
            serial,
            request,
        } = request;
        if let Err(err) = self.handle_steady_state(client.clone(), serial, request).await {
            tracing::error!(error = %err, "steady-state request handler failed");
            self.broadcast_log(LogLevel::Warn, err.to_string());
            client.reply(serial, Response::ErrorResponse { message: err.to_string() });
        }
    }

    /// Mirrors a diagnostic to every subscribed event listener, independent of
    /// the `tracing` call it accompanies.
    fn broadcast_log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        for listener in self.state.event_listeners() {
            listener.send(Event::LogEvent {
                level,
                message: message.clone(),
            });
        }
    }

    async fn handle_steady_state(
        &mut self,
        client: ClientHandle,
        serial: u64,
        request: Request,
    ) -> Result<(), DispatcherError> {
        match request {
            Request::ListenToEvents => {
                client.send(Event::NowListening);
                self.state = std::mem::take(&mut self.state).add_event_listener(client);
            }
            Request::ListenToBuildChange => {
                self.state = std::mem::take(&mut self.state).add_build_listener(client.clone());
                let structure = self.current_state().structure();
                client.reply(serial, Response::BuildStructureResponse { structure });
            }
            Request::ClientClosed => {
                self.state = std::mem::take(&mut self.state).disconnect(&client);
            }
            Request::KeyLookup { text } => {
                let state = self.current_state();
                let keys = call_backend(|| self.backend.resolve_key(&state, &text))?;
                client.reply(serial, Response::KeyLookupResponse { text, keys });
            }
            Request::ListenToValue { key } => {
                self.handle_listen_to_value(client, serial, key)?;
            }
            Request::CommandCompletions { id, line, level } => {
                let state = self.current_state();
                let completions = call_backend(|| self.backend.completions(&state, &line, level))?;
                client.reply(
                    serial,
                    Response::CommandCompletionsResponse { id, completions },
                );
            }
            Request::Execution { command } => {
                self.forward_execution(client, serial, command);
            }
            Request::Cancel { work_id } => {
                let matched = self.cancel_registry.try_cancel(work_id).await;
                tracing::info!(work_id, matched, "cancel request forwarded");
            }
        }
        Ok(())
    }

    fn handle_listen_to_value(
        &mut self,
        client: ClientHandle,
        serial: u64,
        key: ScopedKey,
    ) -> Result<(), DispatcherError> {
        let current = self.current_state();
        match current.resolve(&key) {
            None => {
                client.reply(serial, Response::KeyNotFound { key });
            }
            Some(Value::Setting(value)) => {
                self.state = std::mem::take(&mut self.state)
                    .add_key_listener(client.clone(), key.clone());
                client.reply(
                    serial,
                    Response::ValueChange {
                        key,
                        value: Value::Setting(value),
                    },
                );
            }
            Some(Value::Task) => {
                self.state = std::mem::take(&mut self.state)
                    .add_key_listener(client.clone(), key.clone());
                match call_backend(|| self.backend.render_task_command(&current, &key))? {
                    Some(command) => self.forward_execution(client, serial, command),
                    None => client.reply(
                        serial,
                        Response::ErrorResponse {
                            message: format!("no renderable command for task {key}"),
                        },
                    ),
                }
            }
        }
        Ok(())
    }

    fn forward_execution(&mut self, client: ClientHandle, serial: u64, command: String) {
        let request = ServerRequest {
            client: client.clone(),
            serial,
            request: Request::Execution { command },
        };
        if let Err(err) = self.work.try_forward(request) {
            tracing::warn!(error = %err, "failed to forward execution to the work queue");
            self.broadcast_log(LogLevel::Warn, err.to_string());
            client.reply(serial, Response::ErrorResponse { message: err.to_string() });
        }
    }

    fn current_state(&self) -> BuildState {
        self.engine_state.current().unwrap_or_default()
    }
}

/// Runs a synchronous backend accessor, turning a panic inside it into a
/// recoverable `HandlerException` instead of taking down the Reader loop.
/// Backend implementations are arbitrary collaborators the dispatcher core
/// does not control; one bad handler must not stop the next request from
/// being served.
fn call_backend<T>(f: impl FnOnce() -> T) -> Result<T, DispatcherError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
        .map_err(|payload| DispatcherError::HandlerException(describe_panic(payload)))
}

fn describe_panic(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "backend handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Outbound;
    use crate::engine_ref::engine_state_ref;
    use crate::queue::request_queue;
    use crate::work::Work;
    use dispatcher_types::{BackendError, CompletionLevel, Completion, TaskDef};
    use std::time::Duration;
    use tokio::sync::mpsc as outbound_mpsc;

    struct TestBackend;

    impl BuildEngineBackend for TestBackend {
        async fn execute(
            &self,
            state: &BuildState,
            _command: &str,
            _cancel: &dispatcher_types::CancelToken,
        ) -> Result<BuildState, BackendError> {
            Ok(state.clone())
        }

        fn resolve_key(&self, state: &BuildState, text: &str) -> Vec<ScopedKey> {
            ScopedKey::parse(text)
                .filter(|key| state.settings.contains_key(key) || state.tasks.contains_key(key))
                .into_iter()
                .collect()
        }

        fn render_task_command(&self, _state: &BuildState, key: &ScopedKey) -> Option<String> {
            Some(format!("run:{key}"))
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

    fn test_config() -> DispatcherConfig {
        DispatcherConfig {
            boot_poll_interval: Duration::from_millis(5),
            ..DispatcherConfig::default()
        }
    }

    fn client() -> (ClientHandle, outbound_mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = outbound_mpsc::unbounded_channel();
        (ClientHandle::new(tx), rx)
    }

    fn key(k: &str) -> ScopedKey {
        ScopedKey::new(None::<String>, k)
    }

    async fn recv_reply(rx: &mut outbound_mpsc::UnboundedReceiver<Outbound>) -> Response {
        match rx.recv().await.unwrap() {
            Outbound::Reply { response, .. } => response,
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    async fn recv_event(rx: &mut outbound_mpsc::UnboundedReceiver<Outbound>) -> Event {
        match rx.recv().await.unwrap() {
            Outbound::Event(event) => event,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn boot_time_requests_are_deferred_and_answered_in_order_after_boot() {
        let (request_tx, request_rx) = request_queue(16);
        let work = Arc::new(WorkQueue::new(16));
        let (state_writer, state_reader) = engine_state_ref();
        let (_events_tx, events_rx) = outbound_mpsc::unbounded_channel();
        let cancel_registry = Arc::new(CancelRegistry::new());

        let reader = ReaderLoop::new(
            request_rx,
            work,
            state_reader,
            events_rx,
            cancel_registry,
            Arc::new(TestBackend),
            test_config(),
        );
        let handle = tokio::spawn(reader.run());

        let (c1, mut rx1) = client();
        request_tx
            .try_send(ServerRequest {
                client: c1.clone(),
                serial: 1,
                request: Request::KeyLookup {
                    text: "compile".into(),
                },
            })
            .unwrap();
        request_tx
            .try_send(ServerRequest {
                client: c1.clone(),
                serial: 2,
                request: Request::ListenToEvents,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut state = BuildState::default();
        state.settings.insert(key("compile"), "ok".into());
        state_writer.publish(state);

        assert!(matches!(recv_event(&mut rx1).await, Event::BuildLoaded));
        assert!(matches!(recv_event(&mut rx1).await, Event::NowListening));
        match recv_reply(&mut rx1).await {
            Response::KeyLookupResponse { text, keys } => {
                assert_eq!(text, "compile");
                assert_eq!(keys, vec![key("compile")]);
            }
            other => panic!("unexpected: {other:?}"),
        }

        drop(request_tx);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn disconnect_removes_the_client_from_every_listener_set() {
        let (request_tx, request_rx) = request_queue(16);
        let work = Arc::new(WorkQueue::new(16));
        let (state_writer, state_reader) = engine_state_ref();
        let (_events_tx, events_rx) = outbound_mpsc::unbounded_channel();
        let cancel_registry = Arc::new(CancelRegistry::new());

        let mut initial = BuildState::default();
        initial.settings.insert(key("version"), "1".into());
        state_writer.publish(initial);

        let reader = ReaderLoop::new(
            request_rx,
            work,
            state_reader,
            events_rx,
            cancel_registry,
            Arc::new(TestBackend),
            test_config(),
        );
        let handle = tokio::spawn(reader.run());

        let (c1, mut rx1) = client();
        for request in [
            Request::ListenToEvents,
            Request::ListenToBuildChange,
            Request::ListenToValue { key: key("version") },
        ] {
            request_tx
                .try_send(ServerRequest {
                    client: c1.clone(),
                    serial: 1,
                    request,
                })
                .unwrap();
        }
        // Drain the three immediate replies/events before disconnecting.
        for _ in 0..3 {
            let _ = rx1.recv().await.unwrap();
        }

        request_tx
            .try_send(ServerRequest {
                client: c1.clone(),
                serial: 1,
                request: Request::ClientClosed,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut bumped = BuildState::default();
        bumped.generation = 1;
        bumped.settings.insert(key("version"), "2".into());
        state_writer.publish(bumped);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(rx1.try_recv().is_err(), "disconnected client must not be notified");

        drop(request_tx);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn listen_to_value_on_a_task_forwards_a_synthetic_execution() {
        let (request_tx, request_rx) = request_queue(16);
        let work = Arc::new(WorkQueue::new(16));
        let (state_writer, state_reader) = engine_state_ref();
        let (_events_tx, events_rx) = outbound_mpsc::unbounded_channel();
        let cancel_registry = Arc::new(CancelRegistry::new());

        let mut initial = BuildState::default();
        initial.tasks.insert(
            key("compile"),
            TaskDef {
                key: key("compile"),
                command_template: "compile".into(),
            },
        );
        state_writer.publish(initial);

        let work_for_reader = work.clone();
        let reader = ReaderLoop::new(
            request_rx,
            work_for_reader,
            state_reader,
            events_rx,
            cancel_registry,
            Arc::new(TestBackend),
            test_config(),
        );
        let handle = tokio::spawn(reader.run());

        let (c1, _rx1) = client();
        request_tx
            .try_send(ServerRequest {
                client: c1,
                serial: 1,
                request: Request::ListenToValue { key: key("compile") },
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        match work.take_next_work().await.unwrap() {
            Work::CommandExecution { command, .. } => assert_eq!(command, "run:compile"),
            other => panic!("unexpected: {other:?}"),
        }

        drop(request_tx);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn build_structure_change_is_broadcast_to_build_listeners_on_generation_bump() {
        let (request_tx, request_rx) = request_queue(16);
        let work = Arc::new(WorkQueue::new(16));
        let (state_writer, state_reader) = engine_state_ref();
        let (_events_tx, events_rx) = outbound_mpsc::unbounded_channel();
        let cancel_registry = Arc::new(CancelRegistry::new());

        state_writer.publish(BuildState::default());

        let reader = ReaderLoop::new(
            request_rx,
            work,
            state_reader,
            events_rx,
            cancel_registry,
            Arc::new(TestBackend),
            test_config(),
        );
        let handle = tokio::spawn(reader.run());

        let (c1, mut rx1) = client();
        request_tx
            .try_send(ServerRequest {
                client: c1,
                serial: 1,
                request: Request::ListenToBuildChange,
            })
            .unwrap();
        match recv_reply(&mut rx1).await {
            Response::BuildStructureResponse { structure } => assert_eq!(structure.generation, 0),
            other => panic!("unexpected: {other:?}"),
        }

        let mut next = BuildState::default();
        next.generation = 1;
        state_writer.publish(next);

        match recv_event(&mut rx1).await {
            Event::BuildStructureChanged { structure } => assert_eq!(structure.generation, 1),
            other => panic!("unexpected: {other:?}"),
        }

        drop(request_tx);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }

    struct PanickingBackend;

    impl BuildEngineBackend for PanickingBackend {
        async fn execute(
            &self,
            state: &BuildState,
            _command: &str,
            _cancel: &dispatcher_types::CancelToken,
        ) -> Result<BuildState, BackendError> {
            Ok(state.clone())
        }

        fn resolve_key(&self, _state: &BuildState, _text: &str) -> Vec<ScopedKey> {
            panic!("resolve_key blew up");
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

    #[tokio::test]
    async fn a_panicking_handler_gets_an_error_reply_and_the_reader_keeps_serving_requests() {
        let (request_tx, request_rx) = request_queue(16);
        let work = Arc::new(WorkQueue::new(16));
        let (state_writer, state_reader) = engine_state_ref();
        let (_events_tx, events_rx) = outbound_mpsc::unbounded_channel();
        let cancel_registry = Arc::new(CancelRegistry::new());

        state_writer.publish(BuildState::default());

        let reader = ReaderLoop::new(
            request_rx,
            work,
            state_reader,
            events_rx,
            cancel_registry,
            Arc::new(PanickingBackend),
            test_config(),
        );
        let handle = tokio::spawn(reader.run());

        let (c1, mut rx1) = client();
        request_tx
            .try_send(ServerRequest {
                client: c1.clone(),
                serial: 1,
                request: Request::KeyLookup { text: "anything".into() },
            })
            .unwrap();
        match recv_reply(&mut rx1).await {
            Response::ErrorResponse { message } => {
                assert!(message.contains("resolve_key blew up"), "message: {message}");
            }
            other => panic!("unexpected: {other:?}"),
        }

        // The Reader loop must still be alive and serving subsequent requests.
        request_tx
            .try_send(ServerRequest {
                client: c1,
                serial: 2,
                request: Request::ListenToBuildChange,
            })
            .unwrap();
        match recv_reply(&mut rx1).await {
            Response::BuildStructureResponse { .. } => {}
            other => panic!("unexpected: {other:?}"),
        }

        drop(request_tx);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn a_handler_failure_is_also_mirrored_as_a_log_event_to_event_listeners() {
        let (request_tx, request_rx) = request_queue(16);
        let work = Arc::new(WorkQueue::new(16));
        let (state_writer, state_reader) = engine_state_ref();
        let (_events_tx, events_rx) = outbound_mpsc::unbounded_channel();
        let cancel_registry = Arc::new(CancelRegistry::new());

        state_writer.publish(BuildState::default());

        let reader = ReaderLoop::new(
            request_rx,
            work,
            state_reader,
            events_rx,
            cancel_registry,
            Arc::new(PanickingBackend),
            test_config(),
        );
        let handle = tokio::spawn(reader.run());

        let (listener, mut listener_rx) = client();
        request_tx
            .try_send(ServerRequest {
                client: listener.clone(),
                serial: 1,
                request: Request::ListenToEvents,
            })
            .unwrap();
        // The build already loaded before this client subscribed, so the
        // steady-state `ListenToEvents` handler only sends `NowListening`
        // (`BuildLoaded` is a one-time boot broadcast, see the
        // boot-time-requests test above).
        assert!(matches!(recv_event(&mut listener_rx).await, Event::NowListening));

        let (caller, mut caller_rx) = client();
        request_tx
            .try_send(ServerRequest {
                client: caller,
                serial: 1,
                request: Request::KeyLookup { text: "anything".into() },
            })
            .unwrap();
        let _ = recv_reply(&mut caller_rx).await;

        match recv_event(&mut listener_rx).await {
            Event::LogEvent { level, message } => {
                assert_eq!(level, dispatcher_types::LogLevel::Warn);
                assert!(message.contains("resolve_key blew up"), "message: {message}");
            }
            other => panic!("unexpected: {other:?}"),
        }

        drop(request_tx);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
