//! Work Queue / Coalescer: the engine-facing `take_next_work` primitive.
//! Duplicate `Execution` requests for the same command string are merged
//! into one `Work::CommandExecution` that remembers every requester,
//! preserving the position of the *first* request.

use std::collections::{HashSet, VecDeque};

use dispatcher_types::{Request, Response};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::client::ClientHandle;
use crate::error::DispatcherError;
use crate::queue::ServerRequest;

/// A unit the Engine will execute.
#[derive(Debug, Clone)]
pub enum Work {
    CommandExecution {
        id: u64,
        command: String,
        requesters: HashSet<ClientHandle>,
    },
    /// Terminal poison pill; the Engine exits cleanly on receiving this.
    EndOfWork,
}

struct WorkState {
    items: VecDeque<Work>,
    next_id: u64,
}

/// Holds the raw inbound channel and the deduplicated work list. The raw
/// receiver and the work list use separate locks so that the blocking wait
/// in step 3 of `take_next_work` never holds the work-list lock.
pub struct WorkQueue {
    raw_tx: mpsc::Sender<ServerRequest>,
    raw_rx: Mutex<mpsc::Receiver<ServerRequest>>,
    work: Mutex<WorkState>,
    raw_capacity: usize,
}

/// `id` 0 is reserved as a null sentinel; real work ids start at 1.
const FIRST_WORK_ID: u64 = 1;

impl WorkQueue {
    pub fn new(raw_capacity: usize) -> Self {
        let (raw_tx, raw_rx) = mpsc::channel(raw_capacity);
        Self {
            raw_tx,
            raw_rx: Mutex::new(raw_rx),
            work: Mutex::new(WorkState {
                items: VecDeque::new(),
                next_id: FIRST_WORK_ID,
            }),
            raw_capacity,
        }
    }

    /// Producer side: the Reader forwards `Execution` requests here,
    /// including the synthetic ones generated by `ListenToValue` on a task
    /// key. Never blocks; fails with `QueueFull` on overflow.
    pub fn try_forward(&self, request: ServerRequest) -> Result<(), DispatcherError> {
        self.raw_tx
            .try_send(request)
            .map_err(|_| DispatcherError::QueueFull {
                queue: "work_raw_queue",
                capacity: self.raw_capacity,
            })
    }

    /// Push the terminal poison pill to the front of the work list, ahead
    /// of any pending commands, so a shutdown request is honored promptly
    /// once the Engine next calls `take_next_work`.
    pub async fn push_end_of_work(&self) {
        self.work.lock().await.items.push_front(Work::EndOfWork);
    }

    /// Current length of the deduplicated work list. Exposed as the
    /// reserved "work queue changed" extension point: nothing
    /// subscribes to changes by default in this crate.
    pub async fn queue_len(&self) -> usize {
        self.work.lock().await.items.len()
    }

    /// Engine-facing primitive. Drains every currently-queued raw
    /// request, coalescing `Execution`s into `work`, then returns the head
    /// of `work` — blocking (without holding the work-list lock) if `work`
    /// is empty until at least one request arrives.
    pub async fn take_next_work(&self) -> Result<Work, DispatcherError> {
        loop {
            self.drain_non_blocking().await?;

            if let Some(work) = self.work.lock().await.items.pop_front() {
                return Ok(work);
            }

            let next = {
                let mut raw_rx = self.raw_rx.lock().await;
                raw_rx.recv().await
            };
            match next {
                Some(request) => self.ingest(request).await?,
                None => return Ok(Work::EndOfWork),
            }
        }
    }

    async fn drain_non_blocking(&self) -> Result<(), DispatcherError> {
        loop {
            let request = {
                let mut raw_rx = self.raw_rx.lock().await;
                raw_rx.try_recv()
            };
            match request {
                Ok(request) => self.ingest(request).await?,
                Err(_) => return Ok(()),
            }
        }
    }

    async fn ingest(&self, request: ServerRequest) -> Result<(), DispatcherError> {
        let ServerRequest {
            client,
            serial,
            request,
        } = request;

        let Request::Execution { command } = request else {
            return Err(DispatcherError::InvariantViolation(format!(
                "non-Execution request reached the work raw queue: {request:?}"
            )));
        };

        let mut state = self.work.lock().await;
        let existing = state.items.iter_mut().find_map(|work| match work {
            Work::CommandExecution {
                id,
                command: existing_command,
                requesters,
            } if *existing_command == command => Some((*id, requesters)),
            _ => None,
        });

        let id = match existing {
            Some((id, requesters)) => {
                requesters.insert(client.clone());
                id
            }
            None => {
                let id = state.next_id;
                state.next_id += 1;
                let mut requesters = HashSet::new();
                requesters.insert(client.clone());
                state.items.push_back(Work::CommandExecution {
                    id,
                    command,
                    requesters,
                });
                id
            }
        };
        drop(state);

        client.reply(serial, Response::ExecutionRequestReceived { id });
        Ok(())
    }
}
