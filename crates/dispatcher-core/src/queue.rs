//! Request Queue: a bounded FIFO of `(client, serial, request)`
//! flowing from many transport-side producers to the single Reader
//! consumer. Overflow never drops a request — it fails the enqueue so the
//! caller can reply `QueueFull` to the offending client.

use dispatcher_types::Request;
use tokio::sync::mpsc;

use crate::client::ClientHandle;
use crate::error::DispatcherError;

/// A single request, tagged with the client that sent it and that client's
/// own correlation token.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub client: ClientHandle,
    pub serial: u64,
    pub request: Request,
}

/// Producer side of the Request Queue. Cloneable: any number of transport
/// tasks may enqueue concurrently.
#[derive(Clone)]
pub struct RequestQueueSender {
    tx: mpsc::Sender<ServerRequest>,
    capacity: usize,
}

impl RequestQueueSender {
    /// Enqueue `request`, failing immediately rather than blocking or
    /// dropping if the queue is at capacity.
    pub fn try_send(&self, request: ServerRequest) -> Result<(), DispatcherError> {
        self.tx
            .try_send(request)
            .map_err(|_| DispatcherError::QueueFull {
                queue: "request_queue",
                capacity: self.capacity,
            })
    }
}

/// Consumer side of the Request Queue; owned by the Reader.
pub struct RequestQueueReceiver {
    rx: mpsc::Receiver<ServerRequest>,
}

impl RequestQueueReceiver {
    pub async fn recv(&mut self) -> Option<ServerRequest> {
        self.rx.recv().await
    }
}

/// Construct a bounded Request Queue with the given capacity.
pub fn request_queue(capacity: usize) -> (RequestQueueSender, RequestQueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (RequestQueueSender { tx, capacity }, RequestQueueReceiver { rx })
}
