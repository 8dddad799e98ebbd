//! Client Handle: a per-connection façade with identity-based
//! equality, used as the `HashSet`/`HashMap` key for listener bookkeeping in
//! `ServerState` and `Work::CommandExecution::requesters`.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use dispatcher_types::{Event, Response};
use tokio::sync::mpsc;

/// Stable identity for a connected client, assigned on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

impl ClientId {
    fn next() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A message destined for one client: either a correlated reply or a
/// broadcast event. The transport collaborator drains these in order.
#[derive(Debug)]
pub enum Outbound {
    Reply { serial: u64, response: Response },
    Event(Event),
}

/// Per-connection façade. `send`/`reply` are both fire-and-forget: the
/// Reader must never stall on a slow client, so delivery backpressure is
/// pushed onto an unbounded channel here and becomes the transport's problem
/// further downstream.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ClientHandle {
    /// Wrap a fresh client identity around an outbound channel sender.
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id: ClientId::next(),
            outbound,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Fire-and-forget broadcast delivery, ordered per-client.
    pub fn send(&self, event: Event) {
        let _ = self.outbound.send(Outbound::Event(event));
    }

    /// Correlated reply to the request identified by `serial`.
    pub fn reply(&self, serial: u64, response: Response) {
        let _ = self.outbound.send(Outbound::Reply { serial, response });
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientHandle {}

impl Hash for ClientHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
