//! A stand-in for the Client Transport collaborator: instead of
//! parsing bytes off a socket, this builds `ServerRequest`s directly and
//! feeds them into the Request Queue producer handle, logging whatever
//! comes back on the client's outbound channel. A minimal wrapper around a
//! channel pair, nothing more.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use dispatcher_core::{ClientHandle, Outbound, RequestQueueSender, ServerRequest};
use dispatcher_types::{CompletionLevel, Request, ScopedKey};

/// Drains `rx` for as long as the paired `ClientHandle` is alive, logging
/// every reply/event at `info`. Detached: it simply stops once the sender
/// side is dropped, which happens when the scripted session below ends.
fn spawn_reply_logger(label: String, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Reply { serial, response } => {
                    tracing::info!(client = %label, serial, response = ?response, "reply");
                }
                Outbound::Event(event) => {
                    tracing::info!(client = %label, event = ?event, "event");
                }
            }
        }
    });
}

/// Runs a small scripted session against `sender`, standing in for a real
/// client connection: subscribe to events, look up a key before the build
/// even needs to exist, run `compile` then `test`, listen to a task value,
/// and finally disconnect. Returns a handle the caller can await before
/// tearing the dispatcher down.
pub fn spawn_demo_session(label: &str, sender: RequestQueueSender) -> JoinHandle<()> {
    let label = label.to_owned();
    tokio::spawn(async move {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = ClientHandle::new(tx);
        spawn_reply_logger(label.clone(), rx);

        let mut serial = 0u64;
        let mut send = |request: Request| {
            serial += 1;
            let outcome = sender.try_send(ServerRequest {
                client: client.clone(),
                serial,
                request,
            });
            if let Err(err) = outcome {
                tracing::warn!(client = %label, error = %err, "demo request dropped");
            }
        };

        send(Request::ListenToEvents);
        send(Request::KeyLookup {
            text: "build/version".to_owned(),
        });
        send(Request::Execution {
            command: "compile".to_owned(),
        });
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        send(Request::ListenToValue {
            key: ScopedKey::new(None::<String>, "test"),
        });
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        send(Request::CommandCompletions {
            id: 1,
            line: "comp".to_owned(),
            level: CompletionLevel::Described,
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        send(Request::ClientClosed);
    })
}
