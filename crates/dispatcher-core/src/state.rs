//! Server State: immutable, copy-on-write listener bookkeeping owned
//! exclusively by the Reader. No other task ever touches it, so unlike the
//! Engine State Ref there is nothing here that needs a cross-task
//! synchronization primitive — "publication" is just replacing a local
//! `ServerState` binding with the new value the next mutator returns.

use std::collections::{HashMap, HashSet};

use dispatcher_types::ScopedKey;

use crate::client::ClientHandle;

/// Listener bookkeeping, independent of `BuildState`.
#[derive(Debug, Clone, Default)]
pub struct ServerState {
    event_listeners: HashSet<ClientHandle>,
    build_listeners: HashSet<ClientHandle>,
    key_listeners: HashMap<ScopedKey, HashSet<ClientHandle>>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_listeners(&self) -> impl Iterator<Item = &ClientHandle> {
        self.event_listeners.iter()
    }

    pub fn key_listeners(&self, key: &ScopedKey) -> impl Iterator<Item = &ClientHandle> {
        self.key_listeners.get(key).into_iter().flatten()
    }

    pub fn build_listeners(&self) -> impl Iterator<Item = &ClientHandle> {
        self.build_listeners.iter()
    }

    pub fn listened_keys(&self) -> impl Iterator<Item = &ScopedKey> {
        self.key_listeners.keys()
    }

    pub fn is_event_listener(&self, client: &ClientHandle) -> bool {
        self.event_listeners.contains(client)
    }

    pub fn is_build_listener(&self, client: &ClientHandle) -> bool {
        self.build_listeners.contains(client)
    }

    pub fn is_key_listener(&self, key: &ScopedKey, client: &ClientHandle) -> bool {
        self.key_listeners
            .get(key)
            .is_some_and(|set| set.contains(client))
    }

    /// Add `client` to the event listener set. Idempotent.
    #[must_use]
    pub fn add_event_listener(mut self, client: ClientHandle) -> Self {
        self.event_listeners.insert(client);
        self
    }

    #[must_use]
    pub fn add_build_listener(mut self, client: ClientHandle) -> Self {
        self.build_listeners.insert(client);
        self
    }

    #[must_use]
    pub fn add_key_listener(mut self, client: ClientHandle, key: ScopedKey) -> Self {
        self.key_listeners.entry(key).or_default().insert(client);
        self
    }

    /// Remove `client` from every listener set.
    #[must_use]
    pub fn disconnect(mut self, client: &ClientHandle) -> Self {
        self.event_listeners.remove(client);
        self.build_listeners.remove(client);
        for listeners in self.key_listeners.values_mut() {
            listeners.remove(client);
        }
        self.key_listeners.retain(|_, listeners| !listeners.is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatcher_types::ScopedKey;
    use tokio::sync::mpsc;

    fn client() -> ClientHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        ClientHandle::new(tx)
    }

    #[test]
    fn add_event_listener_is_idempotent() {
        let c = client();
        let state = ServerState::new()
            .add_event_listener(c.clone())
            .add_event_listener(c.clone());
        assert!(state.is_event_listener(&c));
        assert_eq!(state.event_listeners().count(), 1);
    }

    #[test]
    fn disconnect_removes_from_every_set() {
        let c = client();
        let key = ScopedKey::new(None::<String>, "compile");
        let state = ServerState::new()
            .add_event_listener(c.clone())
            .add_build_listener(c.clone())
            .add_key_listener(c.clone(), key.clone());

        assert!(state.is_event_listener(&c));
        assert!(state.is_build_listener(&c));
        assert!(state.is_key_listener(&key, &c));

        let state = state.disconnect(&c);
        assert!(!state.is_event_listener(&c));
        assert!(!state.is_build_listener(&c));
        assert!(!state.is_key_listener(&key, &c));
    }

    #[test]
    fn disconnect_does_not_affect_other_clients() {
        let a = client();
        let b = client();
        let state = ServerState::new()
            .add_event_listener(a.clone())
            .add_event_listener(b.clone())
            .disconnect(&a);

        assert!(!state.is_event_listener(&a));
        assert!(state.is_event_listener(&b));
    }

    #[test]
    fn mutators_are_copy_on_write() {
        let c = client();
        let before = ServerState::new();
        let after = before.clone().add_event_listener(c.clone());
        assert!(!before.is_event_listener(&c));
        assert!(after.is_event_listener(&c));
    }
}
