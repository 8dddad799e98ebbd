//! Engine State Ref: the Engine publishes a fresh `BuildState` after
//! every command; the Reader reads the latest published value to answer
//! `KeyLookup`/`ListenToValue`/`CommandCompletions` without ever blocking on
//! the Engine. Null until the first publish.

use dispatcher_types::BuildState;
use tokio::sync::watch;

/// Single-writer handle, owned by the Engine.
#[derive(Clone)]
pub struct EngineStateWriter {
    tx: watch::Sender<Option<BuildState>>,
}

impl EngineStateWriter {
    /// Publish `state` as the latest value. Never blocks: a `watch` channel
    /// only ever keeps the most recent value, so a reader that is slow (or
    /// absent) cannot make this back up.
    pub fn publish(&self, state: BuildState) {
        // `send` only errs when every receiver has been dropped, which is
        // not possible here since `EngineStateRef` holds one permanently.
        let _ = self.tx.send(Some(state));
    }
}

/// Single-reader handle, owned by the Reader. Cheap to clone for tests, but
/// in the running dispatcher exactly one task ever constructs and keeps one.
#[derive(Clone)]
pub struct EngineStateReader {
    rx: watch::Receiver<Option<BuildState>>,
}

impl EngineStateReader {
    /// A clone of the latest published `BuildState`, or `None` before the
    /// first publish. Never awaits the Engine.
    pub fn current(&self) -> Option<BuildState> {
        self.rx.borrow().clone()
    }

    /// Wait for the next publish after the last one observed by this
    /// handle. Used by the Reader's steady-state loop to notice a new
    /// generation without polling.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Construct a fresh Engine State Ref, null until the Engine's first publish.
pub fn engine_state_ref() -> (EngineStateWriter, EngineStateReader) {
    let (tx, rx) = watch::channel(None);
    (EngineStateWriter { tx }, EngineStateReader { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatcher_types::ScopedKey;

    #[test]
    fn reader_sees_nothing_before_any_publish() {
        let (_writer, reader) = engine_state_ref();
        assert!(reader.current().is_none());
    }

    #[test]
    fn publish_is_visible_to_an_existing_reader_without_blocking() {
        let (writer, reader) = engine_state_ref();
        let mut next = BuildState::default();
        next.generation = 1;
        next.settings
            .insert(ScopedKey::new(None::<String>, "x"), "1".into());
        writer.publish(next);

        let seen = reader.current().unwrap();
        assert_eq!(seen.generation, 1);
        assert_eq!(
            seen.settings.get(&ScopedKey::new(None::<String>, "x")),
            Some(&"1".to_string())
        );
    }

    #[test]
    fn later_publishes_overwrite_earlier_ones() {
        let (writer, reader) = engine_state_ref();
        let mut gen1 = BuildState::default();
        gen1.generation = 1;
        let mut gen2 = BuildState::default();
        gen2.generation = 2;

        writer.publish(gen1);
        writer.publish(gen2);
        assert_eq!(reader.current().unwrap().generation, 2);
    }

    #[tokio::test]
    async fn changed_resolves_after_a_publish() {
        let (writer, mut reader) = engine_state_ref();
        let writer_task = tokio::spawn(async move {
            tokio::task::yield_now().await;
            writer.publish(BuildState::default());
        });
        assert!(reader.changed().await);
        writer_task.await.unwrap();
    }
}
