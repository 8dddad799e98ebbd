//! An in-memory stand-in for a real build engine backend.
//!
//! Real implementations would interpret `command` against a compiled
//! dependency graph; this one just understands two hardcoded commands so the
//! dispatcher core can be exercised end to end without a compiler.

use std::time::Duration;

use dispatcher_types::{
    BackendError, BuildEngineBackend, BuildState, CancelToken, Completion, CompletionLevel,
    ScopedKey, TaskDef,
};

const COMPILE_STATUS_KEY: &str = "build/status";

fn version_key() -> ScopedKey {
    ScopedKey::new(Some("build"), "version")
}

fn compile_key() -> ScopedKey {
    ScopedKey::new(None::<String>, "compile")
}

fn test_key() -> ScopedKey {
    ScopedKey::new(None::<String>, "test")
}

fn status_key() -> ScopedKey {
    ScopedKey::new(None::<String>, COMPILE_STATUS_KEY)
}

/// Initial `BuildState`: one setting (`build/version`) and two tasks
/// (`compile`, `test`), wired the way the demo binary hands them to the
/// Engine Loop before the first `take_next_work`.
pub fn initial_state() -> BuildState {
    let mut state = BuildState::default();
    state.settings.insert(version_key(), "0.1.0".to_owned());
    state.tasks.insert(
        compile_key(),
        TaskDef {
            key: compile_key(),
            command_template: "compile".to_owned(),
        },
    );
    state.tasks.insert(
        test_key(),
        TaskDef {
            key: test_key(),
            command_template: "test".to_owned(),
        },
    );
    state
}

#[derive(Debug, Default)]
pub struct DemoBackend;

impl BuildEngineBackend for DemoBackend {
    async fn execute(
        &self,
        state: &BuildState,
        command: &str,
        cancel: &CancelToken,
    ) -> Result<BuildState, BackendError> {
        match command {
            "compile" => {
                simulate_work(cancel, Duration::from_millis(50), command).await?;
                let mut next = state.clone();
                next.generation += 1;
                next.settings.insert(status_key(), "compiled".to_owned());
                Ok(next)
            }
            "test" => {
                if state.settings.get(&status_key()).map(String::as_str) != Some("compiled") {
                    return Err(BackendError::CommandFailed {
                        message: "test requires compile to have run first".to_owned(),
                    });
                }
                simulate_work(cancel, Duration::from_millis(30), command).await?;
                let mut next = state.clone();
                next.generation += 1;
                Ok(next)
            }
            other => Err(BackendError::UnknownCommand {
                command: other.to_owned(),
            }),
        }
    }

    fn resolve_key(&self, state: &BuildState, text: &str) -> Vec<ScopedKey> {
        ScopedKey::parse(text)
            .filter(|key| state.settings.contains_key(key) || state.tasks.contains_key(key))
            .into_iter()
            .collect()
    }

    fn render_task_command(&self, state: &BuildState, key: &ScopedKey) -> Option<String> {
        state.tasks.get(key).map(|task| task.command_template.clone())
    }

    fn completions(&self, state: &BuildState, line: &str, level: CompletionLevel) -> Vec<Completion> {
        let candidates = state
            .settings
            .keys()
            .chain(state.tasks.keys())
            .map(ToString::to_string)
            .filter(|candidate| candidate.starts_with(line));

        candidates
            .map(|candidate| {
                let append = candidate.strip_prefix(line).unwrap_or_default().to_owned();
                let display = match level {
                    CompletionLevel::Token => candidate,
                    CompletionLevel::Described => format!("{candidate} (demo key)"),
                };
                Completion { display, append }
            })
            .collect()
    }
}

/// Cooperatively observe `cancel` during a simulated command.
async fn simulate_work(cancel: &CancelToken, duration: Duration, command: &str) -> Result<(), BackendError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(BackendError::CommandFailed {
            message: format!("{command} cancelled"),
        }),
    }
}
