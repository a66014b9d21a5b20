//! In-memory fakes for deterministic simulator and engine tests.
//!
//! `ScriptedSandbox` builds scripted handler instances per role so
//! tests can exercise the simulator, scoring, and orchestrator without
//! spawning processes. Load outcomes are steered by markers in the
//! source text: `#reject-shape` and `#reject-syntax` produce the
//! corresponding rejections.

use crate::sandbox::{DeliverOutcome, HandlerInstance, HandlerSandbox, LoadResult};
use async_trait::async_trait;
use meshbench_core::domain::{HarnessError, LoadError, Message, Result, Role};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

type DeliverFn = Box<dyn FnMut(&Message) -> DeliverOutcome + Send>;
type TickFn = Box<dyn FnMut(u64) -> DeliverOutcome + Send>;
type InstanceFactory = Box<dyn Fn() -> ScriptedInstance + Send + Sync>;

/// A scripted handler instance driven by closures.
pub struct ScriptedInstance {
    on_deliver: DeliverFn,
    on_tick: TickFn,
    side_effects: Vec<(String, u64)>,
    pub terminated: bool,
}

impl ScriptedInstance {
    /// Instance with explicit deliver and tick behavior.
    pub fn new(on_deliver: DeliverFn, on_tick: TickFn) -> Self {
        Self {
            on_deliver,
            on_tick,
            side_effects: Vec::new(),
            terminated: false,
        }
    }

    /// Instance that never emits anything.
    pub fn silent() -> Self {
        Self::new(
            Box::new(|_| DeliverOutcome::default()),
            Box::new(|_| DeliverOutcome::default()),
        )
    }

    /// Attach scratch-file evidence reported after the run.
    pub fn with_side_effects(mut self, effects: Vec<(String, u64)>) -> Self {
        self.side_effects = effects;
        self
    }
}

#[async_trait]
impl HandlerInstance for ScriptedInstance {
    async fn deliver(&mut self, message: &Message) -> Result<DeliverOutcome> {
        Ok((self.on_deliver)(message))
    }

    async fn tick(&mut self, seconds: u64) -> Result<DeliverOutcome> {
        Ok((self.on_tick)(seconds))
    }

    fn side_effects(&self) -> Vec<(String, u64)> {
        self.side_effects.clone()
    }

    async fn terminate(&mut self) {
        self.terminated = true;
    }
}

/// Sandbox producing scripted instances per role.
#[derive(Default)]
pub struct ScriptedSandbox {
    factories: Mutex<HashMap<Role, InstanceFactory>>,
    infra_failures_remaining: AtomicU32,
    loads: AtomicU32,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the instance factory for a role. Factories are reused
    /// across loads, so repeated evaluations stay possible.
    pub fn with_role(
        self,
        role: Role,
        factory: impl Fn() -> ScriptedInstance + Send + Sync + 'static,
    ) -> Self {
        self.factories
            .lock()
            .expect("factories lock")
            .insert(role, Box::new(factory));
        self
    }

    /// Make the first `n` loads fail with an infrastructure fault.
    pub fn failing_first(self, n: u32) -> Self {
        self.infra_failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// How many loads were attempted (including failed ones).
    pub fn load_count(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HandlerSandbox for ScriptedSandbox {
    async fn load(&self, source: &str, role: Role) -> Result<LoadResult> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        if self
            .infra_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(HarnessError::Infrastructure(
                "scripted infrastructure fault".to_string(),
            ));
        }

        if source.contains("#reject-shape") {
            return Ok(LoadResult::Rejected(LoadError::MissingRequiredShape(
                "scripted shape rejection".to_string(),
            )));
        }
        if source.contains("#reject-syntax") {
            return Ok(LoadResult::Rejected(LoadError::Syntax(
                "scripted syntax rejection".to_string(),
            )));
        }

        let factories = self.factories.lock().expect("factories lock");
        match factories.get(&role) {
            Some(factory) => Ok(LoadResult::Ready(Box::new(factory()))),
            None => Ok(LoadResult::Rejected(LoadError::MissingRequiredShape(
                format!("no scripted handler for role {}", role.as_str()),
            ))),
        }
    }
}

/// Outcome helper: emit the given messages.
pub fn emit(messages: Vec<Message>) -> DeliverOutcome {
    DeliverOutcome {
        emitted: messages,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_roundtrip() {
        let sandbox = ScriptedSandbox::new().with_role(Role::Source, || {
            ScriptedInstance::new(
                Box::new(|msg| {
                    emit(vec![Message::new(
                        "echo_response",
                        json!(format!("ECHO: {}", msg.payload.as_str().unwrap_or(""))),
                    )])
                }),
                Box::new(|_| DeliverOutcome::default()),
            )
        });

        let LoadResult::Ready(mut instance) =
            sandbox.load("source", Role::Source).await.expect("load")
        else {
            panic!("expected ready instance");
        };

        let outcome = instance
            .deliver(&Message::new("echo", json!("Hello")))
            .await
            .expect("deliver");
        assert_eq!(outcome.emitted[0].payload, json!("ECHO: Hello"));
    }

    #[tokio::test]
    async fn test_failing_first_counts_down() {
        let sandbox = ScriptedSandbox::new()
            .with_role(Role::Source, ScriptedInstance::silent)
            .failing_first(1);

        assert!(sandbox.load("s", Role::Source).await.is_err());
        assert!(sandbox.load("s", Role::Source).await.is_ok());
        assert_eq!(sandbox.load_count(), 2);
    }

    #[tokio::test]
    async fn test_marker_rejections() {
        let sandbox = ScriptedSandbox::new().with_role(Role::Source, ScriptedInstance::silent);

        let result = sandbox.load("#reject-shape", Role::Source).await.expect("load");
        assert!(matches!(
            result,
            LoadResult::Rejected(LoadError::MissingRequiredShape(_))
        ));

        let result = sandbox
            .load("#reject-syntax", Role::Source)
            .await
            .expect("load");
        assert!(matches!(result, LoadResult::Rejected(LoadError::Syntax(_))));
    }
}
