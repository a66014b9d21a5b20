//! Generation-and-evaluation loop for one (model, level) pair.
//!
//! Asks the model for a handler, evaluates it, and retries up to a
//! bounded number of attempts, keeping the best result. Generation
//! retries are about model output quality; they are unrelated to the
//! engine's infrastructure retries.

use crate::engine::ChallengeEngine;
use crate::model::{extract_code, ModelClient};
use crate::report;
use crate::simulator::SourceSet;
use meshbench_core::domain::{HarnessError, Level, Result, ResultRecord, PASS_THRESHOLD};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Challenge loop configuration.
#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    /// Generation attempts per challenge.
    pub max_attempts: u32,

    /// Where generated handlers are saved, per model and challenge.
    pub output_dir: PathBuf,

    /// Results file every attempt is appended to.
    pub results_path: PathBuf,

    /// Stop early once an attempt reaches this score.
    pub pass_threshold: u32,

    /// Prompt template file overriding the built-in level briefs.
    pub prompt_path: Option<PathBuf>,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            output_dir: PathBuf::from("generated"),
            results_path: PathBuf::from("evaluation/results.json"),
            pass_threshold: PASS_THRESHOLD,
            prompt_path: None,
        }
    }
}

/// Runs generation challenges against a live model endpoint.
pub struct ChallengeRunner {
    engine: ChallengeEngine,
    client: Arc<dyn ModelClient>,
    config: ChallengeConfig,
}

impl ChallengeRunner {
    pub fn new(engine: ChallengeEngine, client: Arc<dyn ModelClient>) -> Self {
        Self {
            engine,
            client,
            config: ChallengeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ChallengeConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one challenge, returning the best attempt's record.
    pub async fn run(&self, model: &str, level: Level) -> Result<ResultRecord> {
        let challenge = level.challenge_name();
        let model_dir = self
            .config
            .output_dir
            .join(model.replace(':', "_"))
            .join(&challenge);
        std::fs::create_dir_all(&model_dir)?;

        info!(model, %challenge, attempts = self.config.max_attempts, "starting challenge");

        let prompt = match &self.config.prompt_path {
            Some(path) => std::fs::read_to_string(path)?,
            None => level_prompt(level),
        };
        let mut best: Option<ResultRecord> = None;

        for attempt in 1..=self.config.max_attempts {
            info!(model, %challenge, attempt, "generating handler");
            let response = self.client.generate(model, &prompt).await?;
            let source = extract_code(&response);

            let handler_path = model_dir.join(format!("handler_attempt{attempt}.py"));
            std::fs::write(&handler_path, &source)?;

            let sources = SourceSet::for_level(level, &source);
            let mut record = self.engine.evaluate(model, level, &sources).await;
            record.attempt = attempt;
            record.handler_path = Some(handler_path);
            report::append_result(&self.config.results_path, &record)?;

            let total = record.scores.total;
            info!(model, %challenge, attempt, total, "attempt scored");

            let improved = best
                .as_ref()
                .map(|b| total > b.scores.total)
                .unwrap_or(true);
            if improved {
                best = Some(record);
            }
            if total >= self.config.pass_threshold {
                break;
            }
            if attempt < self.config.max_attempts {
                warn!(model, %challenge, total, "score below threshold; retrying");
            }
        }

        let best = best.ok_or_else(|| {
            HarnessError::Infrastructure("challenge loop executed no attempts".to_string())
        })?;

        // Keep the best handler under a stable name.
        if let Some(path) = &best.handler_path {
            let final_path = model_dir.join("handler.py");
            std::fs::copy(path, final_path)?;
        }

        info!(
            model,
            %challenge,
            best = best.scores.total,
            passed = best.passed(),
            "challenge finished"
        );
        Ok(best)
    }

    /// Run all five levels in order.
    pub async fn run_all(&self, model: &str) -> Result<Vec<ResultRecord>> {
        let mut records = Vec::new();
        for level in Level::ALL {
            records.push(self.run(model, level).await?);
        }
        Ok(records)
    }
}

/// Built-in prompt brief per level. Callers with tuned prompt
/// templates pass their own text to the model client instead.
pub fn level_prompt(level: Level) -> String {
    let convention = "\
Write a Python message handler for a mesh network node.
Rules:
- Define a class whose name ends with `Handler`, constructed with the node: `def __init__(self, node)`.
- Implement `async def process(self, message)` taking a dict like {\"type\": ..., \"payload\": ..., \"from\": ...}.
- Return a response dict {\"type\": ..., \"payload\": ...} or None for messages you ignore.
- For periodic work, implement `async def on_tick(self, seconds)` and return a message dict (or list of them).
- Use `await self.node.broadcast(message)` to broadcast.
Return only Python code.\n\n";

    let task = match level {
        Level::Echo => {
            "Task: respond to messages of type \"echo\" with type \"echo_response\" whose \
payload is \"ECHO: \" followed by the original payload. Ignore every other message type."
        }
        Level::Counter => {
            "Task: count every incoming message by type. On a message of type \"stats\", respond \
with type \"stats_response\" and payload {\"total_messages\": N, \"by_type\": {type: count}}. \
Every 30 seconds of tick time, broadcast a message of type \"counter_broadcast\" with the \
current totals."
        }
        Level::Collector => {
            "Task: on messages of type \"collect\", store the payload item, append it to a JSON \
file named \"collection.json\" in the current directory, and respond with type \"collect_ack\". \
On type \"query\", respond with type \"collection_response\" and the full list of stored items."
        }
        Level::Executor => {
            "Task: on messages of type \"execute\", run the command named in payload[\"command\"] \
via `self.node.run_command(command, args)` and respond with type \"command_result\" and payload \
{\"success\": ..., \"return_code\": ..., \"output\": ...}. Only these commands are allowed: ls, \
date, uptime, df, free, hostname, pwd, echo. Refuse anything else yourself with \
{\"success\": false} and do not call run_command for it."
        }
        Level::Sync => {
            "Task: implement state synchronization. As a source node, answer messages of type \
\"sync_request\" with type \"sync_response\" and payload {\"metrics\": {\"cpu\": ..., \
\"memory\": ...}}. As a sync node, broadcast a \"sync_request\" from on_tick, collect \
\"sync_response\" messages, and broadcast \"sync_complete\" with payload {\"nodes\": N, \
\"avg_cpu\": mean cpu, \"avg_memory\": mean memory}."
        }
    };

    format!("{convention}{task}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{emit, ScriptedInstance, ScriptedSandbox};
    use crate::sandbox::DeliverOutcome;
    use async_trait::async_trait;
    use meshbench_core::domain::{Message, Role};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted model: returns canned responses in sequence.
    struct ScriptedModel {
        responses: Vec<String>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn generate(&self, _model: &str, _prompt: &str) -> Result<String> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            Ok(self
                .responses
                .get(idx.min(self.responses.len() - 1))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn echo_engine() -> ChallengeEngine {
        let sandbox = Arc::new(ScriptedSandbox::new().with_role(Role::Source, || {
            ScriptedInstance::new(
                Box::new(|msg| {
                    if msg.kind == "echo" {
                        emit(vec![Message::new(
                            "echo_response",
                            json!(format!("ECHO: {}", msg.payload.as_str().unwrap_or(""))),
                        )])
                    } else {
                        DeliverOutcome::default()
                    }
                }),
                Box::new(|_| DeliverOutcome::default()),
            )
        }));
        ChallengeEngine::new(sandbox)
    }

    fn config_in(dir: &std::path::Path) -> ChallengeConfig {
        ChallengeConfig {
            max_attempts: 3,
            output_dir: dir.join("generated"),
            results_path: dir.join("evaluation/results.json"),
            pass_threshold: PASS_THRESHOLD,
            prompt_path: None,
        }
    }

    #[tokio::test]
    async fn test_challenge_stops_after_passing_attempt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = Arc::new(ScriptedModel {
            responses: vec!["```python\nclass EchoHandler: ...\n```".to_string()],
            calls: AtomicU32::new(0),
        });
        let runner =
            ChallengeRunner::new(echo_engine(), client.clone()).with_config(config_in(dir.path()));

        let record = runner.run("test-model", Level::Echo).await.expect("run");

        assert!(record.passed());
        assert_eq!(record.attempt, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        // The best handler is kept under a stable name.
        let final_path = dir
            .path()
            .join("generated/test-model/level1_echo/handler.py");
        assert!(final_path.exists());

        // Every attempt was appended to the results file.
        let results =
            report::load_results(&dir.path().join("evaluation/results.json")).expect("results");
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_challenge_keeps_best_of_failing_attempts() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Every attempt fails the shape check; the loop exhausts all
        // attempts and still returns a record.
        let client = Arc::new(ScriptedModel {
            responses: vec!["#reject-shape".to_string()],
            calls: AtomicU32::new(0),
        });
        let runner =
            ChallengeRunner::new(echo_engine(), client.clone()).with_config(config_in(dir.path()));

        let record = runner.run("test-model", Level::Echo).await.expect("run");

        assert!(!record.passed());
        assert_eq!(record.scores.total, 0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);

        let results =
            report::load_results(&dir.path().join("evaluation/results.json")).expect("results");
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_prompts_name_the_required_message_types() {
        assert!(level_prompt(Level::Echo).contains("echo_response"));
        assert!(level_prompt(Level::Counter).contains("stats_response"));
        assert!(level_prompt(Level::Collector).contains("collection_response"));
        assert!(level_prompt(Level::Executor).contains("command_result"));
        assert!(level_prompt(Level::Sync).contains("sync_complete"));
    }
}
