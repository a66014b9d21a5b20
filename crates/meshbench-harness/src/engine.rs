//! Challenge evaluation orchestration.
//!
//! Composes the simulator and scoring into a single `evaluate` call
//! that always produces a complete `ResultRecord`. Candidate faults
//! are scorable outcomes and never retried; only infrastructure
//! faults get bounded retries before the run is surfaced as a zero
//! score with errors.

use crate::sandbox::HandlerSandbox;
use crate::scoring;
use crate::simulator::{ProtocolSimulator, SourceSet};
use meshbench_core::domain::{Level, ResultRecord, ScoreBreakdown, Scores, Trace, TraceKind};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retries allowed on infrastructure faults (not candidate
    /// faults) before giving up on the run.
    pub max_infra_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_infra_retries: 2,
        }
    }
}

/// The challenge evaluation engine.
pub struct ChallengeEngine {
    sandbox: Arc<dyn HandlerSandbox>,
    simulator: ProtocolSimulator,
    config: EngineConfig,
}

impl ChallengeEngine {
    /// Engine with default simulator and retry configuration.
    pub fn new(sandbox: Arc<dyn HandlerSandbox>) -> Self {
        Self {
            sandbox,
            simulator: ProtocolSimulator::new(),
            config: EngineConfig::default(),
        }
    }

    /// Engine with explicit configuration.
    pub fn with_config(
        sandbox: Arc<dyn HandlerSandbox>,
        simulator: ProtocolSimulator,
        config: EngineConfig,
    ) -> Self {
        Self {
            sandbox,
            simulator,
            config,
        }
    }

    /// Evaluate one (model, level) pair. Always returns a complete
    /// record: a run that cannot even start scores zero with its
    /// errors populated. Deterministic for identical sources and
    /// environment.
    pub async fn evaluate(&self, model: &str, level: Level, sources: &SourceSet) -> ResultRecord {
        let source_digest = digest_sources(sources);
        let mut errors: Vec<String> = Vec::new();
        let mut trace: Option<Trace> = None;

        for attempt in 0..=self.config.max_infra_retries {
            match self
                .simulator
                .run_level(self.sandbox.as_ref(), sources, level)
                .await
            {
                Ok(t) => {
                    trace = Some(t);
                    break;
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_infra_retries => {
                    warn!(model, level = %level, attempt, error = %e, "retrying after infrastructure fault");
                    errors.push(e.to_string());
                }
                Err(e) => {
                    errors.push(e.to_string());
                    break;
                }
            }
        }

        let record = match trace {
            Some(trace) => {
                if let Some(detail) = load_failure_detail(&trace) {
                    errors.push(detail);
                }
                let breakdown = scoring::score(&trace, level);
                info!(
                    model,
                    level = %level,
                    total = breakdown.total,
                    "evaluation scored"
                );
                build_record(
                    model,
                    level,
                    trace.run_id,
                    &breakdown,
                    source_digest,
                    trace.summary(),
                    errors,
                )
            }
            None => {
                let breakdown = ScoreBreakdown::zeroed(&level.rubric());
                warn!(model, level = %level, "evaluation aborted; recording zero score");
                build_record(
                    model,
                    level,
                    Uuid::new_v4(),
                    &breakdown,
                    source_digest,
                    "run aborted before a trace was produced".to_string(),
                    errors,
                )
            }
        };

        record
    }
}

fn build_record(
    model: &str,
    level: Level,
    run_id: Uuid,
    breakdown: &ScoreBreakdown,
    source_digest: String,
    test_output: String,
    errors: Vec<String>,
) -> ResultRecord {
    ResultRecord {
        model: model.to_string(),
        challenge: level.challenge_name(),
        level,
        run_id,
        timestamp: chrono::Utc::now(),
        scores: Scores::from(breakdown),
        criteria: breakdown.criteria_map(),
        source_digest,
        handler_path: None,
        test_output,
        errors,
        attempt: 1,
    }
}

fn load_failure_detail(trace: &Trace) -> Option<String> {
    trace.entries().iter().find_map(|e| match &e.kind {
        TraceKind::LoadFailed { detail } => Some(format!("load failed: {detail}")),
        _ => None,
    })
}

/// Deterministic digest over the role-ordered sources.
fn digest_sources(sources: &SourceSet) -> String {
    let mut hasher = Sha256::new();
    for (role, source) in sources.ordered() {
        hasher.update(role.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(source.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
