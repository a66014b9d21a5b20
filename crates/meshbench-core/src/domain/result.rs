//! Evaluation result records.

use crate::domain::level::Level;
use crate::domain::rubric::ScoreBreakdown;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Score a challenge passes at.
pub const PASS_THRESHOLD: u32 = 70;

/// Axis totals for one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scores {
    pub functionality: u32,
    pub quality: u32,
    pub total: u32,
}

impl From<&ScoreBreakdown> for Scores {
    fn from(breakdown: &ScoreBreakdown) -> Self {
        Self {
            functionality: breakdown.functionality,
            quality: breakdown.quality,
            total: breakdown.total,
        }
    }
}

/// Immutable record of one (model, level) evaluation.
///
/// The field set is stable and evolves additively only; historical
/// result stores must stay parsable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    /// Model that produced the handler source.
    pub model: String,

    /// Challenge name (e.g. `level2_counter`).
    pub challenge: String,

    /// Numeric challenge level.
    pub level: Level,

    /// Run identity.
    pub run_id: Uuid,

    /// When the evaluation finished (ISO-8601).
    pub timestamp: DateTime<Utc>,

    /// Axis totals.
    pub scores: Scores,

    /// Explicit per-criterion points; zero rows are always present.
    pub criteria: BTreeMap<String, u32>,

    /// SHA-256 of the evaluated source, for idempotence checks.
    pub source_digest: String,

    /// Where the evaluated handler source was saved, if anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_path: Option<PathBuf>,

    /// Short trace summary.
    pub test_output: String,

    /// Engine-visible errors; empty on clean runs.
    pub errors: Vec<String>,

    /// 1-based attempt number within a generation loop.
    pub attempt: u32,
}

impl ResultRecord {
    /// Whether the run met the pass threshold.
    pub fn passed(&self) -> bool {
        self.scores.total >= PASS_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rubric::{Axis, Criterion, CriterionCheck, Rubric, ScoreBreakdown};

    fn record(total: u32) -> ResultRecord {
        let rubric = Rubric::new(vec![Criterion::new(
            "loads",
            Axis::Functionality,
            total,
            CriterionCheck::Loads,
        )]);
        let breakdown = ScoreBreakdown::from_verdicts(&rubric, &[true]);
        ResultRecord {
            model: "qwen2.5-coder:1.5b".to_string(),
            challenge: Level::Echo.challenge_name(),
            level: Level::Echo,
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            scores: Scores::from(&breakdown),
            criteria: breakdown.criteria_map(),
            source_digest: "abc123".to_string(),
            handler_path: None,
            test_output: "entries=0".to_string(),
            errors: Vec::new(),
            attempt: 1,
        }
    }

    #[test]
    fn test_pass_threshold() {
        assert!(record(70).passed());
        assert!(!record(69).passed());
    }

    #[test]
    fn test_result_record_serde_roundtrip() {
        let rec = record(80);
        let json = serde_json::to_string(&rec).expect("serialize");
        let deserialized: ResultRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(rec, deserialized);
    }

    #[test]
    fn test_level_serializes_as_number_in_record() {
        let rec = record(80);
        let value = serde_json::to_value(&rec).expect("serialize");
        assert_eq!(value["level"], 1);
        assert_eq!(value["challenge"], "level1_echo");
    }
}
