//! Rubrics: weighted criteria that convert a trace into a score.
//!
//! Criteria are data, not code paths: each names a pure check, an
//! axis, and a point weight. New levels and criteria are additive.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scoring axis a criterion belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Functionality,
    Quality,
}

/// Pure checks a criterion can apply to a finalized trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CriterionCheck {
    /// The instance activated and never recorded a load failure.
    Loads,

    /// Every scored fixture's expectation holds within its window.
    ProcessesAll,

    /// Emitted messages all carry a non-empty type tag.
    WellFormed,

    /// The stats response counts equal those derived from the
    /// delivered messages.
    StatsAccuracy,

    /// Periodic broadcasts of `kind` were observed at least
    /// `min_count` times after tick advances.
    BroadcastObserved { kind: String, min_count: usize },

    /// At least one scratch-directory side effect was recorded.
    PersistenceEvidence,

    /// At least one mediated command completed successfully.
    CommandEvidence,

    /// No security violations were recorded.
    Safety,

    /// No runtime faults, timeouts, or incomplete sync rounds.
    Resilient,

    /// A sync_request / sync_response / sync_complete round trip
    /// completed, in order, within the tick budget.
    SyncRoundTrip { within_ticks: u64 },

    /// The aggregate field of the completion message equals the mean
    /// of the sampled per-node values within tolerance.
    AggregateWithin {
        sample_kind: String,
        sample_path: String,
        aggregate_kind: String,
        aggregate_path: String,
        tolerance: f64,
    },

    /// Both roles emitted at least one message (level-5 liveness).
    BothRolesEmitted,
}

/// One named, weighted criterion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Criterion {
    /// Stable name (e.g. `loads`, `safety`), used in breakdowns.
    pub name: String,

    /// Which axis the points count toward.
    pub axis: Axis,

    /// Points awarded if the check holds for all applicable fixtures.
    /// All-or-nothing; there is no fractional credit within a
    /// criterion.
    pub weight: u32,

    /// The pure check to evaluate.
    pub check: CriterionCheck,
}

impl Criterion {
    /// Create a criterion.
    pub fn new(name: &str, axis: Axis, weight: u32, check: CriterionCheck) -> Self {
        Self {
            name: name.to_string(),
            axis,
            weight,
            check,
        }
    }
}

/// The full criteria set for one level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rubric {
    pub criteria: Vec<Criterion>,
}

impl Rubric {
    /// Create a rubric from its criteria.
    pub fn new(criteria: Vec<Criterion>) -> Self {
        Self { criteria }
    }

    /// Maximum points on the functionality axis.
    pub fn functionality_max(&self) -> u32 {
        self.axis_max(Axis::Functionality)
    }

    /// Maximum points on the quality axis.
    pub fn quality_max(&self) -> u32 {
        self.axis_max(Axis::Quality)
    }

    fn axis_max(&self, axis: Axis) -> u32 {
        self.criteria
            .iter()
            .filter(|c| c.axis == axis)
            .map(|c| c.weight)
            .sum()
    }

    /// Check the invariant that axis maxima sum to exactly 100.
    pub fn validate(&self) -> Result<(), String> {
        let total = self.functionality_max() + self.quality_max();
        if total != 100 {
            return Err(format!("rubric weights sum to {total}, expected 100"));
        }
        Ok(())
    }
}

/// Awarded points for one criterion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionScore {
    pub name: String,
    pub axis: Axis,
    pub weight: u32,
    pub points: u32,
}

/// Complete score breakdown for one run. Always fully populated:
/// a run that never loads still carries an explicit zero row for
/// every criterion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub criteria: Vec<CriterionScore>,

    /// Sum of awarded functionality points.
    pub functionality: u32,

    /// Sum of awarded quality points.
    pub quality: u32,

    /// Functionality + quality, capped at 100.
    pub total: u32,
}

impl ScoreBreakdown {
    /// Build a breakdown from per-criterion verdicts.
    pub fn from_verdicts(rubric: &Rubric, verdicts: &[bool]) -> Self {
        let criteria: Vec<CriterionScore> = rubric
            .criteria
            .iter()
            .zip(verdicts)
            .map(|(c, held)| CriterionScore {
                name: c.name.clone(),
                axis: c.axis,
                weight: c.weight,
                points: if *held { c.weight } else { 0 },
            })
            .collect();

        let functionality = criteria
            .iter()
            .filter(|c| c.axis == Axis::Functionality)
            .map(|c| c.points)
            .sum::<u32>();
        let quality = criteria
            .iter()
            .filter(|c| c.axis == Axis::Quality)
            .map(|c| c.points)
            .sum::<u32>();
        let total = (functionality + quality).min(100);

        Self {
            criteria,
            functionality,
            quality,
            total,
        }
    }

    /// An all-zero breakdown with a row per criterion.
    pub fn zeroed(rubric: &Rubric) -> Self {
        let verdicts = vec![false; rubric.criteria.len()];
        Self::from_verdicts(rubric, &verdicts)
    }

    /// Name-to-points map for result records.
    pub fn criteria_map(&self) -> BTreeMap<String, u32> {
        self.criteria
            .iter()
            .map(|c| (c.name.clone(), c.points))
            .collect()
    }
}
