//! Meshbench Core Library
//!
//! Domain data model for the Meshbench challenge harness: messages,
//! fixtures, levels, traces, rubrics, and result records. Pure data
//! and pure functions; all execution behavior lives in
//! `meshbench-harness`.

pub mod domain;

pub use domain::{
    Axis, Criterion, CriterionCheck, CriterionScore, Expectation, Fixture, HarnessError, Level,
    LoadError, Message, Result, ResultRecord, Role, Rubric, ScoreBreakdown, Scores, Trace,
    TraceEntry, TraceKind, PASS_THRESHOLD,
};

/// Meshbench version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
