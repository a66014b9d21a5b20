//! Domain models for Meshbench.
//!
//! Canonical definitions for the core entities:
//! - `Message` / `Role`: the protocol vocabulary
//! - `Fixture` / `Expectation`: declarative test units
//! - `Level`: the five challenges with their static catalogs
//! - `Trace`: recorded interaction history of one run
//! - `Rubric` / `ScoreBreakdown`: data-driven scoring
//! - `ResultRecord`: the immutable evaluation output

pub mod error;
pub mod fixture;
pub mod level;
pub mod message;
pub mod result;
pub mod rubric;
pub mod trace;

// Re-export main types and errors
pub use error::{HarnessError, LoadError, Result};
pub use fixture::{Expectation, Fixture};
pub use level::Level;
pub use message::{Message, Role};
pub use result::{ResultRecord, Scores, PASS_THRESHOLD};
pub use rubric::{Axis, Criterion, CriterionCheck, CriterionScore, Rubric, ScoreBreakdown};
pub use trace::{Trace, TraceEntry, TraceKind};
