//! Fixtures: declarative test units for one challenge level.

use crate::domain::message::Message;
use serde::{Deserialize, Serialize};

/// Predicate over the outbound messages of one fixture's logical
/// window. Evaluable from a recorded trace alone; never re-executes
/// candidate code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expectation {
    /// Some outbound message has this type tag.
    TypeIs { kind: String },

    /// Some outbound message of `kind` has a payload whose string form
    /// contains `needle`.
    PayloadContains { kind: String, needle: String },

    /// Some outbound message of `kind` carries exactly `value` at the
    /// dotted payload path.
    FieldEquals {
        kind: String,
        path: String,
        value: serde_json::Value,
    },

    /// Some outbound message of `kind` carries a number within
    /// `tolerance` of `value` at the dotted payload path.
    FieldWithin {
        kind: String,
        path: String,
        value: f64,
        tolerance: f64,
    },

    /// Every sub-expectation holds.
    AllOf { all: Vec<Expectation> },

    /// At least one sub-expectation holds.
    AnyOf { any: Vec<Expectation> },

    /// The window must produce no outbound messages.
    NoResponse,

    /// Delivery-only fixture; nothing is asserted.
    Unchecked,
}

impl Expectation {
    /// Evaluate against the outbound messages of a fixture window.
    pub fn matches(&self, outbound: &[&Message]) -> bool {
        match self {
            Expectation::TypeIs { kind } => outbound.iter().any(|m| &m.kind == kind),
            Expectation::PayloadContains { kind, needle } => outbound
                .iter()
                .filter(|m| &m.kind == kind)
                .any(|m| m.payload.to_string().contains(needle.as_str())),
            Expectation::FieldEquals { kind, path, value } => outbound
                .iter()
                .filter(|m| &m.kind == kind)
                .any(|m| m.payload_path(path) == Some(value)),
            Expectation::FieldWithin {
                kind,
                path,
                value,
                tolerance,
            } => outbound
                .iter()
                .filter(|m| &m.kind == kind)
                .filter_map(|m| m.payload_path(path).and_then(|v| v.as_f64()))
                .any(|actual| (actual - value).abs() <= *tolerance),
            Expectation::AllOf { all } => all.iter().all(|e| e.matches(outbound)),
            Expectation::AnyOf { any } => any.iter().any(|e| e.matches(outbound)),
            Expectation::NoResponse => outbound.is_empty(),
            Expectation::Unchecked => true,
        }
    }
}

/// A declarative test unit: ordered inbound messages, an expectation
/// over the responses, and a point weight. Zero-weight fixtures are
/// setup-only (delivered but not scored).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fixture {
    /// Stable name, used in logs and trace attribution.
    pub name: String,

    /// Messages delivered to the instance, in order.
    pub messages_in: Vec<Message>,

    /// Expected outbound behavior for this window.
    pub expected: Expectation,

    /// Point weight; zero marks a setup-only fixture.
    pub weight: u32,
}

impl Fixture {
    /// Create a fixture.
    pub fn new(
        name: impl Into<String>,
        messages_in: Vec<Message>,
        expected: Expectation,
        weight: u32,
    ) -> Self {
        Self {
            name: name.into(),
            messages_in,
            expected,
            weight,
        }
    }

    /// Whether this fixture participates in scoring.
    pub fn scored(&self) -> bool {
        self.weight > 0
    }
}
