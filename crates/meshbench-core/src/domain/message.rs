//! Protocol messages and handler roles.

use serde::{Deserialize, Serialize};

/// Role a handler instance plays within one evaluation run.
///
/// Single-handler levels (1-4) use only `Source`. Level 5 instantiates
/// one handler per role and relays messages between them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The primary handler under evaluation.
    Source,

    /// The synchronization coordinator (level 5 only).
    Sync,
}

impl Role {
    /// Declaration order. Same-tick events are processed and recorded
    /// in this order, which makes level-5 traces reproducible.
    pub const ORDERED: [Role; 2] = [Role::Source, Role::Sync];

    /// Stable string form, used in scratch paths and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Sync => "sync",
        }
    }
}

/// A single message exchanged with a handler.
///
/// Immutable once constructed; the engine never mutates a message after
/// recording it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Message type tag (e.g. `echo`, `stats_response`).
    #[serde(rename = "type")]
    pub kind: String,

    /// Arbitrary payload.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Originating node id, when the sender declared one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl Message {
    /// Create a message with no declared sender.
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            from: None,
        }
    }

    /// Attach a sender node id.
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Resolve a dotted path (e.g. `by_type.chat`) inside the payload.
    pub fn payload_path(&self, path: &str) -> Option<&serde_json::Value> {
        let mut current = &self.payload;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }
}
