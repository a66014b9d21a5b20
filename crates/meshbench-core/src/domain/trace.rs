//! Recorded interaction traces.
//!
//! A `Trace` is the append-only history of one evaluation run. The
//! simulator owns it while the run is live; scoring receives it
//! read-only afterwards. Every rubric criterion is a pure function of
//! the finalized trace, so a persisted trace alone reproduces a score.

use crate::domain::message::{Message, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of one trace entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceKind {
    /// The instance loaded and acknowledged activation.
    Activated,

    /// An inbound message was delivered to the instance. `fixture` is
    /// absent for messages relayed from the peer role in level 5.
    Delivered {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fixture: Option<usize>,
        message: Message,
    },

    /// The instance emitted an outbound message.
    Emitted { message: Message },

    /// The instance's logical clock advanced.
    TickAdvanced { seconds: u64 },

    /// A mediated command ran on the instance's behalf (level 4).
    CommandExecuted {
        command: String,
        return_code: i32,
        execution_time_ms: u64,
    },

    /// A file the instance left in its scratch directory (level 3).
    SideEffect { path: String, bytes: u64 },

    /// Candidate code raised during message handling.
    RuntimeFault {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fixture: Option<usize>,
        detail: String,
    },

    /// Candidate code exceeded its delivery deadline.
    TimedOut {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fixture: Option<usize>,
        deadline_ms: u64,
    },

    /// Candidate code attempted a disallowed capability.
    SecurityViolation { detail: String },

    /// A level-5 sync round did not complete within its tick budget.
    SyncRoundIncomplete { deadline_ticks: u64 },

    /// The handler source failed to load; terminal for the run.
    LoadFailed { detail: String },
}

/// A single entry in a run's trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEntry {
    /// Monotonically increasing logical timestamp within the run.
    pub seq: u64,

    /// Simulated tick at which the entry was recorded.
    pub tick: u64,

    /// Which instance the entry belongs to.
    pub role: Role,

    /// What happened.
    pub kind: TraceKind,
}

/// Append-only trace of one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trace {
    /// Run this trace belongs to.
    pub run_id: Uuid,

    entries: Vec<TraceEntry>,

    next_seq: u64,
}

impl Trace {
    /// Create an empty trace for a run.
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            entries: Vec::new(),
            next_seq: 1,
        }
    }

    /// Append an entry, assigning the next logical timestamp.
    pub fn record(&mut self, tick: u64, role: Role, kind: TraceKind) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(TraceEntry {
            seq,
            tick,
            role,
            kind,
        });
        seq
    }

    /// All entries, in recording order.
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Whether the run terminated with a load failure.
    pub fn load_failed(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.kind, TraceKind::LoadFailed { .. }))
    }

    /// Candidate faults recorded across the run: runtime faults,
    /// timeouts, and incomplete sync rounds.
    pub fn fault_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    TraceKind::RuntimeFault { .. }
                        | TraceKind::TimedOut { .. }
                        | TraceKind::SyncRoundIncomplete { .. }
                )
            })
            .count()
    }

    /// Security violations recorded across the run.
    pub fn violation_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.kind, TraceKind::SecurityViolation { .. }))
            .count()
    }

    /// Messages emitted by the given role, in order.
    pub fn emitted_by(&self, role: Role) -> Vec<&Message> {
        self.entries
            .iter()
            .filter(|e| e.role == role)
            .filter_map(|e| match &e.kind {
                TraceKind::Emitted { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Short human-readable summary for result records.
    pub fn summary(&self) -> String {
        let emitted = self
            .entries
            .iter()
            .filter(|e| matches!(e.kind, TraceKind::Emitted { .. }))
            .count();
        format!(
            "entries={} emitted={} faults={} violations={} load={}",
            self.entries.len(),
            emitted,
            self.fault_count(),
            self.violation_count(),
            if self.load_failed() { "failed" } else { "ok" },
        )
    }
}
