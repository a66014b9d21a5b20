//! Wire protocol between the host and a handler process.
//!
//! Newline-delimited JSON over stdin/stdout. The host speaks `HostOp`,
//! the handler replies with `HandlerOp`. Lines that do not parse as a
//! handler op (stray prints from candidate code) are ignored.

use meshbench_core::domain::Message;
use serde::{Deserialize, Serialize};

/// Host-to-handler operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostOp {
    /// Load acknowledgement request; answered with `Ready`.
    Activate,

    /// Deliver one inbound message; answered with `Emitted`.
    Deliver { message: Message },

    /// Advance the handler's logical clock; answered with `Emitted`.
    Tick { seconds: u64 },

    /// Orderly shutdown; answered with `Bye`.
    Shutdown,

    /// Inline answer to a candidate-initiated `Exec` request.
    ExecResult {
        success: bool,
        return_code: i32,
        stdout: String,
        execution_time_ms: u64,
    },
}

/// Why a handler failed to load, as reported over the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WireLoadReason {
    Syntax,
    MissingRequiredShape,
}

/// Handler-to-host operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HandlerOp {
    /// Activation acknowledged.
    Ready,

    /// Outbound messages for the current exchange.
    Emitted {
        #[serde(default)]
        messages: Vec<Message>,
    },

    /// Candidate-initiated mediated command request (level 4).
    Exec {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// Candidate code raised during the current exchange.
    Fault { detail: String },

    /// The handler source could not be loaded.
    LoadError {
        reason: WireLoadReason,
        detail: String,
    },

    /// Shutdown acknowledged.
    Bye,
}

impl HandlerOp {
    /// Parse a wire line; `None` for noise the handler printed.
    pub fn parse(line: &str) -> Option<HandlerOp> {
        serde_json::from_str(line.trim()).ok()
    }
}
