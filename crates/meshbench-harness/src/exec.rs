//! The mediated command primitive for level 4.
//!
//! Spawns authorized commands directly from an argv, never through a
//! shell, under the policy's secondary timeout.

use crate::policy::ExecPolicy;
use meshbench_core::domain::Result;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Captured result of an executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub return_code: i32,
    pub stdout: String,
    pub execution_time_ms: u64,
}

/// Outcome of one mediated request: either the command ran (possibly
/// unsuccessfully), or the policy refused it outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediatedExec {
    Executed(CommandOutcome),
    Refused { detail: String },
}

/// Authorize and run one candidate command request.
///
/// Refusals are policy decisions, not errors; the caller records them
/// as security violations and keeps the run alive.
pub async fn run_mediated(policy: &ExecPolicy, command: &str, args: &[String]) -> Result<MediatedExec> {
    let argv = match policy.authorize(command, args) {
        Ok(argv) => argv,
        Err(detail) => {
            debug!(command, %detail, "mediated command refused");
            return Ok(MediatedExec::Refused { detail });
        }
    };

    let start = Instant::now();
    let child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            return Ok(MediatedExec::Executed(CommandOutcome {
                success: false,
                return_code: -1,
                stdout: format!("failed to spawn {command}: {e}"),
                execution_time_ms: start.elapsed().as_millis() as u64,
            }));
        }
    };

    let output = match tokio::time::timeout(policy.command_timeout, child.wait_with_output()).await
    {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Ok(MediatedExec::Executed(CommandOutcome {
                success: false,
                return_code: -1,
                stdout: format!("failed to collect output: {e}"),
                execution_time_ms: start.elapsed().as_millis() as u64,
            }));
        }
        Err(_) => {
            return Ok(MediatedExec::Executed(CommandOutcome {
                success: false,
                return_code: -1,
                stdout: format!(
                    "command timed out after {}s",
                    policy.command_timeout.as_secs()
                ),
                execution_time_ms: start.elapsed().as_millis() as u64,
            }));
        }
    };

    let execution_time_ms = start.elapsed().as_millis() as u64;
    let return_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();

    debug!(command, return_code, execution_time_ms, "mediated command finished");

    Ok(MediatedExec::Executed(CommandOutcome {
        success: output.status.success(),
        return_code,
        stdout,
        execution_time_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ExecPolicy {
        ExecPolicy::new("/tmp")
    }

    #[tokio::test]
    async fn test_whitelisted_date_executes() {
        let result = run_mediated(&policy(), "date", &[]).await.expect("run");
        match result {
            MediatedExec::Executed(outcome) => {
                assert!(outcome.success);
                assert_eq!(outcome.return_code, 0);
                assert!(!outcome.stdout.is_empty());
            }
            other => panic!("expected execution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_echo_sanitized_arguments() {
        let result = run_mediated(&policy(), "echo", &["hello".to_string()])
            .await
            .expect("run");
        match result {
            MediatedExec::Executed(outcome) => {
                assert!(outcome.success);
                assert!(outcome.stdout.contains("hello"));
            }
            other => panic!("expected execution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unlisted_command_refused() {
        let result = run_mediated(&policy(), "rm", &["-rf".to_string()])
            .await
            .expect("run");
        match result {
            MediatedExec::Refused { detail } => {
                assert!(detail.contains("not in allow list"));
            }
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shell_interpretation_refused() {
        let result = run_mediated(&policy(), "date && rm -rf /", &[])
            .await
            .expect("run");
        assert!(matches!(result, MediatedExec::Refused { .. }));
    }
}
