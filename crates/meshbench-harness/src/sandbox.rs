//! Sandboxed execution of candidate handler source.
//!
//! The trait seam lets the simulator run against either the real
//! process-backed sandbox or the scripted fakes. Infrastructure faults
//! are the only `Err`; everything the candidate does wrong comes back
//! as data in a `LoadResult` or `DeliverOutcome`.

use crate::exec::{run_mediated, MediatedExec};
use crate::policy::SandboxPolicy;
use crate::protocol::{HandlerOp, HostOp, WireLoadReason};
use async_trait::async_trait;
use meshbench_core::domain::{HarnessError, LoadError, Message, Result, Role};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// The embedded driver that adapts the Python calling convention to
/// the wire protocol.
const PYTHON_DRIVER: &str = include_str!("driver.py");

/// Result of a load attempt. A malformed candidate is a `Rejected`
/// outcome, not an error.
pub enum LoadResult {
    Ready(Box<dyn HandlerInstance>),
    Rejected(LoadError),
}

/// Candidate fault observed during one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerFault {
    Runtime { detail: String },
    Timeout { deadline_ms: u64 },
}

/// One mediated command the host ran on the candidate's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub command: String,
    pub return_code: i32,
    pub execution_time_ms: u64,
}

/// Everything observed while delivering one message or tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliverOutcome {
    /// Messages the handler emitted, in order.
    pub emitted: Vec<Message>,

    /// Mediated commands executed during the exchange.
    pub commands: Vec<CommandRecord>,

    /// Capability violations, as human-readable details.
    pub violations: Vec<String>,

    /// Terminal fault for this exchange, if any.
    pub fault: Option<HandlerFault>,
}

/// Loads candidate source into isolated handler instances.
#[async_trait]
pub trait HandlerSandbox: Send + Sync {
    async fn load(&self, source: &str, role: Role) -> Result<LoadResult>;
}

/// One live sandboxed handler.
#[async_trait]
pub trait HandlerInstance: Send {
    /// Deliver an inbound message under the policy deadline.
    async fn deliver(&mut self, message: &Message) -> Result<DeliverOutcome>;

    /// Advance the instance's logical clock by simulated seconds.
    async fn tick(&mut self, seconds: u64) -> Result<DeliverOutcome>;

    /// Files left in the instance's scratch directory: (relative
    /// path, size in bytes).
    fn side_effects(&self) -> Vec<(String, u64)>;

    /// Release all resources. Idempotent; always invoked by the
    /// simulator, with kill-on-drop as the backstop.
    async fn terminate(&mut self);
}

/// How the handler process is launched.
#[derive(Debug, Clone)]
pub enum Launcher {
    /// `python3 driver.py handler.py ROLE`, the default calling
    /// convention for model-generated handlers.
    PythonDriver { python: String },

    /// Arbitrary argv with the handler file path appended. Tests use
    /// this to run shell stubs that speak the wire protocol directly.
    Argv { argv: Vec<String> },
}

impl Default for Launcher {
    fn default() -> Self {
        Launcher::PythonDriver {
            python: "python3".to_string(),
        }
    }
}

/// Process-backed sandbox: one subprocess per handler instance, a
/// scratch directory exclusive to the instance, and hard deadlines
/// enforced by killing the child.
pub struct ProcessSandbox {
    policy: SandboxPolicy,
    launcher: Launcher,
}

impl ProcessSandbox {
    /// Sandbox with the default Python driver launcher.
    pub fn new(policy: SandboxPolicy) -> Self {
        Self {
            policy,
            launcher: Launcher::default(),
        }
    }

    /// Sandbox with a custom launcher.
    pub fn with_launcher(policy: SandboxPolicy, launcher: Launcher) -> Self {
        Self { policy, launcher }
    }

    async fn spawn_instance(&self, source: &str, role: Role) -> Result<ProcessInstance> {
        let work = tempfile::Builder::new()
            .prefix("meshbench-")
            .tempdir()
            .map_err(|e| HarnessError::Infrastructure(format!("scratch dir: {e}")))?;

        let scratch = work.path().join("scratch");
        tokio::fs::create_dir_all(&scratch).await?;

        let handler_file = work.path().join("handler.py");
        tokio::fs::write(&handler_file, source).await?;

        let mut policy = self.policy.clone();
        if let Some(exec) = policy.exec.as_mut() {
            exec.safe_root = scratch.clone();
        }

        let mut argv: Vec<String> = match &self.launcher {
            Launcher::PythonDriver { python } => {
                let driver_file = work.path().join("driver.py");
                tokio::fs::write(&driver_file, PYTHON_DRIVER).await?;
                vec![
                    python.clone(),
                    driver_file.to_string_lossy().into_owned(),
                ]
            }
            Launcher::Argv { argv } => argv.clone(),
        };
        argv.push(handler_file.to_string_lossy().into_owned());
        if matches!(self.launcher, Launcher::PythonDriver { .. }) {
            argv.push(role.as_str().to_string());
        }

        debug!(role = role.as_str(), argv = ?argv, "spawning handler process");

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(&scratch)
            .env("MESH_ROLE", role.as_str())
            .env("MESH_SCRATCH", &scratch)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::Infrastructure(format!("spawn handler: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Infrastructure("handler stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Infrastructure("handler stdout unavailable".into()))?;

        Ok(ProcessInstance {
            role,
            policy,
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            work,
            terminated: false,
        })
    }
}

#[async_trait]
impl HandlerSandbox for ProcessSandbox {
    async fn load(&self, source: &str, role: Role) -> Result<LoadResult> {
        // Static shape check before anything is spawned.
        for marker in &self.policy.required_markers {
            if !source.contains(marker.as_str()) {
                return Ok(LoadResult::Rejected(LoadError::MissingRequiredShape(
                    format!("source lacks required marker {marker:?}"),
                )));
            }
        }

        let mut instance = self.spawn_instance(source, role).await?;
        match instance.activate().await? {
            None => Ok(LoadResult::Ready(Box::new(instance))),
            Some(err) => {
                instance.terminate().await;
                Ok(LoadResult::Rejected(err))
            }
        }
    }
}

/// A live handler subprocess.
pub struct ProcessInstance {
    role: Role,
    policy: SandboxPolicy,
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    // Holds the scratch directory for the instance's lifetime.
    work: tempfile::TempDir,
    terminated: bool,
}

impl ProcessInstance {
    async fn send_line(&mut self, op: &HostOp) -> std::io::Result<()> {
        let mut line = serde_json::to_string(op).map_err(std::io::Error::other)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await
    }

    /// Next wire line; `None` when the child closed stdout.
    async fn read_line(&mut self) -> Option<String> {
        self.lines.next_line().await.ok().flatten()
    }

    /// Run the activation exchange. `None` on success, the load error
    /// otherwise.
    async fn activate(&mut self) -> Result<Option<LoadError>> {
        let deadline = self.policy.deliver_deadline;
        let fut = self.drive_activation();
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                self.kill().await;
                Ok(Some(LoadError::MissingRequiredShape(
                    "activation was not acknowledged within the deadline".to_string(),
                )))
            }
        }
    }

    async fn drive_activation(&mut self) -> Result<Option<LoadError>> {
        if self.send_line(&HostOp::Activate).await.is_err() {
            return Ok(Some(LoadError::Syntax(
                "handler process rejected activation input".to_string(),
            )));
        }
        loop {
            let Some(line) = self.read_line().await else {
                return Ok(Some(LoadError::Syntax(
                    "handler process exited during load".to_string(),
                )));
            };
            match HandlerOp::parse(&line) {
                Some(HandlerOp::Ready) => return Ok(None),
                Some(HandlerOp::LoadError { reason, detail }) => {
                    let err = match reason {
                        WireLoadReason::Syntax => LoadError::Syntax(detail),
                        WireLoadReason::MissingRequiredShape => {
                            LoadError::MissingRequiredShape(detail)
                        }
                    };
                    return Ok(Some(err));
                }
                Some(HandlerOp::Fault { detail }) => {
                    return Ok(Some(LoadError::Syntax(detail)));
                }
                _ => continue,
            }
        }
    }

    /// Run one deliver/tick exchange under the policy deadline.
    async fn exchange(&mut self, op: HostOp) -> Result<DeliverOutcome> {
        let deadline = self.policy.deliver_deadline;
        let deadline_ms = deadline.as_millis() as u64;
        let mut outcome = DeliverOutcome::default();

        let driven = {
            let fut = Self::drive(
                &mut self.stdin,
                &mut self.lines,
                &self.policy,
                op,
                &mut outcome,
            );
            tokio::time::timeout(deadline, fut).await
        };

        match driven {
            Ok(Ok(())) => Ok(outcome),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(role = self.role.as_str(), deadline_ms, "handler exceeded deadline; killing");
                self.kill().await;
                outcome.fault = Some(HandlerFault::Timeout { deadline_ms });
                Ok(outcome)
            }
        }
    }

    async fn drive(
        stdin: &mut ChildStdin,
        lines: &mut Lines<BufReader<ChildStdout>>,
        policy: &SandboxPolicy,
        op: HostOp,
        outcome: &mut DeliverOutcome,
    ) -> Result<()> {
        let mut line = match serde_json::to_string(&op) {
            Ok(line) => line,
            Err(e) => return Err(HarnessError::Serialization(e)),
        };
        line.push('\n');
        if stdin.write_all(line.as_bytes()).await.is_err() || stdin.flush().await.is_err() {
            outcome.fault = Some(HandlerFault::Runtime {
                detail: "handler process is not accepting input".to_string(),
            });
            return Ok(());
        }

        loop {
            let Some(line) = lines.next_line().await.ok().flatten() else {
                outcome.fault = Some(HandlerFault::Runtime {
                    detail: "handler process exited unexpectedly".to_string(),
                });
                return Ok(());
            };
            match HandlerOp::parse(&line) {
                Some(HandlerOp::Emitted { messages }) => {
                    outcome.emitted.extend(messages);
                    return Ok(());
                }
                Some(HandlerOp::Ready) | Some(HandlerOp::Bye) => return Ok(()),
                Some(HandlerOp::Fault { detail }) => {
                    outcome.fault = Some(HandlerFault::Runtime { detail });
                    return Ok(());
                }
                Some(HandlerOp::LoadError { detail, .. }) => {
                    outcome.fault = Some(HandlerFault::Runtime { detail });
                    return Ok(());
                }
                Some(HandlerOp::Exec { command, args }) => {
                    let reply = match &policy.exec {
                        None => {
                            outcome.violations.push(format!(
                                "command execution not permitted at this level: {command:?}"
                            ));
                            HostOp::ExecResult {
                                success: false,
                                return_code: -1,
                                stdout: String::new(),
                                execution_time_ms: 0,
                            }
                        }
                        Some(exec_policy) => match run_mediated(exec_policy, &command, &args)
                            .await?
                        {
                            MediatedExec::Refused { detail } => {
                                outcome.violations.push(detail);
                                HostOp::ExecResult {
                                    success: false,
                                    return_code: -1,
                                    stdout: String::new(),
                                    execution_time_ms: 0,
                                }
                            }
                            MediatedExec::Executed(result) => {
                                outcome.commands.push(CommandRecord {
                                    command: command.clone(),
                                    return_code: result.return_code,
                                    execution_time_ms: result.execution_time_ms,
                                });
                                HostOp::ExecResult {
                                    success: result.success,
                                    return_code: result.return_code,
                                    stdout: result.stdout,
                                    execution_time_ms: result.execution_time_ms,
                                }
                            }
                        },
                    };
                    let mut reply_line = serde_json::to_string(&reply)
                        .map_err(HarnessError::Serialization)?;
                    reply_line.push('\n');
                    if stdin.write_all(reply_line.as_bytes()).await.is_err() {
                        outcome.fault = Some(HandlerFault::Runtime {
                            detail: "handler closed the exec channel".to_string(),
                        });
                        return Ok(());
                    }
                    let _ = stdin.flush().await;
                }
                None => continue,
            }
        }
    }

    async fn kill(&mut self) {
        if self.terminated {
            return;
        }
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        self.terminated = true;
    }
}

#[async_trait]
impl HandlerInstance for ProcessInstance {
    async fn deliver(&mut self, message: &Message) -> Result<DeliverOutcome> {
        if self.terminated {
            return Ok(DeliverOutcome {
                fault: Some(HandlerFault::Runtime {
                    detail: "handler instance already terminated".to_string(),
                }),
                ..Default::default()
            });
        }
        self.exchange(HostOp::Deliver {
            message: message.clone(),
        })
        .await
    }

    async fn tick(&mut self, seconds: u64) -> Result<DeliverOutcome> {
        if self.terminated {
            return Ok(DeliverOutcome::default());
        }
        self.exchange(HostOp::Tick { seconds }).await
    }

    fn side_effects(&self) -> Vec<(String, u64)> {
        // Scratch files only count as evidence at levels that permit
        // scratch writes.
        if !self.policy.scratch_writes {
            return Vec::new();
        }
        let scratch = self.work.path().join("scratch");
        let mut effects = Vec::new();
        collect_files(&scratch, &scratch, &mut effects);
        effects.sort();
        effects
    }

    async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        // Orderly shutdown first; the kill is the guarantee.
        let _ = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            self.send_line(&HostOp::Shutdown),
        )
        .await;
        self.kill().await;
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, u64)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(meta) = entry.metadata() {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            out.push((rel, meta.len()));
        }
    }
}
