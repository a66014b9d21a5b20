//! Per-level sandbox capability policy.
//!
//! The executor, not the candidate, is the enforcement point: every
//! mediated command request is authorized here before anything is
//! spawned, and a refusal is recorded as a security violation.

use meshbench_core::domain::Level;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Commands the level-4 mediated primitive may run, with the fixed
/// arguments they are pinned to. `echo` and `ls` additionally accept
/// sanitized caller arguments.
const COMMAND_ALLOW_LIST: &[(&str, &[&str])] = &[
    ("ls", &[]),
    ("date", &[]),
    ("uptime", &[]),
    ("df", &["-h"]),
    ("free", &["-m"]),
    ("hostname", &[]),
    ("pwd", &[]),
    ("echo", &[]),
];

const SHELL_METACHARACTERS: &[char] = &[
    ';', '|', '&', '$', '`', '>', '<', '(', ')', '{', '}', '*', '?', '~', '!', '\n', '\r', '"',
    '\'', '\\',
];

fn contains_metacharacters(s: &str) -> bool {
    s.chars().any(|c| SHELL_METACHARACTERS.contains(&c))
}

/// Mediated command-execution policy (level 4 only).
#[derive(Debug, Clone)]
pub struct ExecPolicy {
    /// Directory `ls` paths are confined to.
    pub safe_root: PathBuf,

    /// Secondary deadline for the spawned command itself.
    pub command_timeout: Duration,
}

impl ExecPolicy {
    /// Create a policy confining `ls` to `safe_root`.
    pub fn new(safe_root: impl Into<PathBuf>) -> Self {
        Self {
            safe_root: safe_root.into(),
            command_timeout: Duration::from_secs(5),
        }
    }

    /// Authorize a candidate request into a concrete argv, or name the
    /// violated rule. Never consults a shell.
    pub fn authorize(&self, command: &str, args: &[String]) -> Result<Vec<String>, String> {
        if command.chars().any(char::is_whitespace) || contains_metacharacters(command) {
            return Err(format!(
                "shell-interpreted invocation rejected: {command:?}"
            ));
        }

        let Some((name, fixed)) = COMMAND_ALLOW_LIST.iter().find(|(n, _)| *n == command) else {
            return Err(format!("command not in allow list: {command:?}"));
        };

        match *name {
            "echo" => {
                for arg in args {
                    if contains_metacharacters(arg) {
                        return Err(format!("echo argument rejected: {arg:?}"));
                    }
                }
                let mut argv = vec!["echo".to_string()];
                argv.extend(args.iter().cloned());
                Ok(argv)
            }
            "ls" => {
                let target = match args {
                    [] => self.safe_root.clone(),
                    [path] => self.confine(path)?,
                    _ => return Err("ls accepts at most one path".to_string()),
                };
                Ok(vec!["ls".to_string(), target.to_string_lossy().into_owned()])
            }
            _ => {
                if !args.is_empty() {
                    return Err(format!("{name} does not accept arguments"));
                }
                let mut argv = vec![name.to_string()];
                argv.extend(fixed.iter().map(|a| a.to_string()));
                Ok(argv)
            }
        }
    }

    /// Resolve a caller-supplied path under the safe root.
    fn confine(&self, path: &str) -> Result<PathBuf, String> {
        if contains_metacharacters(path) {
            return Err(format!("ls path rejected: {path:?}"));
        }
        let candidate = Path::new(path);
        if candidate.is_absolute()
            || candidate
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(format!("ls path escapes the safe root: {path:?}"));
        }
        Ok(self.safe_root.join(candidate))
    }
}

/// Declarative capability surface for one run.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    /// Level the policy was derived from.
    pub level: Level,

    /// Hard wall-clock deadline per `deliver`/`tick` exchange.
    pub deliver_deadline: Duration,

    /// Whether candidate code may write under its scratch directory.
    pub scratch_writes: bool,

    /// Mediated command execution, when the level permits it.
    pub exec: Option<ExecPolicy>,

    /// Static entry-point markers the source must contain to load.
    pub required_markers: Vec<String>,
}

impl SandboxPolicy {
    /// Derive the policy for a level. The exec safe root is a
    /// placeholder here; the sandbox pins it to the instance's scratch
    /// directory at spawn time.
    pub fn for_level(level: Level) -> Self {
        Self {
            level,
            deliver_deadline: level.deliver_deadline(),
            scratch_writes: matches!(level, Level::Collector),
            exec: matches!(level, Level::Executor).then(|| ExecPolicy::new(".")),
            required_markers: vec!["Handler".to_string(), "def process".to_string()],
        }
    }

    /// Replace the deliver deadline (tests use short ones).
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deliver_deadline = deadline;
        self
    }

    /// Replace the required shape markers.
    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.required_markers = markers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ExecPolicy {
        ExecPolicy::new("/tmp/bench-scratch")
    }

    #[test]
    fn test_authorize_plain_commands() {
        assert_eq!(policy().authorize("date", &[]).unwrap(), vec!["date"]);
        assert_eq!(
            policy().authorize("df", &[]).unwrap(),
            vec!["df".to_string(), "-h".to_string()]
        );
        assert_eq!(
            policy().authorize("free", &[]).unwrap(),
            vec!["free".to_string(), "-m".to_string()]
        );
    }

    #[test]
    fn test_rejects_unlisted_command() {
        let err = policy().authorize("rm", &[]).unwrap_err();
        assert!(err.contains("not in allow list"));
    }

    #[test]
    fn test_rejects_shell_interpretation() {
        assert!(policy().authorize("date; rm -rf /", &[]).is_err());
        assert!(policy().authorize("date|cat", &[]).is_err());
        assert!(policy().authorize("$(date)", &[]).is_err());
    }

    #[test]
    fn test_echo_arguments_sanitized() {
        let argv = policy()
            .authorize("echo", &["hello".to_string(), "world".to_string()])
            .unwrap();
        assert_eq!(argv, vec!["echo", "hello", "world"]);

        assert!(policy()
            .authorize("echo", &["$(cat /etc/passwd)".to_string()])
            .is_err());
        assert!(policy().authorize("echo", &["a;b".to_string()]).is_err());
    }

    #[test]
    fn test_ls_confined_to_safe_root() {
        let argv = policy().authorize("ls", &[]).unwrap();
        assert_eq!(argv[1], "/tmp/bench-scratch");

        let argv = policy().authorize("ls", &["sub".to_string()]).unwrap();
        assert!(argv[1].starts_with("/tmp/bench-scratch"));

        assert!(policy().authorize("ls", &["../etc".to_string()]).is_err());
        assert!(policy().authorize("ls", &["/etc".to_string()]).is_err());
    }

    #[test]
    fn test_fixed_arg_commands_reject_extra_args() {
        assert!(policy().authorize("date", &["-u".to_string()]).is_err());
        assert!(policy().authorize("uptime", &["-p".to_string()]).is_err());
    }

    #[test]
    fn test_policy_per_level() {
        let p = SandboxPolicy::for_level(Level::Echo);
        assert!(!p.scratch_writes);
        assert!(p.exec.is_none());

        let p = SandboxPolicy::for_level(Level::Collector);
        assert!(p.scratch_writes);
        assert!(p.exec.is_none());

        let p = SandboxPolicy::for_level(Level::Executor);
        assert!(!p.scratch_writes);
        assert!(p.exec.is_some());
        assert_eq!(p.deliver_deadline, Duration::from_secs(10));
    }
}
