//! The single seam through which every external CLI is invoked.
//!
//! All host mutations go through `systemctl`, `ss`, `kubectl`, `umount` and
//! friends. Routing them through [`HostRunner`] keeps the sequencing logic
//! testable without a live host.

use std::io::Error as IoError;
use std::process::Command;

use tracing::{debug, warn};

/// Captured result of a finished host command.
#[derive(Debug, Clone, Default)]
pub struct HostOutput {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl HostOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr if non-empty, otherwise stdout; used for warning messages
    pub fn detail(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// Runs external commands to completion, capturing their output.
///
/// Every invocation is synchronous; no command is issued concurrently with
/// another. Tests substitute scripted implementations to assert call order
/// without a live host.
pub trait HostRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<HostOutput, IoError>;
}

/// Production runner backed by [`std::process::Command`].
#[derive(Debug, Default)]
pub struct Host;

impl HostRunner for Host {
    fn run(&self, program: &str, args: &[&str]) -> Result<HostOutput, IoError> {
        debug!(%program, ?args, "invoking host command");
        let output = Command::new(program).args(args).output()?;
        Ok(HostOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Outcome of a best-effort step.
///
/// Many steps intentionally discard failures: stopping a service that was
/// never installed is expected on a clean host, not an error. The tri-state
/// keeps "expected absence" distinguishable from a real (but still
/// non-fatal) failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran and succeeded
    Done,
    /// The target was already absent; expected on a clean host
    KnownAbsent,
    /// The step failed; logged, never escalated
    Failed(String),
}

impl StepOutcome {
    /// Log a warning when the step failed; `Done` and `KnownAbsent` are silent.
    pub fn warn_if_failed(self, what: &str) -> Self {
        if let StepOutcome::Failed(reason) = &self {
            warn!(%what, %reason, "best-effort step failed");
        }
        self
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_requires_zero_exit() {
        let ok = HostOutput {
            code: Some(0),
            ..Default::default()
        };
        let failed = HostOutput {
            code: Some(3),
            ..Default::default()
        };
        let signalled = HostOutput {
            code: None,
            ..Default::default()
        };
        assert!(ok.success());
        assert!(!failed.success());
        assert!(!signalled.success());
    }

    #[test]
    fn test_detail_prefers_stderr() {
        let output = HostOutput {
            code: Some(1),
            stdout: "partial\n".to_string(),
            stderr: "unit not found\n".to_string(),
        };
        assert_eq!(output.detail(), "unit not found");

        let stdout_only = HostOutput {
            code: Some(1),
            stdout: "inactive\n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(stdout_only.detail(), "inactive");
    }

    #[test]
    fn test_host_runs_real_command() {
        let output = Host.run("true", &[]).expect("spawn");
        assert!(output.success());
    }
}
