//! Post-mortem capture for readiness failures.
//!
//! Everything here is best-effort: a diagnostics failure is itself only a
//! warning, never an escalation.

use std::path::PathBuf;

use duct::cmd;
use tracing::warn;
use which::which;

use crate::render::ProgressRenderer;

const JOURNAL_LINES: &str = "100";

/// Dumps host state to the log stream when the cluster fails to come up.
pub trait DiagnosticsReporter: Send + Sync {
    fn dump(&self, pb: &ProgressRenderer);
}

/// Captures service status, recent journal output, the credential
/// directory, listening sockets, and interface state.
#[derive(Debug)]
pub struct HostDiagnostics {
    pub unit: String,
    pub credential_dir: PathBuf,
}

impl HostDiagnostics {
    pub fn new(unit: impl Into<String>, credential_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit: unit.into(),
            credential_dir: credential_dir.into(),
        }
    }

    fn capture(&self, pb: &ProgressRenderer, label: &str, expression: duct::Expression) {
        match expression.stderr_to_stdout().unchecked().read() {
            Ok(text) => {
                pb.println(format!("--- {label} ---"));
                pb.println(text);
            }
            Err(err) => warn!(%label, %err, "diagnostics capture failed"),
        }
    }

    fn list_credential_dir(&self, pb: &ProgressRenderer) {
        match std::fs::read_dir(&self.credential_dir) {
            Ok(entries) => {
                pb.println(format!("--- {} ---", self.credential_dir.display()));
                for entry in entries.flatten() {
                    pb.println(entry.path().display().to_string());
                }
            }
            Err(err) => warn!(
                dir = %self.credential_dir.display(),
                %err,
                "credential directory not listable"
            ),
        }
    }
}

impl DiagnosticsReporter for HostDiagnostics {
    fn dump(&self, pb: &ProgressRenderer) {
        pb.println("💔 Dumping host diagnostics");

        self.capture(
            pb,
            "service status",
            cmd!("systemctl", "status", &self.unit, "--no-pager"),
        );
        self.capture(
            pb,
            "recent journal",
            cmd!("journalctl", "-u", &self.unit, "-n", JOURNAL_LINES, "--no-pager"),
        );
        self.list_credential_dir(pb);
        self.capture(pb, "listening sockets", cmd!("ss", "-ltn"));
        self.capture(pb, "network interfaces", cmd!("ip", "addr"));

        // kubectl may legitimately be missing on a bare runner
        if let Ok(kubectl) = which("kubectl") {
            self.capture(
                pb,
                "pods",
                cmd!(kubectl, "get", "pods", "-A", "-o", "wide"),
            );
        }
    }
}
