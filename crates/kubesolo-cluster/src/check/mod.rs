//! The readiness polling loop.
//!
//! A bounded retry loop steps through an ordered chain of predicates every
//! iteration. No stage result is cached: each pass re-checks from the first
//! stage, so a transient regression (service flap, port close) pushes the
//! loop back without any special handling.

pub mod dns;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::diagnostics::DiagnosticsReporter;
use crate::host::HostRunner;
use crate::render::ProgressRenderer;
use crate::runtime::ServiceManager;

/// The fixed API port of the installed cluster.
pub const API_PORT: u16 = 6443;

/// Node listing token that marks a schedulable node. Space-delimited so a
/// `NotReady` row does not match.
const READY_TOKEN: &str = " Ready ";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// An error occurred while waiting for the cluster
#[derive(thiserror::Error, Debug)]
pub enum ReadinessError {
    /// The cluster did not become ready within the configured budget
    #[error("Timed out waiting for the cluster to become ready ({elapsed}s elapsed, budget {timeout}s)")]
    Timeout { elapsed: u64, timeout: u64 },
    /// The cluster DNS add-on never reported Running
    #[error("DNS add-on pod not Running after {attempts} attempts")]
    DnsAddonNotRunning { attempts: u32 },
    /// The in-cluster lookup kept failing
    #[error("In-cluster DNS lookup failed after {attempts} attempts")]
    DnsExhausted { attempts: u32 },
}

/// Ordered readiness stages. Each stage gates the next: a failing stage
/// short-circuits everything after it for that iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessStage {
    ServiceActive,
    PortListening,
    KubeconfigPresent,
    ApiReachable,
    NodeReady,
}

impl ReadinessStage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ServiceActive => "service active",
            Self::PortListening => "API port listening",
            Self::KubeconfigPresent => "kubeconfig present",
            Self::ApiReachable => "API answering",
            Self::NodeReady => "node Ready",
        }
    }
}

/// Polls the host until the installed cluster is observably serving
/// traffic and its single node is schedulable, or the budget elapses.
pub struct ReadinessPoller<'a> {
    runner: &'a dyn HostRunner,
    diagnostics: &'a dyn DiagnosticsReporter,
    unit: String,
    kubeconfig: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a> ReadinessPoller<'a> {
    pub fn new(
        runner: &'a dyn HostRunner,
        diagnostics: &'a dyn DiagnosticsReporter,
        unit: impl Into<String>,
        kubeconfig: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            diagnostics,
            unit: unit.into(),
            kubeconfig: kubeconfig.into(),
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the fixed 5s iteration interval. Used by tests to compress
    /// wall-clock time.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Block (via bounded sleeps) until every stage passes within a single
    /// iteration. Returns the elapsed wait on success.
    pub async fn wait_ready(&self, pb: &ProgressRenderer) -> Result<Duration, ReadinessError> {
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if deadline_exceeded(elapsed, self.timeout) {
                pb.println(format!(
                    "❌ cluster not ready after {}s (budget {}s)",
                    elapsed.as_secs(),
                    self.timeout.as_secs()
                ));
                self.diagnostics.dump(pb);
                return Err(ReadinessError::Timeout {
                    elapsed: elapsed.as_secs(),
                    timeout: self.timeout.as_secs(),
                });
            }

            match self.first_unmet_stage() {
                None => {
                    debug!(elapsed = elapsed.as_secs(), "cluster ready");
                    return Ok(elapsed);
                }
                Some(stage) => {
                    pb.set_message(format!(
                        "⏳ waiting for {} ({}s/{}s)",
                        stage.label(),
                        elapsed.as_secs(),
                        self.timeout.as_secs()
                    ));
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Evaluate the stage chain in order and return the first one that does
    /// not hold, or `None` once all pass in this iteration.
    pub(crate) fn first_unmet_stage(&self) -> Option<ReadinessStage> {
        if !ServiceManager::new(self.runner).is_active(&self.unit) {
            return Some(ReadinessStage::ServiceActive);
        }
        if !self.port_listening() {
            return Some(ReadinessStage::PortListening);
        }
        if !self.kubeconfig.exists() {
            return Some(ReadinessStage::KubeconfigPresent);
        }
        // re-relaxed every iteration; the service rewrites the file during
        // bootstrap
        relax_permissions(&self.kubeconfig);
        let Some(nodes) = self.list_nodes() else {
            return Some(ReadinessStage::ApiReachable);
        };
        if !nodes.contains(READY_TOKEN) {
            return Some(ReadinessStage::NodeReady);
        }
        None
    }

    fn port_listening(&self) -> bool {
        port_listening(self.runner, API_PORT)
    }

    /// `kubectl get nodes`; `Some` only when the call succeeds with
    /// non-empty output.
    fn list_nodes(&self) -> Option<String> {
        let kubeconfig = self.kubeconfig.display().to_string();
        let output = self
            .runner
            .run(
                "kubectl",
                &["--kubeconfig", &kubeconfig, "get", "nodes", "--no-headers"],
            )
            .ok()?;
        if output.success() && !output.stdout.trim().is_empty() {
            Some(output.stdout)
        } else {
            None
        }
    }
}

/// The budget is strictly-greater-than: hitting the boundary exactly is
/// still within budget.
pub(crate) fn deadline_exceeded(elapsed: Duration, timeout: Duration) -> bool {
    elapsed > timeout
}

fn port_token(port: u16) -> String {
    format!(":{port} ")
}

/// Check the host's listening-socket table for the given port.
pub(crate) fn port_listening(runner: &dyn HostRunner, port: u16) -> bool {
    runner
        .run("ss", &["-ltn"])
        .map(|out| out.success() && out.stdout.contains(&port_token(port)))
        .unwrap_or(false)
}

#[cfg(unix)]
pub(crate) fn relax_permissions(path: &std::path::Path) {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;

    if let Err(err) = std::fs::set_permissions(path, Permissions::from_mode(0o644)) {
        warn!(path = %path.display(), %err, "could not relax kubeconfig permissions");
    }
}

#[cfg(not(unix))]
pub(crate) fn relax_permissions(_path: &std::path::Path) {}
