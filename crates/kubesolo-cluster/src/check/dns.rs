//! Optional in-cluster DNS verification.
//!
//! A second bounded loop with its own retry budget: wait for the DNS
//! add-on pod, then resolve a well-known in-cluster name from a disposable
//! probe pod. Exhaustion is a hard error; probe-pod deletion is best-effort
//! regardless of outcome.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::host::{HostRunner, StepOutcome};
use crate::render::ProgressRenderer;

use super::ReadinessError;

const PROBE_POD: &str = "kubesolo-dns-probe";
const PROBE_IMAGE: &str = "busybox:1.36";
const IN_CLUSTER_NAME: &str = "kubernetes.default.svc.cluster.local";
const DNS_ADDON_SELECTOR: &str = "k8s-app=kube-dns";

const ADDON_RETRIES: u32 = 24;
const PROBE_RETRIES: u32 = 10;
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub struct DnsCheck<'a> {
    runner: &'a dyn HostRunner,
    kubeconfig: PathBuf,
    addon_retries: u32,
    probe_retries: u32,
    retry_interval: Duration,
}

impl<'a> DnsCheck<'a> {
    pub fn new(runner: &'a dyn HostRunner, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            kubeconfig: kubeconfig.into(),
            addon_retries: ADDON_RETRIES,
            probe_retries: PROBE_RETRIES,
            retry_interval: RETRY_INTERVAL,
        }
    }

    /// Shrink the retry budgets. Used by tests to compress wall-clock time.
    pub fn retry_budget(mut self, addon: u32, probe: u32, interval: Duration) -> Self {
        self.addon_retries = addon;
        self.probe_retries = probe;
        self.retry_interval = interval;
        self
    }

    /// Run the full DNS verification. The probe pod is deleted whether or
    /// not the lookup ever succeeded.
    pub async fn verify(&self, pb: &ProgressRenderer) -> Result<(), ReadinessError> {
        self.wait_for_addon(pb).await?;
        self.launch_probe_pod(pb);
        let result = self.resolve_in_cluster(pb).await;
        self.delete_probe_pod().warn_if_failed(PROBE_POD);
        result
    }

    async fn wait_for_addon(&self, pb: &ProgressRenderer) -> Result<(), ReadinessError> {
        for attempt in 1..=self.addon_retries {
            pb.set_message(format!(
                "⏳ waiting for DNS add-on ({attempt}/{})",
                self.addon_retries
            ));
            let output = self.kubectl(&[
                "get",
                "pods",
                "-n",
                "kube-system",
                "-l",
                DNS_ADDON_SELECTOR,
                "--no-headers",
            ]);
            if let Some(listing) = output {
                // status column scrape, same gate the reference applies
                if listing.contains("Running") {
                    debug!(attempt, "DNS add-on is running");
                    return Ok(());
                }
            }
            sleep(self.retry_interval).await;
        }
        Err(ReadinessError::DnsAddonNotRunning {
            attempts: self.addon_retries,
        })
    }

    fn launch_probe_pod(&self, pb: &ProgressRenderer) {
        pb.set_message("Launching DNS probe pod");
        // creation failure surfaces as lookup exhaustion below
        let _ = self.kubectl(&[
            "run",
            PROBE_POD,
            "--image",
            PROBE_IMAGE,
            "--restart=Never",
            "--command",
            "--",
            "sleep",
            "300",
        ]);
    }

    async fn resolve_in_cluster(&self, pb: &ProgressRenderer) -> Result<(), ReadinessError> {
        for attempt in 1..=self.probe_retries {
            pb.set_message(format!(
                "⏳ resolving {IN_CLUSTER_NAME} ({attempt}/{})",
                self.probe_retries
            ));
            let output = self.kubectl(&["exec", PROBE_POD, "--", "nslookup", IN_CLUSTER_NAME]);
            if output.is_some() {
                pb.println(format!("✅ in-cluster DNS resolves {IN_CLUSTER_NAME}"));
                return Ok(());
            }
            sleep(self.retry_interval).await;
        }
        Err(ReadinessError::DnsExhausted {
            attempts: self.probe_retries,
        })
    }

    fn delete_probe_pod(&self) -> StepOutcome {
        match self.kubectl(&["delete", "pod", PROBE_POD, "--ignore-not-found=true"]) {
            Some(_) => StepOutcome::Done,
            None => StepOutcome::Failed(format!("could not delete pod {PROBE_POD}")),
        }
    }

    /// Run kubectl against the installed cluster; `Some(stdout)` on success.
    fn kubectl(&self, args: &[&str]) -> Option<String> {
        let kubeconfig = self.kubeconfig.display().to_string();
        let mut full_args = vec!["--kubeconfig", kubeconfig.as_str()];
        full_args.extend_from_slice(args);
        let output = self.runner.run("kubectl", &full_args).ok()?;
        output.success().then_some(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Error as IoError;
    use std::sync::Mutex;

    use crate::host::HostOutput;

    use super::*;

    /// Answers `get pods` with a Running add-on and fails every exec.
    #[derive(Default)]
    struct NoDnsHost {
        calls: Mutex<Vec<String>>,
    }

    impl HostRunner for NoDnsHost {
        fn run(&self, _program: &str, args: &[&str]) -> Result<HostOutput, IoError> {
            let call = args.join(" ");
            self.calls.lock().unwrap().push(call.clone());
            if call.contains("get pods") {
                Ok(HostOutput {
                    code: Some(0),
                    stdout: "coredns-abc   1/1   Running   0   30s\n".to_string(),
                    stderr: String::new(),
                })
            } else if call.contains("exec") {
                Ok(HostOutput {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "server can't find kubernetes.default\n".to_string(),
                })
            } else {
                Ok(HostOutput {
                    code: Some(0),
                    ..Default::default()
                })
            }
        }
    }

    #[tokio::test]
    async fn test_exhausted_lookup_is_hard_error_and_pod_deleted() {
        let host = NoDnsHost::default();
        let check = DnsCheck::new(&host, "/tmp/admin.kubeconfig").retry_budget(
            1,
            2,
            Duration::from_millis(1),
        );
        let pb = ProgressRenderer::default();

        let err = check.verify(&pb).await.unwrap_err();
        assert!(matches!(err, ReadinessError::DnsExhausted { attempts: 2 }));

        let calls = host.calls.lock().unwrap();
        let execs = calls.iter().filter(|call| call.contains("exec")).count();
        assert_eq!(execs, 2);
        // probe pod deleted despite the failure
        assert!(calls.iter().any(|call| call.contains("delete pod")));
    }

    #[derive(Default)]
    struct NeverRunningHost;

    impl HostRunner for NeverRunningHost {
        fn run(&self, _program: &str, args: &[&str]) -> Result<HostOutput, IoError> {
            let call = args.join(" ");
            if call.contains("get pods") {
                Ok(HostOutput {
                    code: Some(0),
                    stdout: "coredns-abc   0/1   Pending   0   30s\n".to_string(),
                    stderr: String::new(),
                })
            } else {
                Ok(HostOutput {
                    code: Some(0),
                    ..Default::default()
                })
            }
        }
    }

    #[tokio::test]
    async fn test_addon_never_running_fails_before_probe() {
        let host = NeverRunningHost;
        let check = DnsCheck::new(&host, "/tmp/admin.kubeconfig").retry_budget(
            2,
            1,
            Duration::from_millis(1),
        );
        let pb = ProgressRenderer::default();

        let err = check.verify(&pb).await.unwrap_err();
        assert!(matches!(err, ReadinessError::DnsAddonNotRunning { attempts: 2 }));
    }
}
