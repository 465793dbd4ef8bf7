//! The setup phase: neutralize conflicting runtimes, install and start the
//! service, then hand over to the readiness poller.

pub mod install;

use std::fs::create_dir_all;
use std::path::PathBuf;
use std::time::Duration;

use derive_builder::Builder;
use tracing::{debug, instrument, warn};

use crate::StartStatus;
use crate::SERVICE_NAME;
use crate::check::dns::DnsCheck;
use crate::check::{ReadinessPoller, relax_permissions};
use crate::diagnostics::HostDiagnostics;
use crate::error::SetupError;
use crate::github;
use crate::host::{Host, HostRunner};
use crate::progress::{ProgressBarFactory, SetupProgressMessage};
use crate::render::{ProgressRenderedText, ProgressRenderer};
use crate::runtime::conflicts::ConflictingRuntimes;
use crate::runtime::{ServiceManager, SystemdUnit};

use install::{HttpReleaseClient, ReleaseClient};

pub const DEFAULT_VERSION: &str = "latest";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_BIN_PATH: &str = "/usr/local/bin/kubesolo";
pub const DEFAULT_DATA_DIR: &str = "/var/lib/kubesolo";
pub const DEFAULT_UNIT_PATH: &str = "/etc/systemd/system/kubesolo.service";

/// Credential file location inside the data directory.
pub const KUBECONFIG_SUBPATH: &str = "pki/admin/admin.kubeconfig";

const UNIT_DESCRIPTION: &str = "KubeSolo lightweight Kubernetes";

/// Describes how to install KubeSolo on this host
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(private, name = "build_impl"))]
pub struct SetupConfig {
    /// Release tag to install, or `latest`
    #[builder(setter(into), default = "DEFAULT_VERSION.to_string()")]
    version: String,

    /// Whether to block until the cluster is observably serving traffic.
    ///
    /// Defaults to `true`.
    #[builder(default = "true")]
    wait_for_ready: bool,

    /// Readiness budget in seconds
    #[builder(default = "DEFAULT_TIMEOUT_SECS")]
    timeout_secs: u64,

    /// Whether to verify in-cluster DNS once the node is Ready
    #[builder(default = "true")]
    dns_readiness: bool,

    /// Optional shared-storage path passed through to the service command
    #[builder(setter(into, strip_option), default)]
    local_storage_shared_path: Option<PathBuf>,

    #[builder(setter(into), default = "PathBuf::from(DEFAULT_BIN_PATH)")]
    bin_path: PathBuf,

    /// Data directory; everything the cluster writes lives under it
    #[builder(setter(into), default = "PathBuf::from(DEFAULT_DATA_DIR)")]
    data_dir: PathBuf,

    #[builder(setter(into), default = "PathBuf::from(DEFAULT_UNIT_PATH)")]
    unit_path: PathBuf,

    /// Used to hide spinner animation for progress updates
    #[builder(default = "true")]
    hide_spinner: bool,
}

impl SetupConfig {
    /// Creates a new default [`SetupConfigBuilder`]
    pub fn builder() -> SetupConfigBuilder {
        SetupConfigBuilder::default()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn kubeconfig_path(&self) -> PathBuf {
        self.data_dir.join(KUBECONFIG_SUBPATH)
    }
}

impl SetupConfigBuilder {
    /// Creates a `SetupConfig` with the current configuration.
    pub fn build(&self) -> Result<SetupConfig, SetupError> {
        self.build_impl()
            .map_err(|err| SetupError::MissingRequiredConfig(err.to_string()))
    }
}

/// Install KubeSolo on this host
pub struct SetupController {
    /// Configuration options for this process
    config: SetupConfig,
    pb_factory: ProgressBarFactory,
    runner: Box<dyn HostRunner>,
    releases: Box<dyn ReleaseClient>,
}

impl SetupController {
    /// Creates a `SetupController` with the given configuration options
    pub fn from_config(config: SetupConfig) -> Self {
        Self::with_parts(config, Box::new(Host), Box::new(HttpReleaseClient))
    }

    /// Construct with explicit collaborators. Production code goes through
    /// [`SetupController::from_config`].
    pub fn with_parts(
        config: SetupConfig,
        runner: Box<dyn HostRunner>,
        releases: Box<dyn ReleaseClient>,
    ) -> Self {
        Self {
            pb_factory: ProgressBarFactory::new(config.hide_spinner),
            config,
            runner,
            releases,
        }
    }

    /// Install KubeSolo and (optionally) wait for readiness.
    ///
    /// Outputs are published whether or not the readiness wait succeeded,
    /// so a failing job still has the kubeconfig path for debugging steps.
    #[instrument(skip(self))]
    pub async fn setup(&self) -> Result<StartStatus, SetupError> {
        // The handoff flag goes down before any destructive work: a cleanup
        // invocation later in the same job must act even if setup fails
        // partway through.
        if let Err(err) = github::mark_setup_started() {
            warn!(%err, "could not persist the setup handoff flag");
        }

        let pb = self.pb_factory.create()?;
        pb.set_message(SetupProgressMessage::Neutralizing.msg());
        ConflictingRuntimes::default().neutralize(&ServiceManager::new(&*self.runner), &pb);

        let version = self.install_target(&pb)?;
        pb.println(SetupProgressMessage::UnitStarted.msg());
        pb.finish_and_clear();

        let waited = if self.config.wait_for_ready {
            self.wait_for_ready().await
        } else {
            Ok(())
        };

        self.publish_outputs();
        waited?;

        self.pb_factory
            .println("🎯 Successfully installed KubeSolo cluster");

        Ok(StartStatus {
            version,
            kubeconfig: self.config.kubeconfig_path(),
        })
    }

    /// Resolve, download, install, and start the service. Every failure in
    /// this chain aborts setup.
    #[instrument(skip(self, pb))]
    pub(crate) fn install_target(&self, pb: &ProgressRenderer) -> Result<String, SetupError> {
        let version = install::resolve_version(&*self.releases, &self.config.version)?;
        let arch = install::target_arch(std::env::consts::ARCH)?;
        pb.set_message(SetupProgressMessage::Installing(version.clone()).msg());

        let url = install::download_url(&version, arch);
        let archive = self.releases.fetch_artifact(&url)?;
        let binary = install::extract_binary(&archive, install::TARGET_BINARY)?;
        install::install_bin(&self.config.bin_path, &binary)?;
        debug!(path = %self.config.bin_path.display(), "installed binary");

        create_dir_all(&self.config.data_dir).map_err(|err| SetupError::DataDirectory {
            path: self.config.data_dir.clone(),
            source: err,
        })?;

        let unit = SystemdUnit {
            description: UNIT_DESCRIPTION.to_string(),
            exec_path: self.config.bin_path.display().to_string(),
            data_dir: self.config.data_dir.display().to_string(),
            extra_flags: self
                .config
                .local_storage_shared_path
                .iter()
                .map(|path| format!("--local-storage-shared-path={}", path.display()))
                .collect(),
        };
        std::fs::write(&self.config.unit_path, unit.render())?;

        ServiceManager::new(&*self.runner).activate(SERVICE_NAME)?;
        Ok(version)
    }

    async fn wait_for_ready(&self) -> Result<(), SetupError> {
        let pb = self.pb_factory.create()?;
        pb.println(SetupProgressMessage::WaitingReady(self.config.timeout_secs).msg());

        let kubeconfig = self.config.kubeconfig_path();
        let credential_dir = kubeconfig
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.data_dir.clone());
        let diagnostics = HostDiagnostics::new(SERVICE_NAME, credential_dir);

        let poller = ReadinessPoller::new(
            &*self.runner,
            &diagnostics,
            SERVICE_NAME,
            &kubeconfig,
            self.config.timeout(),
        );
        let elapsed = poller.wait_ready(&pb).await?;
        pb.println(SetupProgressMessage::Ready(elapsed.as_secs()).msg());

        if self.config.dns_readiness {
            DnsCheck::new(&*self.runner, &kubeconfig).verify(&pb).await?;
        }

        pb.finish_and_clear();
        Ok(())
    }

    /// Publish the credential path as a step output and ambient environment
    /// for every later step. Best-effort: a publishing failure is a warning,
    /// not a setup failure.
    fn publish_outputs(&self) {
        let kubeconfig = self.config.kubeconfig_path();
        if kubeconfig.exists() {
            relax_permissions(&kubeconfig);
        }

        let path = kubeconfig.display().to_string();
        if let Err(err) = github::set_output("kubeconfig", &path) {
            warn!(%err, "could not publish the kubeconfig output");
        }
        if let Err(err) = github::export_env("KUBECONFIG", &path) {
            warn!(%err, "could not export KUBECONFIG");
        }

        // free-text summary for downstream steps
        if let Ok(info) = self
            .runner
            .run("kubectl", &["--kubeconfig", &path, "cluster-info"])
        {
            if info.success() {
                let _ = github::set_output("cluster-info", info.stdout.trim());
            }
        }

        self.pb_factory
            .println(SetupProgressMessage::Published.msg());
    }
}

#[cfg(test)]
mod tests {
    use std::io::Error as IoError;
    use std::sync::Mutex;

    use crate::host::HostOutput;

    use super::install::MockReleaseClient;
    use super::*;

    #[derive(Default)]
    struct RecordingHost {
        calls: Mutex<Vec<String>>,
    }

    impl HostRunner for RecordingHost {
        fn run(&self, program: &str, args: &[&str]) -> Result<HostOutput, IoError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{program} {}", args.join(" ")));
            Ok(HostOutput {
                code: Some(0),
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = SetupConfig::builder().build().expect("build");
        assert_eq!(config.version(), "latest");
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert!(config.wait_for_ready);
        assert!(config.dns_readiness);
        assert_eq!(
            config.kubeconfig_path(),
            PathBuf::from("/var/lib/kubesolo/pki/admin/admin.kubeconfig")
        );
    }

    #[test]
    fn test_empty_version_resolution_aborts_before_download() {
        let mut releases = MockReleaseClient::new();
        releases
            .expect_latest_tag()
            .times(1)
            .returning(|| Ok(String::new()));
        // no download, no service activation
        releases.expect_fetch_artifact().times(0);

        let host = std::sync::Arc::new(RecordingHost::default());
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SetupConfig::builder()
            .bin_path(dir.path().join("bin/kubesolo"))
            .data_dir(dir.path().join("data"))
            .unit_path(dir.path().join("kubesolo.service"))
            .build()
            .expect("build");

        let controller = SetupController {
            pb_factory: ProgressBarFactory::new(true),
            config,
            runner: Box::new(SharedHost(host.clone())),
            releases: Box::new(releases),
        };

        let pb = ProgressRenderer::default();
        let err = controller.install_target(&pb).unwrap_err();
        assert!(matches!(err, SetupError::EmptyVersionResolution));
        assert!(host.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_install_target_writes_unit_and_activates() {
        let mut releases = MockReleaseClient::new();
        releases
            .expect_latest_tag()
            .times(1)
            .returning(|| Ok("v1.4.0".to_string()));
        releases
            .expect_fetch_artifact()
            .times(1)
            .withf(|url| url.contains("/v1.4.0/") && url.ends_with(".tar.gz"))
            .returning(|_| Ok(test_archive()));

        let host = std::sync::Arc::new(RecordingHost::default());
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SetupConfig::builder()
            .bin_path(dir.path().join("bin/kubesolo"))
            .data_dir(dir.path().join("data"))
            .unit_path(dir.path().join("kubesolo.service"))
            .local_storage_shared_path(dir.path().join("shared"))
            .build()
            .expect("build");

        let controller = SetupController {
            pb_factory: ProgressBarFactory::new(true),
            config: config.clone(),
            runner: Box::new(SharedHost(host.clone())),
            releases: Box::new(releases),
        };

        let pb = ProgressRenderer::default();
        let version = controller.install_target(&pb).expect("install");
        assert_eq!(version, "v1.4.0");

        // partial-install invariant: unit present implies binary and data dir
        assert!(dir.path().join("bin/kubesolo").exists());
        assert!(dir.path().join("data").is_dir());
        let unit = std::fs::read_to_string(dir.path().join("kubesolo.service")).expect("unit");
        assert!(unit.contains("--local-storage-shared-path="));

        let calls = host.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                "systemctl daemon-reload",
                "systemctl enable kubesolo",
                "systemctl start kubesolo",
            ]
        );
    }

    struct SharedHost(std::sync::Arc<RecordingHost>);

    impl HostRunner for SharedHost {
        fn run(&self, program: &str, args: &[&str]) -> Result<HostOutput, IoError> {
            self.0.run(program, args)
        }
    }

    fn test_archive() -> Vec<u8> {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let content: &[u8] = b"#!ELF";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "kubesolo", content)
            .expect("append");
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip")
    }
}
