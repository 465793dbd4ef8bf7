//! The cleanup phase: reverse every host mutation of a previous setup run.
//!
//! Cleanup executes in a second, independent process invocation with no
//! memory of what setup did; it rediscovers state from the filesystem and
//! the service manager. Every sub-step is best-effort: cleanup runs during
//! job teardown, where a failure cannot be surfaced usefully, so nothing
//! here may fail the enclosing job.

use std::ffi::OsStr;
use std::fs::{remove_dir_all, remove_file};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use derive_builder::Builder;
use sysinfo::{ProcessesToUpdate, System};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::SERVICE_NAME;
use crate::check::{API_PORT, port_listening};
use crate::error::UninstallError;
use crate::github;
use crate::host::{Host, HostRunner, StepOutcome};
use crate::progress::{ProgressBarFactory, SetupProgressMessage};
use crate::render::{ProgressRenderedText, ProgressRenderer};
use crate::runtime::ServiceManager;
use crate::runtime::conflicts::ConflictingRuntimes;
use crate::start::{DEFAULT_BIN_PATH, DEFAULT_DATA_DIR, DEFAULT_UNIT_PATH};

/// Network-plugin directories the installer is known to create.
const CNI_DIRS: &[&str] = &["/etc/cni/net.d", "/opt/cni/bin"];

const PORT_RELEASE_WAIT: Duration = Duration::from_secs(30);
const PORT_RELEASE_POLL: Duration = Duration::from_secs(1);

/// A swappable teardown behavior.
///
/// The post-job variant restores the host; the disposable-runner variant
/// documents that nothing needs doing. Implementations demote their own
/// failures to warnings.
#[async_trait]
pub trait CleanupStrategy: Send + Sync {
    async fn cleanup(&self) -> Result<(), UninstallError>;
}

/// Cleanup for disposable execution environments: the host is discarded
/// after the job, so there is nothing to restore.
#[derive(Debug, Default)]
pub struct NullCleanup;

#[async_trait]
impl CleanupStrategy for NullCleanup {
    async fn cleanup(&self) -> Result<(), UninstallError> {
        debug!("cleanup disabled, leaving host as-is");
        Ok(())
    }
}

/// Describes how to tear KubeSolo down
#[derive(Builder, Debug)]
#[builder(build_fn(private, name = "build_impl"))]
pub struct UninstallConfig {
    #[builder(setter(into), default = "SERVICE_NAME.to_string()")]
    service: String,

    #[builder(setter(into), default = "PathBuf::from(DEFAULT_BIN_PATH)")]
    bin_path: PathBuf,

    #[builder(setter(into), default = "PathBuf::from(DEFAULT_DATA_DIR)")]
    data_dir: PathBuf,

    #[builder(setter(into), default = "PathBuf::from(DEFAULT_UNIT_PATH)")]
    unit_path: PathBuf,

    #[builder(default = "CNI_DIRS.iter().map(PathBuf::from).collect()")]
    cni_dirs: Vec<PathBuf>,

    #[builder(default)]
    conflicts: ConflictingRuntimes,

    /// How long to wait for the API port to be released
    #[builder(default = "PORT_RELEASE_WAIT")]
    port_release_wait: Duration,

    /// Used to hide spinner animation for progress updates
    #[builder(default = "true")]
    hide_spinner: bool,
}

impl UninstallConfig {
    pub fn builder() -> UninstallConfigBuilder {
        UninstallConfigBuilder::default()
    }

    pub fn uninstaller(self) -> Result<ClusterUninstaller, UninstallError> {
        ClusterUninstaller::from_config(self)
    }
}

impl UninstallConfigBuilder {
    pub fn build(&self) -> Result<UninstallConfig, UninstallError> {
        self.build_impl()
            .map_err(|err| UninstallError::Other(err.to_string()))
    }
}

/// Restores the host to its pre-setup condition
pub struct ClusterUninstaller {
    /// Configuration options for this process
    config: UninstallConfig,
    runner: Box<dyn HostRunner>,
    pb_factory: ProgressBarFactory,
}

impl ClusterUninstaller {
    fn from_config(config: UninstallConfig) -> Result<Self, UninstallError> {
        Ok(ClusterUninstaller {
            pb_factory: ProgressBarFactory::new(config.hide_spinner),
            runner: Box::new(Host),
            config,
        })
    }

    /// Swap the host runner. Used by tests.
    pub fn with_runner(mut self, runner: Box<dyn HostRunner>) -> Self {
        self.runner = runner;
        self
    }

    async fn uninstall(&self) -> Result<(), UninstallError> {
        let pb = self.pb_factory.create()?;
        pb.println(SetupProgressMessage::CleanupStart.msg());

        self.stop_installed_service(&pb).await;
        self.remove_installed_files(&pb);
        self.config.conflicts.restore_binaries(&pb);
        self.config
            .conflicts
            .restart_services(&ServiceManager::new(&*self.runner), &pb);

        github::clear_setup_started();

        pb.println(SetupProgressMessage::CleanupDone.msg());
        pb.finish_and_clear();
        Ok(())
    }

    async fn stop_installed_service(&self, pb: &ProgressRenderer) {
        let services = ServiceManager::new(&*self.runner);
        let unit = &self.config.service;

        pb.set_message(format!("Stopping {unit}"));
        if services.is_active(unit) {
            services.stop(unit).warn_if_failed(unit);
        }
        services.disable(unit).warn_if_failed(unit);

        kill_lingering(unit);
        self.wait_for_port_release(pb).await;
        self.unmount_data_dir(pb);
    }

    /// Bounded wait for the API port; proceed with a warning if it is still
    /// bound afterwards.
    async fn wait_for_port_release(&self, pb: &ProgressRenderer) {
        let started = Instant::now();
        while started.elapsed() < self.config.port_release_wait {
            if !port_listening(&*self.runner, API_PORT) {
                return;
            }
            pb.set_message(format!("Waiting for port {API_PORT} to be released"));
            sleep(PORT_RELEASE_POLL).await;
        }
        if port_listening(&*self.runner, API_PORT) {
            warn!(port = API_PORT, "port still bound after cleanup wait");
            pb.println(format!("⚠️ port {API_PORT} still bound, proceeding anyway"));
        }
    }

    /// Unmount everything under the data directory, deepest-first, so
    /// nested mounts release before their parents.
    fn unmount_data_dir(&self, pb: &ProgressRenderer) {
        let Ok(table) = std::fs::read_to_string("/proc/mounts") else {
            return;
        };
        for target in mounts_under(&table, &self.config.data_dir) {
            pb.set_message(format!("Unmounting {target}"));
            match self.runner.run("umount", &[&target]) {
                Ok(out) if out.success() => debug!(%target, "unmounted"),
                Ok(out) => warn!(%target, detail = out.detail(), "could not unmount"),
                Err(err) => warn!(%target, %err, "could not unmount"),
            }
        }
    }

    fn remove_installed_files(&self, pb: &ProgressRenderer) {
        pb.set_message("Removing installed files");

        remove_path(&self.config.unit_path, false).warn_if_failed("unit file");
        remove_path(&self.config.bin_path, false).warn_if_failed("binary");
        remove_path(&self.config.data_dir, true).warn_if_failed("data directory");
        for dir in &self.config.cni_dirs {
            remove_path(dir, true).warn_if_failed("network-config directory");
        }

        ServiceManager::new(&*self.runner)
            .daemon_reload()
            .warn_if_failed("daemon-reload");
    }
}

#[async_trait]
impl CleanupStrategy for ClusterUninstaller {
    async fn cleanup(&self) -> Result<(), UninstallError> {
        self.uninstall().await
    }
}

/// Mount points below `root`, deepest-first.
pub(crate) fn mounts_under(proc_mounts: &str, root: &Path) -> Vec<String> {
    let mut points: Vec<String> = proc_mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter(|point| Path::new(point).starts_with(root))
        .map(str::to_string)
        .collect();
    points.sort_by_key(|point| std::cmp::Reverse(point.matches('/').count()));
    points
}

fn remove_path(path: &Path, recursive: bool) -> StepOutcome {
    if !path.exists() {
        return StepOutcome::KnownAbsent;
    }
    let removed = if recursive {
        remove_dir_all(path)
    } else {
        remove_file(path)
    };
    match removed {
        Ok(()) => StepOutcome::Done,
        Err(err) => StepOutcome::Failed(format!("{}: {err}", path.display())),
    }
}

fn kill_lingering(name: &str) {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    for process in sys.processes_by_exact_name(OsStr::new(name)) {
        if !process.kill() {
            // kill() fails on procs owned by another user, so only log it
            debug!(
                pid = %process.pid(),
                name = ?process.name(),
                "process.kill() returned false"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Error as IoError;
    use std::sync::Mutex;

    use crate::host::HostOutput;
    use crate::runtime::conflicts::BackedUpBinary;

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
            // `ss` reports the port free so port-release never blocks
            Ok(HostOutput {
                code: Some(0),
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_mounts_under_sorts_deepest_first() {
        let table = "\
            proc /proc proc rw 0 0\n\
            tmpfs /var/lib/kubesolo/pods tmpfs rw 0 0\n\
            tmpfs /var/lib/kubesolo/pods/abc/volumes tmpfs rw 0 0\n\
            tmpfs /var/lib/other tmpfs rw 0 0\n";

        let points = mounts_under(table, Path::new("/var/lib/kubesolo"));
        assert_eq!(
            points,
            vec![
                "/var/lib/kubesolo/pods/abc/volumes".to_string(),
                "/var/lib/kubesolo/pods".to_string(),
            ]
        );
    }

    #[test]
    fn test_mounts_under_ignores_unrelated_roots() {
        let table = "tmpfs /var/lib/kubesolo-other tmpfs rw 0 0\n";
        assert!(mounts_under(table, Path::new("/var/lib/kubesolo")).is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_restores_backed_up_binary() {
        let dir = tempfile::tempdir().expect("tempdir");

        // simulate a prior setup run: stashed binary + installed files
        let original = dir.path().join("containerd");
        std::fs::write(&original, b"#!/bin/sh\n").expect("write binary");
        let backed_up = BackedUpBinary::new(&original);
        assert!(backed_up.stash().is_done());

        let bin_path = dir.path().join("kubesolo");
        let data_dir = dir.path().join("data");
        let unit_path = dir.path().join("kubesolo.service");
        std::fs::write(&bin_path, b"#!ELF").expect("write binary");
        std::fs::create_dir_all(data_dir.join("pki/admin")).expect("data dir");
        std::fs::write(&unit_path, "[Unit]\n").expect("write unit");

        let conflicts = ConflictingRuntimes {
            services: vec!["docker".to_string()],
            binaries: vec![backed_up],
            sockets: vec![],
        };

        let config = UninstallConfig::builder()
            .bin_path(&bin_path)
            .data_dir(&data_dir)
            .unit_path(&unit_path)
            .cni_dirs(vec![])
            .conflicts(conflicts)
            .port_release_wait(Duration::ZERO)
            .build()
            .expect("build");

        let uninstaller = config
            .uninstaller()
            .expect("uninstaller")
            .with_runner(Box::new(RecordingHost::default()));

        uninstaller.cleanup().await.expect("cleanup");

        // the binary is back and no .bak remains
        assert!(original.exists());
        assert!(!dir.path().join("containerd.bak").exists());
        // installed artifacts are gone
        assert!(!bin_path.exists());
        assert!(!data_dir.exists());
        assert!(!unit_path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_restarts_conflicting_services() {
        let host = std::sync::Arc::new(RecordingHost::default());

        struct SharedHost(std::sync::Arc<RecordingHost>);
        impl HostRunner for SharedHost {
            fn run(&self, program: &str, args: &[&str]) -> Result<HostOutput, IoError> {
                self.0.run(program, args)
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let config = UninstallConfig::builder()
            .bin_path(dir.path().join("kubesolo"))
            .data_dir(dir.path().join("data"))
            .unit_path(dir.path().join("kubesolo.service"))
            .cni_dirs(vec![])
            .conflicts(ConflictingRuntimes {
                services: vec!["docker".to_string(), "containerd".to_string()],
                binaries: vec![],
                sockets: vec![],
            })
            .port_release_wait(Duration::ZERO)
            .build()
            .expect("build");

        let uninstaller = config
            .uninstaller()
            .expect("uninstaller")
            .with_runner(Box::new(SharedHost(host.clone())));

        uninstaller.cleanup().await.expect("cleanup");

        let calls = host.calls.lock().unwrap();
        for service in ["docker", "containerd"] {
            assert!(calls.contains(&format!("systemctl unmask {service}")));
            assert!(calls.contains(&format!("systemctl start {service}")));
        }
    }

    #[tokio::test]
    async fn test_null_cleanup_is_a_no_op() {
        NullCleanup.cleanup().await.expect("no-op");
    }
}
