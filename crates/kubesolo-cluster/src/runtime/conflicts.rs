//! Neutralization and restoration of pre-existing container runtimes.
//!
//! A runner image usually ships docker/containerd already running; their
//! iptables programming and socket ownership interfere with the installed
//! cluster's own container management, so setup takes them out of the way
//! and cleanup puts them back.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::host::StepOutcome;
use crate::render::ProgressRenderer;
use crate::runtime::ServiceManager;

pub const CONFLICTING_SERVICES: &[&str] = &["docker", "containerd"];
pub const CONFLICTING_BINARIES: &[&str] = &["/usr/bin/dockerd", "/usr/bin/containerd"];
pub const RUNTIME_SOCKETS: &[&str] = &["/var/run/docker.sock", "/run/containerd/containerd.sock"];

const BACKUP_SUFFIX: &str = ".bak";

/// A renamed executable: `(original, original.bak)`.
///
/// At most one of the two paths exists at any time; the backup existing
/// means setup ran and has not been cleaned up yet.
#[derive(Debug, Clone)]
pub struct BackedUpBinary {
    original: PathBuf,
    backup: PathBuf,
}

impl BackedUpBinary {
    pub fn new(original: impl Into<PathBuf>) -> Self {
        let original = original.into();
        let mut backup = original.clone().into_os_string();
        backup.push(BACKUP_SUFFIX);
        Self {
            original,
            backup: backup.into(),
        }
    }

    pub fn original(&self) -> &Path {
        &self.original
    }

    /// Move the executable out of the way. Idempotent: already-stashed or
    /// never-present binaries are expected absences.
    pub fn stash(&self) -> StepOutcome {
        if !self.original.exists() {
            debug!(path = %self.original.display(), "binary absent, nothing to stash");
            return StepOutcome::KnownAbsent;
        }
        match fs::rename(&self.original, &self.backup) {
            Ok(()) => StepOutcome::Done,
            Err(err) => StepOutcome::Failed(err.to_string()),
        }
    }

    /// Move the executable back. Idempotent: a missing backup is a silent
    /// no-op, so calling restore twice never errors.
    pub fn restore(&self) -> StepOutcome {
        if !self.backup.exists() {
            return StepOutcome::KnownAbsent;
        }
        match fs::rename(&self.backup, &self.original) {
            Ok(()) => StepOutcome::Done,
            Err(err) => StepOutcome::Failed(err.to_string()),
        }
    }
}

/// The full inventory of host runtimes the installer competes with.
///
/// Cleanup carries no record of what neutralization actually touched; it
/// rediscovers state from the filesystem (which `.bak` files exist) and
/// unconditionally restarts every known service name.
#[derive(Debug, Clone)]
pub struct ConflictingRuntimes {
    pub services: Vec<String>,
    pub binaries: Vec<BackedUpBinary>,
    pub sockets: Vec<PathBuf>,
}

impl Default for ConflictingRuntimes {
    fn default() -> Self {
        Self {
            services: CONFLICTING_SERVICES.iter().map(|s| s.to_string()).collect(),
            binaries: CONFLICTING_BINARIES
                .iter()
                .map(BackedUpBinary::new)
                .collect(),
            sockets: RUNTIME_SOCKETS.iter().map(PathBuf::from).collect(),
        }
    }
}

impl ConflictingRuntimes {
    /// Best-effort neutralization: stop and mask services, stash binaries,
    /// remove runtime sockets. Never fails the run; every sub-step carries
    /// its own outcome.
    pub fn neutralize(&self, services: &ServiceManager<'_>, pb: &ProgressRenderer) {
        for name in &self.services {
            pb.set_message(format!("Stopping conflicting service {name}"));
            services.stop(name).warn_if_failed(name);
            services.mask(name).warn_if_failed(name);
        }
        for binary in &self.binaries {
            binary
                .stash()
                .warn_if_failed(&binary.original().display().to_string());
        }
        for socket in &self.sockets {
            remove_if_present(socket).warn_if_failed(&socket.display().to_string());
        }
    }

    /// Restore every stashed binary to its original path.
    pub fn restore_binaries(&self, pb: &ProgressRenderer) {
        for binary in &self.binaries {
            let original = binary.original().display().to_string();
            if binary.restore().warn_if_failed(&original).is_done() {
                pb.println(format!("Restored {original}"));
            }
        }
    }

    /// Unmask and restart every known conflicting service.
    ///
    /// There is no record of which services were active before setup, so
    /// all of them are started; a service that does not exist on this host
    /// gets the same warning as one that failed to come up.
    pub fn restart_services(&self, services: &ServiceManager<'_>, pb: &ProgressRenderer) {
        for name in &self.services {
            services.unmask(name).warn_if_failed(name);
            services.start(name).warn_if_failed(name);
            if !services.is_active(name) {
                pb.println(format!("⚠️ service {name} did not come back up"));
            }
        }
    }
}

fn remove_if_present(path: &Path) -> StepOutcome {
    if !path.exists() {
        return StepOutcome::KnownAbsent;
    }
    match fs::remove_file(path) {
        Ok(()) => StepOutcome::Done,
        Err(err) => StepOutcome::Failed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::write(path, b"#!/bin/sh\n").expect("write fixture");
    }

    #[test]
    fn test_stash_then_restore_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let original = dir.path().join("containerd");
        touch(&original);

        let binary = BackedUpBinary::new(&original);
        assert_eq!(binary.stash(), StepOutcome::Done);
        assert!(!original.exists());
        assert!(dir.path().join("containerd.bak").exists());

        assert_eq!(binary.restore(), StepOutcome::Done);
        assert!(original.exists());
        assert!(!dir.path().join("containerd.bak").exists());
    }

    #[test]
    fn test_stash_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let original = dir.path().join("dockerd");
        touch(&original);

        let binary = BackedUpBinary::new(&original);
        assert_eq!(binary.stash(), StepOutcome::Done);
        // second call sees the original gone and skips without error
        assert_eq!(binary.stash(), StepOutcome::KnownAbsent);
        assert!(dir.path().join("dockerd.bak").exists());
    }

    #[test]
    fn test_restore_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let original = dir.path().join("dockerd");
        touch(&original);

        let binary = BackedUpBinary::new(&original);
        binary.stash();
        assert_eq!(binary.restore(), StepOutcome::Done);
        assert_eq!(binary.restore(), StepOutcome::KnownAbsent);
        assert!(original.exists());
    }

    #[test]
    fn test_stash_missing_binary_is_known_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let binary = BackedUpBinary::new(dir.path().join("nonexistent"));
        assert_eq!(binary.stash(), StepOutcome::KnownAbsent);
        assert_eq!(binary.restore(), StepOutcome::KnownAbsent);
    }

    #[test]
    fn test_socket_removal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("docker.sock");
        touch(&socket);

        assert_eq!(remove_if_present(&socket), StepOutcome::Done);
        assert_eq!(remove_if_present(&socket), StepOutcome::KnownAbsent);
    }
}
