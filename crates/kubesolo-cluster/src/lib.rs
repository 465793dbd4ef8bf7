//! Functionality for installing, verifying, and tearing down single-node
//! KubeSolo clusters on CI runners.
//!
//! The primary use of this crate is to install KubeSolo on an ephemeral
//! runner using a [`SetupController`], wait until the cluster is observably
//! serving traffic, and later reverse every host mutation from a separate
//! process invocation using a [`CleanupStrategy`].
//!
//! # Example
//!
//! ```no_run
//! use kubesolo_cluster::{SetupController, SetupConfig, SetupError};
//! # async fn example() -> Result<(), SetupError> {
//! let config = SetupConfig::builder().version("latest").build()?;
//! let controller = SetupController::from_config(config);
//! controller.setup().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Setup and cleanup run in independent process lifetimes. They coordinate
//! only through durable facts: the filesystem, the service manager, and a
//! single persisted handoff flag (see [`github`]).

#![deny(rustdoc::broken_intra_doc_links)]

mod check;
mod start;
mod render;
mod delete;
mod error;
mod progress;
mod diagnostics;
pub mod host;
pub mod github;
pub mod runtime;

/// extensions
#[cfg(feature = "cli")]
pub mod cli;

pub use start::{SetupController, SetupConfig, SetupConfigBuilder};
pub use start::install::{ReleaseClient, HttpReleaseClient};
pub use error::{ClusterError, SetupError, UninstallError};
pub use check::{ReadinessPoller, ReadinessStage, ReadinessError, API_PORT};
pub use check::dns::DnsCheck;
pub use delete::{
    CleanupStrategy, ClusterUninstaller, UninstallConfig, UninstallConfigBuilder, NullCleanup,
};
pub use diagnostics::{DiagnosticsReporter, HostDiagnostics};
pub use progress::ProgressBarFactory;
pub use render::ProgressRenderer;

pub(crate) const SERVICE_NAME: &str = "kubesolo";

pub use common::*;

mod common {

    use std::path::{Path, PathBuf};

    /// The result of a successful setup of a KubeSolo cluster
    ///
    /// A `StartStatus` carries additional information about the setup
    /// process beyond the simple fact that it succeeded: the concrete
    /// version that was installed (after `latest` resolution) and the
    /// path of the generated admin credential file.
    #[derive(Debug)]
    pub struct StartStatus {
        pub(crate) version: String,
        pub(crate) kubeconfig: PathBuf,
    }

    impl StartStatus {
        /// The concrete release tag that was installed
        pub fn version(&self) -> &str {
            &self.version
        }

        /// Path of the generated admin kubeconfig
        pub fn kubeconfig(&self) -> &Path {
            &self.kubeconfig
        }
    }
}
