use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use crate::github;
use crate::start::{DEFAULT_TIMEOUT_SECS, SetupConfig, SetupController};

/// Install KubeSolo on this host.
///
/// Every flag doubles as an action input via its `INPUT_*` environment
/// variable, which is how the job runner passes configuration down.
#[derive(Debug, Parser)]
pub struct SetupOpt {
    /// Release tag to install, or "latest"
    #[arg(long, env = "INPUT_VERSION", default_value = "latest")]
    pub version: String,

    /// Block until the cluster serves traffic and the node is Ready
    #[arg(
        long,
        env = "INPUT_WAIT_FOR_READY",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub wait_for_ready: bool,

    /// Readiness budget in seconds
    #[arg(long, env = "INPUT_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Verify in-cluster DNS once the node is Ready
    #[arg(
        long,
        env = "INPUT_DNS_READINESS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub dns_readiness: bool,

    /// Shared local-storage path passed through to the service command
    #[arg(long, env = "INPUT_LOCAL_STORAGE_SHARED_PATH")]
    pub local_storage_shared_path: Option<PathBuf>,

    /// Hide spinner animation
    #[arg(long)]
    pub hide_spinner: bool,
}

impl SetupOpt {
    pub async fn process(self) -> Result<()> {
        let mut builder = SetupConfig::builder();
        builder
            .version(self.version)
            .wait_for_ready(self.wait_for_ready)
            .timeout_secs(self.timeout)
            .dns_readiness(self.dns_readiness)
            .hide_spinner(self.hide_spinner);
        if let Some(path) = self.local_storage_shared_path {
            builder.local_storage_shared_path(path);
        }
        let config = builder.build()?;
        debug!(?config, "setup configuration");

        let controller = SetupController::from_config(config);
        match controller.setup().await {
            Ok(status) => {
                println!(
                    "Installed KubeSolo {} (kubeconfig: {})",
                    status.version(),
                    status.kubeconfig().display()
                );
                Ok(())
            }
            Err(err) => {
                github::error_annotation(&err.to_string());
                Err(err.into())
            }
        }
    }
}
