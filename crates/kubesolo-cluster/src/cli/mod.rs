use anyhow::Result;
use clap::Parser;

mod setup;
mod cleanup;

pub use setup::SetupOpt;
pub use cleanup::CleanupOpt;

/// Manage the KubeSolo installation on this runner
#[derive(Debug, Parser)]
pub enum ClusterCmd {
    /// Install KubeSolo and wait until the cluster is ready
    #[command(name = "setup")]
    Setup(Box<SetupOpt>),

    /// Reverse the host mutations of a previous setup run
    ///
    /// Intended to run as the post-job hook. Never fails the job: every
    /// problem is demoted to a warning.
    #[command(name = "cleanup")]
    Cleanup(CleanupOpt),
}

impl ClusterCmd {
    /// process cluster commands
    pub async fn process(self) -> Result<()> {
        match self {
            Self::Setup(setup) => {
                setup.process().await?;
            }
            Self::Cleanup(cleanup) => {
                cleanup.process().await?;
            }
        }

        Ok(())
    }
}
