use anyhow::Result;
use clap::Parser;
use tracing::debug;

use crate::delete::{CleanupStrategy, NullCleanup, UninstallConfig};
use crate::github;

/// Restore the host to its pre-setup condition.
#[derive(Debug, Parser)]
pub struct CleanupOpt {
    /// Leave the host as-is (disposable-runner variant)
    #[arg(
        long,
        env = "INPUT_SKIP_CLEANUP",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub skip: bool,
}

impl CleanupOpt {
    pub async fn process(self) -> Result<()> {
        // Cleanup never fails the job; anything that goes wrong becomes a
        // warning annotation.
        if let Err(err) = self.run().await {
            github::warning_annotation(&format!("cleanup incomplete: {err}"));
        }
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        if !github::setup_started() {
            println!("Setup never ran on this host, nothing to clean up");
            return Ok(());
        }

        let strategy: Box<dyn CleanupStrategy> = if self.skip {
            debug!("cleanup skipped by configuration");
            Box::new(NullCleanup)
        } else {
            Box::new(UninstallConfig::builder().build()?.uninstaller()?)
        };

        strategy.cleanup().await?;
        Ok(())
    }
}
