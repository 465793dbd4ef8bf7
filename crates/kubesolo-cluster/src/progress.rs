use std::borrow::Cow;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use indicatif::style::TemplateError;

use crate::render::{ProgressRenderedText, ProgressRenderer};

#[derive(Debug)]
pub(crate) enum SetupProgressMessage {
    Neutralizing,
    Installing(String),
    UnitStarted,
    WaitingReady(u64),
    Ready(u64),
    Published,
    CleanupStart,
    CleanupDone,
}

impl ProgressRenderedText for SetupProgressMessage {
    fn msg(&self) -> String {
        use colored::*;

        match self {
            SetupProgressMessage::Neutralizing => {
                format!("{}", "📝 Neutralizing conflicting container runtimes".bold())
            }
            SetupProgressMessage::Installing(version) => {
                format!("📦 {} {}", "Installing KubeSolo".bold(), version)
            }
            SetupProgressMessage::UnitStarted => {
                format!("✅ {}", "Service unit enabled and started".bold())
            }
            SetupProgressMessage::WaitingReady(timeout) => {
                format!("⏳ Waiting for the cluster to become ready (timeout: {timeout}s)")
            }
            SetupProgressMessage::Ready(elapsed) => {
                format!("✅ {} ({elapsed}s)", "Cluster is ready".bold())
            }
            SetupProgressMessage::Published => {
                format!("👤 {}", "Kubeconfig published".bold())
            }
            SetupProgressMessage::CleanupStart => {
                format!("{}", "🧹 Restoring host to its pre-setup state".bold())
            }
            SetupProgressMessage::CleanupDone => {
                format!("🎯 {}", "Host restored".bold())
            }
        }
    }
}

fn create_spinning_indicator() -> Result<ProgressBar, TemplateError> {
    let pb = ProgressBar::new(1);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} {spinner}")?
            .tick_chars("/-\\|"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

#[derive(Debug)]
pub struct ProgressBarFactory {
    hide: bool,
    plain: ProgressRenderer,
}

impl ProgressBarFactory {
    pub fn new(hide: bool) -> Self {
        Self {
            hide,
            plain: Default::default(),
        }
    }

    /// create new progress bar
    pub fn create(&self) -> Result<ProgressRenderer, TemplateError> {
        if self.hide || std::env::var("CI").is_ok() {
            Ok(Default::default())
        } else {
            Ok(create_spinning_indicator()?.into())
        }
    }

    /// simple print
    pub fn println(&self, msg: impl Into<Cow<'static, str>>) {
        self.plain.println(msg);
    }
}
