//! Service-manager plumbing: `systemctl` wrappers and the installed unit
//! definition.

pub mod conflicts;

use std::io::Error as IoError;

use tracing::debug;

use crate::error::SetupError;
use crate::host::{HostOutput, HostRunner, StepOutcome};

/// Thin wrapper over `systemctl`.
///
/// Hard activation (setup) and best-effort lifecycle calls (neutralization,
/// cleanup) go through the same runner seam.
pub struct ServiceManager<'a> {
    runner: &'a dyn HostRunner,
}

impl<'a> ServiceManager<'a> {
    pub fn new(runner: &'a dyn HostRunner) -> Self {
        Self { runner }
    }

    pub fn systemctl(&self, args: &[&str]) -> Result<HostOutput, IoError> {
        self.runner.run("systemctl", args)
    }

    /// `is-active` query; any failure counts as not active.
    pub fn is_active(&self, unit: &str) -> bool {
        self.systemctl(&["is-active", "--quiet", unit])
            .map(|out| out.success())
            .unwrap_or(false)
    }

    pub fn stop(&self, unit: &str) -> StepOutcome {
        self.best_effort(&["stop", unit])
    }

    pub fn disable(&self, unit: &str) -> StepOutcome {
        self.best_effort(&["disable", unit])
    }

    pub fn mask(&self, unit: &str) -> StepOutcome {
        self.best_effort(&["mask", unit])
    }

    pub fn unmask(&self, unit: &str) -> StepOutcome {
        self.best_effort(&["unmask", unit])
    }

    pub fn start(&self, unit: &str) -> StepOutcome {
        self.best_effort(&["start", unit])
    }

    pub fn daemon_reload(&self) -> StepOutcome {
        self.best_effort(&["daemon-reload"])
    }

    /// Reload, enable, and start the freshly installed unit. Unlike the
    /// best-effort lifecycle calls, any failure here is a hard error.
    pub fn activate(&self, unit: &str) -> Result<(), SetupError> {
        for args in [
            &["daemon-reload"] as &[&str],
            &["enable", unit],
            &["start", unit],
        ] {
            let output = self.systemctl(args)?;
            if !output.success() {
                return Err(SetupError::UnitActivation {
                    unit: unit.to_string(),
                    detail: format!("systemctl {}: {}", args.join(" "), output.detail()),
                });
            }
            debug!(?args, "systemctl succeeded");
        }
        Ok(())
    }

    fn best_effort(&self, args: &[&str]) -> StepOutcome {
        match self.systemctl(args) {
            Ok(out) if out.success() => StepOutcome::Done,
            Ok(out) if unit_absent(out.detail()) => StepOutcome::KnownAbsent,
            Ok(out) => StepOutcome::Failed(out.detail().to_string()),
            Err(err) => StepOutcome::Failed(err.to_string()),
        }
    }
}

// systemctl phrases for "this unit does not exist here"
fn unit_absent(detail: &str) -> bool {
    ["not loaded", "not found", "does not exist", "No such file"]
        .iter()
        .any(|phrase| detail.contains(phrase))
}

/// The installed service definition, templated from a small fixed set of
/// fields.
#[derive(Debug, Clone)]
pub struct SystemdUnit {
    pub description: String,
    pub exec_path: String,
    pub data_dir: String,
    pub extra_flags: Vec<String>,
}

impl SystemdUnit {
    pub fn render(&self) -> String {
        let mut exec_start = format!("{} --path={}", self.exec_path, self.data_dir);
        for flag in &self.extra_flags {
            exec_start.push(' ');
            exec_start.push_str(flag);
        }

        format!(
            "[Unit]\n\
             Description={description}\n\
             Wants=network-online.target\n\
             After=network-online.target\n\
             \n\
             [Service]\n\
             Type=exec\n\
             WorkingDirectory={data_dir}\n\
             ExecStart={exec_start}\n\
             Restart=on-failure\n\
             RestartSec=5s\n\
             LimitNOFILE=1048576\n\
             LimitNPROC=infinity\n\
             TasksMax=infinity\n\
             Delegate=yes\n\
             KillMode=process\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            description = self.description,
            data_dir = self.data_dir,
            exec_start = exec_start,
        )
    }
}
