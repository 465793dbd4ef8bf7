//! Side channels of the CI job runner.
//!
//! Outputs, environment exports, and the setup/cleanup handoff flag all go
//! through durable files the runner exposes (`GITHUB_OUTPUT`, `GITHUB_ENV`,
//! `GITHUB_STATE`). Setup and cleanup are separate process invocations, so
//! this module is the only way state crosses between them.

use std::env;
use std::fs::OpenOptions;
use std::io::{Error as IoError, Write};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use tracing::debug;

const OUTPUT_FILE_ENV: &str = "GITHUB_OUTPUT";
const ENV_FILE_ENV: &str = "GITHUB_ENV";
const STATE_FILE_ENV: &str = "GITHUB_STATE";

/// Key of the handoff flag. In the post-job invocation the runner surfaces
/// it back as the `STATE_kubesolo_setup_started` environment variable.
const SETUP_STARTED_KEY: &str = "kubesolo_setup_started";

/// Fallback handoff location for hosts that are not running under a job
/// runner (e.g. local testing of the two phases).
pub static FALLBACK_STATE_PATH: Lazy<Option<PathBuf>> = Lazy::new(|| {
    directories::BaseDirs::new().map(|it| it.home_dir().join(".kubesolo/setup-state"))
});

/// Append a step output to the runner's output file.
///
/// Multi-line values use the heredoc form required by the runner.
pub fn set_output(name: &str, value: &str) -> Result<(), IoError> {
    match env::var(OUTPUT_FILE_ENV) {
        Ok(path) => append_kv(Path::new(&path), name, value),
        Err(_) => {
            debug!(%name, "no output file in environment, skipping output");
            Ok(())
        }
    }
}

/// Export a variable to the current process and to all subsequent job steps.
pub fn export_env(name: &str, value: &str) -> Result<(), IoError> {
    // Single-threaded at publish time; nothing else reads the environment
    // concurrently.
    unsafe {
        env::set_var(name, value);
    }
    match env::var(ENV_FILE_ENV) {
        Ok(path) => append_kv(Path::new(&path), name, value),
        Err(_) => {
            debug!(%name, "no env file in environment, process-local export only");
            Ok(())
        }
    }
}

/// Persist the "setup has run" handoff flag.
///
/// Written before any destructive setup work so a later cleanup invocation
/// always knows setup was at least attempted.
pub fn mark_setup_started() -> Result<(), IoError> {
    if let Ok(path) = env::var(STATE_FILE_ENV) {
        return append_kv(Path::new(&path), SETUP_STARTED_KEY, "true");
    }
    let Some(path) = FALLBACK_STATE_PATH.as_ref() else {
        debug!("no home directory, handoff flag not persisted");
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, "true")
}

/// Read the handoff flag back in the cleanup invocation.
pub fn setup_started() -> bool {
    if let Ok(value) = env::var(format!("STATE_{SETUP_STARTED_KEY}")) {
        return value == "true";
    }
    FALLBACK_STATE_PATH
        .as_ref()
        .map(|path| {
            std::fs::read_to_string(path)
                .map(|content| content.trim() == "true")
                .unwrap_or(false)
        })
        .unwrap_or(false)
}

/// Remove the fallback handoff flag, if any. The runner discards its own
/// state file after the post step.
pub fn clear_setup_started() {
    if let Some(path) = FALLBACK_STATE_PATH.as_ref() {
        let _ = std::fs::remove_file(path);
    }
}

/// Emit an inline error annotation in the job UI.
pub fn error_annotation(message: &str) {
    println!("::error::{}", escape_data(message));
}

/// Emit an inline warning annotation in the job UI.
pub fn warning_annotation(message: &str) {
    println!("::warning::{}", escape_data(message));
}

pub(crate) fn append_kv(path: &Path, name: &str, value: &str) -> Result<(), IoError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if value.contains('\n') {
        // Runner heredoc syntax for multi-line values
        writeln!(file, "{name}<<KUBESOLO_EOF")?;
        writeln!(file, "{value}")?;
        writeln!(file, "KUBESOLO_EOF")?;
    } else {
        writeln!(file, "{name}={value}")?;
    }
    Ok(())
}

// Workflow command data must not contain raw `%`, CR, or LF.
fn escape_data(data: &str) -> String {
    data.replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
