use std::io::Error as IoError;
use std::path::PathBuf;

use indicatif::style::TemplateError;

use crate::check::ReadinessError;

/// The types of errors that can occur during cluster management
#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    /// An error occurred while setting up KubeSolo on this host
    #[error("Failed to set up KubeSolo")]
    Setup(#[from] SetupError),
    /// An error occurred while tearing down KubeSolo
    #[error("Failed to tear down KubeSolo")]
    Uninstall(#[from] UninstallError),
    #[error("Progress Error")]
    Progress(#[from] TemplateError),
}

/// Errors that may occur while installing KubeSolo
///
/// These are the hard errors: each one aborts setup, because continuing
/// would leave a silently-broken cluster behind.
#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    /// The host CPU architecture has no matching release artifact
    #[error("Unsupported CPU architecture: {0}")]
    UnsupportedArchitecture(String),
    /// The release lookup came back empty
    #[error("Release lookup resolved to an empty version tag")]
    EmptyVersionResolution,
    /// Failed to download the release artifact
    #[error("Failed to download {url}")]
    Download {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
    /// The release archive did not contain the expected executable
    #[error("Release archive does not contain the {0} executable")]
    BinaryNotInArchive(String),
    /// An error occurred creating the data directory
    #[error("An error occurred creating the data directory {path:?}")]
    DataDirectory {
        path: PathBuf,
        #[source]
        source: IoError,
    },
    /// The service manager refused to activate the installed unit
    #[error("Failed to activate unit {unit}: {detail}")]
    UnitActivation { unit: String, detail: String },
    /// An IO error occurred, such as writing a file or running a command.
    #[error(transparent)]
    IoError(#[from] IoError),
    /// The cluster did not become ready
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    /// Attempted to construct a Config object without all required fields
    #[error("Missing required config option {0}")]
    MissingRequiredConfig(String),
    #[error("Progress Error")]
    Progress(#[from] TemplateError),
    /// A different kind of error occurred.
    #[error("An unknown error occurred: {0}")]
    Other(String),
}

/// Errors that may occur while tearing down KubeSolo
///
/// Cleanup is best-effort by design: individual steps demote their failures
/// to warnings, so this type only covers infrastructure of the cleanup run
/// itself.
#[derive(thiserror::Error, Debug)]
pub enum UninstallError {
    /// An IO error occurred, such as opening a file or running a command.
    #[error(transparent)]
    IoError(#[from] IoError),
    #[error("Progress Error")]
    Progress(#[from] TemplateError),
    /// A different kind of error occurred.
    #[error("An unknown error occurred: {0}")]
    Other(String),
}
