//! Release resolution, artifact download, and binary installation.

use std::fs::File;
use std::io::{Error as IoError, ErrorKind, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::SetupError;

/// Name of the executable inside the release archive.
pub const TARGET_BINARY: &str = "kubesolo";

const RELEASE_API_URL: &str = "https://api.github.com/repos/portainer/kubesolo/releases/latest";
const DOWNLOAD_BASE_URL: &str = "https://github.com/portainer/kubesolo/releases/download";
const USER_AGENT: &str = "setup-kubesolo";

/// Map a CPU architecture identifier onto the release naming convention.
///
/// Anything outside the supported set is a hard error, raised before any
/// download is attempted.
pub fn target_arch(machine: &str) -> Result<&'static str, SetupError> {
    match machine {
        "x86_64" => Ok("amd64"),
        "aarch64" | "arm64" => Ok("arm64"),
        "armv7l" | "arm" => Ok("arm"),
        other => Err(SetupError::UnsupportedArchitecture(other.to_string())),
    }
}

/// Deterministic artifact URL for a concrete version and architecture.
pub fn download_url(version: &str, arch: &str) -> String {
    format!("{DOWNLOAD_BASE_URL}/{version}/kubesolo-linux-{arch}.tar.gz")
}

/// Release metadata and artifact access.
///
/// Seam over the release host so version resolution and downloads are
/// mockable.
#[cfg_attr(test, mockall::automock)]
pub trait ReleaseClient: Send + Sync {
    /// Tag of the most recent release
    fn latest_tag(&self) -> Result<String, SetupError>;

    /// Download a release artifact to memory
    fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, SetupError>;
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

/// Production client against the release host.
#[derive(Debug, Default)]
pub struct HttpReleaseClient;

impl ReleaseClient for HttpReleaseClient {
    #[instrument(skip(self))]
    fn latest_tag(&self) -> Result<String, SetupError> {
        let release: Release = ureq::get(RELEASE_API_URL)
            .set("User-Agent", USER_AGENT)
            .call()
            .map_err(|err| SetupError::Download {
                url: RELEASE_API_URL.to_string(),
                source: Box::new(err),
            })?
            .into_json()
            .map_err(SetupError::IoError)?;
        debug!(tag = %release.tag_name, "latest release");
        Ok(release.tag_name)
    }

    #[instrument(skip(self))]
    fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, SetupError> {
        let response = ureq::get(url)
            .set("User-Agent", USER_AGENT)
            .call()
            .map_err(|err| SetupError::Download {
                url: url.to_string(),
                source: Box::new(err),
            })?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(SetupError::IoError)?;
        debug!(len = bytes.len(), "downloaded artifact");
        Ok(bytes)
    }
}

/// Resolve the requested version to a concrete release tag.
#[instrument(skip(releases))]
pub fn resolve_version(releases: &dyn ReleaseClient, requested: &str) -> Result<String, SetupError> {
    if requested != "latest" {
        return Ok(requested.to_string());
    }
    let tag = releases.latest_tag()?;
    if tag.trim().is_empty() {
        return Err(SetupError::EmptyVersionResolution);
    }
    match semver::Version::parse(tag.trim().trim_start_matches('v')) {
        Ok(version) => debug!(%version, "resolved latest release"),
        Err(_) => warn!(%tag, "release tag is not semver, using it verbatim"),
    }
    Ok(tag.trim().to_string())
}

/// Pull the named executable out of a gzipped tarball.
pub fn extract_binary(archive: &[u8], name: &str) -> Result<Vec<u8>, SetupError> {
    let mut tarball = tar::Archive::new(GzDecoder::new(archive));
    for entry in tarball.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let matches = entry
            .path()?
            .file_name()
            .map(|file| file.to_string_lossy() == name)
            .unwrap_or(false);
        if matches {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            return Ok(bytes);
        }
    }
    Err(SetupError::BinaryNotInArchive(name.to_string()))
}

/// Write the executable atomically: temp file in the destination's parent,
/// mark executable, then rename over the final path.
pub fn install_bin<P: AsRef<Path>, B: AsRef<[u8]>>(bin_path: P, bytes: B) -> Result<(), SetupError> {
    use std::io::Write as _;

    let bin_path = bin_path.as_ref();

    let parent = bin_path
        .parent()
        .ok_or_else(|| IoError::new(ErrorKind::NotFound, "parent directory not found"))?;
    std::fs::create_dir_all(parent)?;

    let tmp_dir = tempfile::Builder::new()
        .prefix("kubesolo-tmp")
        .tempdir_in(parent)?;

    let tmp_path = tmp_dir.path().join("kubesolo-exe-tmp");
    let mut tmp_file = File::create(&tmp_path)?;
    tmp_file.write_all(bytes.as_ref())?;

    make_executable(&mut tmp_file)?;

    // atomic move on unix
    std::fs::rename(&tmp_path, bin_path)?;

    Ok(())
}

#[cfg(unix)]
fn make_executable(file: &mut File) -> Result<(), IoError> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = file.metadata()?.permissions();
    let mut mode = permissions.mode();
    mode |= 0o755;
    permissions.set_mode(mode);

    file.set_permissions(permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_file: &mut File) -> Result<(), IoError> {
    Ok(())
}
