//! Firmware Updater
//!
//! Retrieves a firmware image from content-addressed storage and hands
//! it to the platform's flashing primitive. This is the only component
//! allowed a destructive side effect, and it only runs on the success
//! path of rollout resolution.

use crate::agent::backend::{ContentLocator, SessionToken, ACCESS_TOKEN_HEADER};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const IMAGE_FILE_NAME: &str = "firmware.bin";

/// Exit code an install command returns to signal the image is already
/// current and nothing was flashed.
pub const INSTALL_EXIT_NOT_NEEDED: i32 = 3;

/// Three-way result of one apply attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Image flashed; the device should restart into it.
    Applied,
    /// Platform determined no update was necessary. Benign no-op.
    NotNeeded,
    /// The attempt failed; prior steps are not rolled back.
    Failed { reason: String },
}

/// Applies a resolved firmware image using a bearer token for the
/// authenticated download.
pub trait Updater {
    fn apply(&self, token: &SessionToken, locator: &ContentLocator) -> UpdateOutcome;
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("no install command configured")]
    NoInstaller,
    #[error("install command exited with code {0:?}")]
    CommandFailed(Option<i32>),
    #[error("failed to run install command: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    NotNeeded,
}

/// Platform flashing primitive. The real implementation writes
/// non-volatile storage; tests substitute a mock.
pub trait FirmwareInstaller {
    fn install(&self, image: &Path) -> Result<InstallOutcome, InstallError>;
}

/// Installer that delegates flashing to a configured shell command,
/// with the staged image path in `FIRMWARE_IMAGE`.
pub struct ScriptInstaller {
    command: Option<String>,
}

impl ScriptInstaller {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

impl FirmwareInstaller for ScriptInstaller {
    fn install(&self, image: &Path) -> Result<InstallOutcome, InstallError> {
        let Some(command) = &self.command else {
            return Err(InstallError::NoInstaller);
        };

        #[cfg(unix)]
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("FIRMWARE_IMAGE", image)
            .status()?;

        #[cfg(windows)]
        let status = Command::new("cmd")
            .arg("/C")
            .arg(command)
            .env("FIRMWARE_IMAGE", image)
            .status()?;

        match status.code() {
            Some(0) => Ok(InstallOutcome::Installed),
            Some(INSTALL_EXIT_NOT_NEEDED) => Ok(InstallOutcome::NotNeeded),
            code => Err(InstallError::CommandFailed(code)),
        }
    }
}

#[derive(Debug, Serialize)]
struct DownloadRequest<'a> {
    cid: &'a str,
}

/// Updater that downloads the image over HTTPS and flashes it through a
/// `FirmwareInstaller`.
pub struct HttpUpdater<I> {
    client: reqwest::blocking::Client,
    download_url: String,
    staging_dir: PathBuf,
    installer: I,
}

impl<I: FirmwareInstaller> HttpUpdater<I> {
    pub fn new(download_url: String, staging_dir: PathBuf, installer: I) -> Self {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("ota-agent/", env!("CARGO_PKG_VERSION")))
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            download_url,
            staging_dir,
            installer,
        }
    }

    /// Download the image for `cid` into the staging directory.
    ///
    /// Returns `Ok(None)` when the server answers 304, its signal that
    /// the device already runs this image.
    fn download(&self, token: &SessionToken, cid: &str) -> Result<Option<PathBuf>, String> {
        let mut response = self
            .client
            .post(&self.download_url)
            .header(ACCESS_TOKEN_HEADER, token.as_str())
            .json(&DownloadRequest { cid })
            .send()
            .map_err(|e| format!("download request failed: {}", e))?;

        match decode_download_status(response.status().as_u16())? {
            DownloadStatus::NotModified => return Ok(None),
            DownloadStatus::Fetch => {}
        }

        fs::create_dir_all(&self.staging_dir)
            .map_err(|e| format!("cannot create staging dir: {}", e))?;
        let dest = self.staging_dir.join(IMAGE_FILE_NAME);
        let partial = dest.with_extension("partial");

        // Write to a partial file first, rename once complete, so a
        // truncated download never masquerades as a staged image.
        let mut file =
            File::create(&partial).map_err(|e| format!("cannot create staging file: {}", e))?;
        let bytes = response
            .copy_to(&mut file)
            .map_err(|e| format!("download interrupted: {}", e))?;
        fs::rename(&partial, &dest).map_err(|e| format!("cannot finalize image: {}", e))?;

        match sha256_hex(&dest) {
            Ok(digest) => info!(bytes, sha256 = %digest, "firmware image staged"),
            Err(e) => warn!("staged image but could not checksum it: {}", e),
        }
        Ok(Some(dest))
    }
}

impl<I: FirmwareInstaller> Updater for HttpUpdater<I> {
    fn apply(&self, token: &SessionToken, locator: &ContentLocator) -> UpdateOutcome {
        let image = match self.download(token, &locator.cid) {
            Ok(Some(path)) => path,
            Ok(None) => return UpdateOutcome::NotNeeded,
            Err(reason) => return UpdateOutcome::Failed { reason },
        };

        installer_outcome(self.installer.install(&image))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DownloadStatus {
    /// 200: the server is sending the image.
    Fetch,
    /// 304: the device already runs this image.
    NotModified,
}

fn decode_download_status(status: u16) -> Result<DownloadStatus, String> {
    match status {
        200 => Ok(DownloadStatus::Fetch),
        304 => Ok(DownloadStatus::NotModified),
        other => Err(format!("download failed: HTTP {}", other)),
    }
}

fn installer_outcome(result: Result<InstallOutcome, InstallError>) -> UpdateOutcome {
    match result {
        Ok(InstallOutcome::Installed) => UpdateOutcome::Applied,
        Ok(InstallOutcome::NotNeeded) => UpdateOutcome::NotNeeded,
        Err(e) => UpdateOutcome::Failed {
            reason: format!("install failed: {}", e),
        },
    }
}

/// SHA-256 of a file, lowercase hex. Logged for every staged image so
/// a flashed build can be traced back to its download.
pub fn sha256_hex(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
