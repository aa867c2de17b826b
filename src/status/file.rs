//! Whole-document status file reads and writes.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::models::status::StatusFile;
use crate::{AppError, Result};

/// Writes the status document by full replacement.
///
/// Each write lands in a temporary file in the same directory and is then
/// renamed over the target, so a reader sees either the old or the new
/// document and never a torn one.
#[derive(Debug, Clone)]
pub struct StatusWriter {
    path: PathBuf,
}

impl StatusWriter {
    /// Writer targeting `path`. Parent directories are created on write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the document on disk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory or temp file cannot be
    /// created, `AppError::StatusFile` if serialization or the rename fails.
    pub fn write(&self, doc: &StatusFile) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|err| {
            AppError::Io(format!("failed to create status dir {}: {err}", dir.display()))
        })?;

        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|err| AppError::Io(format!("failed to create temp status file: {err}")))?;
        serde_json::to_writer_pretty(&mut tmp, doc)?;
        tmp.flush()
            .map_err(|err| AppError::Io(format!("failed to flush status file: {err}")))?;

        tmp.persist(&self.path).map_err(|err| {
            AppError::StatusFile(format!(
                "failed to replace {}: {}",
                self.path.display(),
                err.error
            ))
        })?;
        Ok(())
    }
}

/// Read and parse the document once. A missing file is `Ok(None)`.
///
/// # Errors
///
/// Returns `AppError::Io` if the file exists but cannot be read, or
/// `AppError::StatusFile` if it does not parse.
pub fn read_status(path: &Path) -> Result<Option<StatusFile>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::Io(format!(
            "failed to read {}: {err}",
            path.display()
        ))),
    }
}

/// Read the document, retrying parse and read failures up to `attempts`
/// times with a linearly growing delay.
///
/// # Errors
///
/// Returns the last error once every attempt has failed. Callers treat
/// that as "try again shortly".
pub async fn read_status_with_retry(
    path: &Path,
    attempts: u32,
    backoff: Duration,
) -> Result<Option<StatusFile>> {
    let mut attempt = 1;
    loop {
        match read_status(path) {
            Ok(doc) => return Ok(doc),
            Err(err) if attempt < attempts => {
                debug!(attempt, %err, "status read failed, retrying");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
