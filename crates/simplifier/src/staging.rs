//! Input staging
//!
//! Raw text is written to a uniquely named temp file so the simplifier always
//! receives a path. Caller-supplied paths are passed through untouched.
//!
//! Temp files are owned by a `TempPath`: they are removed when the staged
//! input is dropped, including when the request future is cancelled mid-run.

use crate::errors::SimplifyError;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, warn};

/// Resolve `path` against the working directory
pub(crate) fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[derive(Debug)]
enum Staged {
    Temporary(TempPath),
    Supplied(PathBuf),
}

/// A file ready to hand to the simplifier
#[derive(Debug)]
pub struct StagedInput {
    inner: Staged,
}

impl StagedInput {
    /// Absolute path of the staged file
    pub fn path(&self) -> &Path {
        match &self.inner {
            Staged::Temporary(temp) => &**temp,
            Staged::Supplied(path) => path.as_path(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.inner, Staged::Temporary(_))
    }

    /// Remove the file now if it was created by staging. Failures are logged only.
    pub fn cleanup(self) {
        let Staged::Temporary(temp) = self.inner else {
            return;
        };
        let path = temp.to_path_buf();
        match temp.close() {
            Ok(()) => debug!(path = %path.display(), "Removed staged temp file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staged temp file"),
        }
    }
}

/// Stages simplifier input under a scratch directory
#[derive(Debug, Clone)]
pub struct Stager {
    scratch_dir: PathBuf,
}

impl Stager {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Write `text` to a fresh `temp_{millis}_{random}.txt` file
    pub async fn stage_text(&self, text: &str) -> Result<StagedInput, SimplifyError> {
        let staging_err =
            |e: std::io::Error| SimplifyError::Staging(format!("{}: {}", self.scratch_dir.display(), e));

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(staging_err)?;
        let dir = absolutize(&self.scratch_dir)?;

        let prefix = format!("temp_{}_", chrono::Utc::now().timestamp_millis());
        let temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".txt")
            .tempfile_in(&dir)
            .map_err(staging_err)?
            .into_temp_path();

        tokio::fs::write(&temp, text)
            .await
            .map_err(|e| SimplifyError::Staging(format!("{}: {}", temp.display(), e)))?;

        debug!(path = %temp.display(), bytes = text.len(), "Staged raw text");
        Ok(StagedInput {
            inner: Staged::Temporary(temp),
        })
    }

    /// Use an existing file as-is; it is never deleted
    pub fn stage_path(&self, path: impl AsRef<Path>) -> Result<StagedInput, SimplifyError> {
        Ok(StagedInput {
            inner: Staged::Supplied(absolutize(path.as_ref())?),
        })
    }
}
