//! Local metadata file used when no document store is configured
//!
//! The file holds a single JSON array of records. Every write is a full
//! read-modify-write, serialised through one in-process writer and committed
//! with a temp-file rename.

use crate::errors::{AppError, Result};
use crate::models::{generate_local_id, DocumentRecord, StatusPatch};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const STORE_NAME: &str = "local";

pub struct LocalMetadataStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl LocalMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records; a missing or corrupt file reads as empty
    pub async fn list(&self) -> Vec<DocumentRecord> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read metadata file");
                return Vec::new();
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Metadata file is corrupt; treating as empty");
                Vec::new()
            }
        }
    }

    async fn write_all(&self, records: &[DocumentRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let body = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| AppError::Internal {
            message: format!("Failed to commit metadata file: {}", e),
        })?;
        Ok(())
    }

    /// Append a record, assigning a local id. Returns the stored record.
    pub async fn append(&self, mut record: DocumentRecord) -> Result<DocumentRecord> {
        let _guard = self.writer.lock().await;

        let id = generate_local_id();
        record.id = Some(id.clone());

        let mut records = self.list().await;
        records.push(record.clone());
        self.write_all(&records).await?;

        debug!(id = %id, total = records.len(), "Appended local metadata record");
        Ok(record)
    }

    /// Patch a record by id. Returns false when no such record exists and an
    /// error when the record's status cannot move to the patched one.
    pub async fn update(&self, id: &str, patch: &StatusPatch) -> Result<bool> {
        let _guard = self.writer.lock().await;

        let mut records = self.list().await;
        let Some(record) = records.iter_mut().find(|r| r.id.as_deref() == Some(id)) else {
            return Ok(false);
        };

        if !record.apply(patch) {
            warn!(id, status = record.status.as_str(), "Refusing status transition");
            return Err(AppError::store(
                STORE_NAME,
                format!("document {} cannot move from {} to {}", id, record.status.as_str(), patch.status.as_str()),
            ));
        }

        self.write_all(&records).await?;
        Ok(true)
    }
}
