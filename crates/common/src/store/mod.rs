//! Document store adapter
//!
//! Abstracts over an optional primary store (Firestore) and an optional
//! secondary mirror (SQL), with best-effort dual-write semantics. When neither
//! is available callers fall back to the local metadata file.

mod firestore;
mod local;
#[cfg(any(test, feature = "test-utils"))]
mod memory;

pub use firestore::{FirestoreStore, FirestoreValue};
pub use local::LocalMetadataStore;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;

use crate::errors::{AppError, Result};
use crate::metrics;
use crate::models::{DocumentRecord, StatusPatch, StoreIds};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// A document database holding document records
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Insert a record, returning the id this store assigned
    async fn create(&self, record: &DocumentRecord, linked_id: Option<&str>) -> Result<String>;

    /// Apply a status patch to an existing record. A patch the record's
    /// current status cannot move to is an error and leaves it untouched.
    async fn update(&self, id: &str, patch: &StatusPatch) -> Result<()>;

    /// Record the other store's id on an existing record
    async fn link(&self, id: &str, linked_id: &str) -> Result<()>;

    /// Check connectivity
    async fn ping(&self) -> Result<()>;
}

/// Which stores are configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    PrimaryOnly,
    SecondaryOnly,
    DualWrite,
    LocalOnly,
}

impl StoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreMode::PrimaryOnly => "primary_only",
            StoreMode::SecondaryOnly => "secondary_only",
            StoreMode::DualWrite => "dual_write",
            StoreMode::LocalOnly => "local_only",
        }
    }
}

/// The configured primary and secondary stores
#[derive(Clone, Default)]
pub struct DocumentStores {
    primary: Option<Arc<dyn DocumentStore>>,
    secondary: Option<Arc<dyn DocumentStore>>,
}

impl DocumentStores {
    pub fn new(
        primary: Option<Arc<dyn DocumentStore>>,
        secondary: Option<Arc<dyn DocumentStore>>,
    ) -> Self {
        Self { primary, secondary }
    }

    /// No store configured; callers use the local fallback
    pub fn none() -> Self {
        Self::default()
    }

    pub fn primary(&self) -> Option<&Arc<dyn DocumentStore>> {
        self.primary.as_ref()
    }

    pub fn secondary(&self) -> Option<&Arc<dyn DocumentStore>> {
        self.secondary.as_ref()
    }

    pub fn mode(&self) -> StoreMode {
        match (&self.primary, &self.secondary) {
            (Some(_), Some(_)) => StoreMode::DualWrite,
            (Some(_), None) => StoreMode::PrimaryOnly,
            (None, Some(_)) => StoreMode::SecondaryOnly,
            (None, None) => StoreMode::LocalOnly,
        }
    }

    /// True when at least one store is configured
    pub fn is_available(&self) -> bool {
        self.mode() != StoreMode::LocalOnly
    }

    /// Write a record to every configured store.
    ///
    /// Best-effort: a failure in one store does not undo the other. Errors
    /// only when every configured store rejected the write.
    pub async fn create(&self, record: &DocumentRecord) -> Result<StoreIds> {
        let mut ids = StoreIds::default();
        let mut last_error = None;

        if let Some(primary) = &self.primary {
            match primary.create(record, None).await {
                Ok(id) => {
                    metrics::record_store_write(primary.name(), "create", true);
                    ids.primary_id = Some(id);
                }
                Err(e) => {
                    metrics::record_store_write(primary.name(), "create", false);
                    warn!(store = primary.name(), error = ?e, "Primary store write failed");
                    last_error = Some(e);
                }
            }
        }

        if let Some(secondary) = &self.secondary {
            match secondary.create(record, ids.primary_id.as_deref()).await {
                Ok(id) => {
                    metrics::record_store_write(secondary.name(), "create", true);
                    ids.secondary_id = Some(id);
                }
                Err(e) => {
                    metrics::record_store_write(secondary.name(), "create", false);
                    warn!(store = secondary.name(), error = ?e, "Secondary store write failed");
                    last_error = Some(e);
                }
            }
        }

        // Back-link the primary record now that the secondary id is known
        if let (Some(primary), Some(pid), Some(sid)) =
            (&self.primary, ids.primary_id.as_deref(), ids.secondary_id.as_deref())
        {
            if let Err(e) = primary.link(pid, sid).await {
                warn!(store = primary.name(), id = pid, error = ?e, "Failed to link primary record");
            }
        }

        if ids.is_empty() {
            return Err(last_error.unwrap_or_else(|| AppError::store("none", "no document store configured")));
        }

        info!(
            primary_id = ?ids.primary_id,
            secondary_id = ?ids.secondary_id,
            mode = self.mode().as_str(),
            "Document record created"
        );

        Ok(ids)
    }

    /// Patch the records named by `ids`.
    ///
    /// A store is only touched when the caller supplied its id. Every relevant
    /// store is attempted; any failure is reported as a status-update error.
    pub async fn update_status(&self, ids: &StoreIds, patch: &StatusPatch) -> Result<()> {
        let targets = [
            (self.primary.as_ref(), ids.primary_id.as_deref()),
            (self.secondary.as_ref(), ids.secondary_id.as_deref()),
        ];

        let mut failures = Vec::new();
        for (store, id) in targets {
            let (Some(store), Some(id)) = (store, id) else {
                continue;
            };
            match store.update(id, patch).await {
                Ok(()) => metrics::record_store_write(store.name(), "update", true),
                Err(e) => {
                    metrics::record_store_write(store.name(), "update", false);
                    warn!(store = store.name(), id, error = ?e, "Status update failed");
                    failures.push(format!("{}: {:?}", store.name(), e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AppError::StatusUpdate {
                message: failures.join("; "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentStatus;

    fn record() -> DocumentRecord {
        DocumentRecord::uploaded("f.txt", "f.txt", "text/plain", 3, "uploads/f.txt")
    }

    #[test]
    fn test_mode_selection() {
        let a: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new("a"));
        let b: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new("b"));

        assert_eq!(DocumentStores::none().mode(), StoreMode::LocalOnly);
        assert!(!DocumentStores::none().is_available());
        assert_eq!(DocumentStores::new(Some(a.clone()), None).mode(), StoreMode::PrimaryOnly);
        assert_eq!(DocumentStores::new(None, Some(b.clone())).mode(), StoreMode::SecondaryOnly);
        assert_eq!(DocumentStores::new(Some(a), Some(b)).mode(), StoreMode::DualWrite);
    }

    #[tokio::test]
    async fn test_dual_write_links_records() {
        let primary = Arc::new(MemoryStore::new("primary"));
        let secondary = Arc::new(MemoryStore::new("secondary"));
        let stores = DocumentStores::new(Some(primary.clone()), Some(secondary.clone()));

        let ids = stores.create(&record()).await.unwrap();
        assert!(ids.is_dual());

        let p = primary.get(ids.primary_id.as_deref().unwrap()).unwrap();
        let s = secondary.get(ids.secondary_id.as_deref().unwrap()).unwrap();
        assert_eq!(p.linked_id, ids.secondary_id);
        assert_eq!(s.linked_id, ids.primary_id);
    }

    #[tokio::test]
    async fn test_dual_write_is_best_effort() {
        let primary = Arc::new(MemoryStore::new("primary"));
        let secondary = Arc::new(MemoryStore::new("secondary"));
        secondary.fail_writes(true);
        let stores = DocumentStores::new(Some(primary.clone()), Some(secondary.clone()));

        let ids = stores.create(&record()).await.unwrap();
        assert!(ids.primary_id.is_some());
        assert!(ids.secondary_id.is_none());
        // Primary write is not rolled back
        assert_eq!(primary.len(), 1);
        assert_eq!(secondary.len(), 0);
    }

    #[tokio::test]
    async fn test_create_fails_when_every_store_fails() {
        let primary = Arc::new(MemoryStore::new("primary"));
        primary.fail_writes(true);
        let stores = DocumentStores::new(Some(primary), None);

        let err = stores.create(&record()).await.unwrap_err();
        assert!(matches!(err, AppError::Store { .. }));
    }

    #[tokio::test]
    async fn test_update_only_touches_supplied_ids() {
        let primary = Arc::new(MemoryStore::new("primary"));
        let secondary = Arc::new(MemoryStore::new("secondary"));
        let stores = DocumentStores::new(Some(primary.clone()), Some(secondary.clone()));

        let ids = stores.create(&record()).await.unwrap();
        let only_primary = StoreIds {
            primary_id: ids.primary_id.clone(),
            secondary_id: None,
        };

        stores
            .update_status(&only_primary, &StatusPatch::processed("done"))
            .await
            .unwrap();

        let p = primary.get(ids.primary_id.as_deref().unwrap()).unwrap();
        let s = secondary.get(ids.secondary_id.as_deref().unwrap()).unwrap();
        assert_eq!(p.status, DocumentStatus::Processed);
        assert_eq!(s.status, DocumentStatus::Uploaded);
        assert_eq!(secondary.update_count(), 0);
    }

    #[tokio::test]
    async fn test_update_failure_is_status_update_error() {
        let primary = Arc::new(MemoryStore::new("primary"));
        let stores = DocumentStores::new(Some(primary.clone()), None);
        let ids = stores.create(&record()).await.unwrap();

        primary.fail_writes(true);
        let err = stores
            .update_status(&ids, &StatusPatch::processed("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StatusUpdate { .. }));
    }

    #[tokio::test]
    async fn test_update_with_no_ids_is_noop() {
        let primary = Arc::new(MemoryStore::new("primary"));
        let stores = DocumentStores::new(Some(primary.clone()), None);

        stores
            .update_status(&StoreIds::default(), &StatusPatch::processed("x"))
            .await
            .unwrap();
        assert_eq!(primary.update_count(), 0);
    }
}
