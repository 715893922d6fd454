//! SQL implementation of the document store

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::models::{DocumentRecord, StatusPatch};
use crate::store::DocumentStore;
use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

const STORE_NAME: &str = "sql";

/// Document store over a SeaORM connection
#[derive(Clone)]
pub struct SqlDocumentStore {
    pool: DbPool,
}

impl SqlDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn parse_id(id: &str) -> Result<Uuid> {
        Uuid::parse_str(id).map_err(|_| AppError::store(STORE_NAME, format!("invalid document id '{}'", id)))
    }

    async fn find(&self, id: Uuid) -> Result<Document> {
        DocumentEntity::find_by_id(id)
            .one(self.pool.conn())
            .await?
            .ok_or_else(|| AppError::store(STORE_NAME, format!("no document {}", id)))
    }

    /// Load a record by id
    pub async fn get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let id = Self::parse_id(id)?;
        Ok(DocumentEntity::find_by_id(id)
            .one(self.pool.conn())
            .await?
            .map(DocumentRecord::from))
    }
}

#[async_trait]
impl DocumentStore for SqlDocumentStore {
    fn name(&self) -> &'static str {
        STORE_NAME
    }

    async fn create(&self, record: &DocumentRecord, linked_id: Option<&str>) -> Result<String> {
        let id = Uuid::new_v4();

        let document = DocumentActiveModel {
            id: Set(id),
            file_name: Set(record.file_name.clone()),
            original_name: Set(record.original_name.clone()),
            file_type: Set(record.file_type.clone()),
            file_size: Set(record.file_size as i64),
            file_path: Set(record.file_path.clone()),
            status: Set(record.status.into()),
            uploaded_at: Set(record.uploaded_at),
            processed_at: Set(record.processed_at),
            simplified_text: Set(record.simplified_text.clone()),
            firebase_id: Set(linked_id.map(String::from)),
            owner_id: Set(record.owner_id.clone()),
        };

        document.insert(self.pool.conn()).await?;
        Ok(id.to_string())
    }

    async fn update(&self, id: &str, patch: &StatusPatch) -> Result<()> {
        let existing = self.find(Self::parse_id(id)?).await?;
        if !existing.status_enum().can_transition_to(patch.status) {
            return Err(AppError::store(
                STORE_NAME,
                format!("document {} cannot move from {} to {}", id, existing.status, patch.status.as_str()),
            ));
        }

        let mut document: DocumentActiveModel = existing.into();
        document.status = Set(patch.status.into());
        document.processed_at = Set(Some(patch.processed_at));
        if let Some(text) = &patch.simplified_text {
            document.simplified_text = Set(Some(text.clone()));
        }

        document.update(self.pool.conn()).await?;
        Ok(())
    }

    async fn link(&self, id: &str, linked_id: &str) -> Result<()> {
        let mut document: DocumentActiveModel = self.find(Self::parse_id(id)?).await?.into();
        document.firebase_id = Set(Some(linked_id.to_string()));
        document.update(self.pool.conn()).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
