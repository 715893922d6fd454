//! Document entity

use crate::models::{DocumentRecord, DocumentStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub file_name: String,

    #[sea_orm(column_type = "Text")]
    pub original_name: String,

    #[sea_orm(column_type = "Text")]
    pub file_type: String,

    pub file_size: i64,

    #[sea_orm(column_type = "Text")]
    pub file_path: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub uploaded_at: DateTimeUtc,

    pub processed_at: Option<DateTimeUtc>,

    #[sea_orm(column_type = "Text", nullable)]
    pub simplified_text: Option<String>,

    /// Id of the same document in the primary store
    #[sea_orm(column_type = "Text", nullable)]
    pub firebase_id: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub owner_id: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Get the document status as an enum
    pub fn status_enum(&self) -> DocumentStatus {
        DocumentStatus::from(self.status.clone())
    }
}

impl From<Model> for DocumentRecord {
    fn from(model: Model) -> Self {
        let status = model.status_enum();
        DocumentRecord {
            id: Some(model.id.to_string()),
            file_name: model.file_name,
            original_name: model.original_name,
            file_type: model.file_type,
            file_size: model.file_size.max(0) as u64,
            file_path: model.file_path,
            status,
            uploaded_at: model.uploaded_at,
            processed_at: model.processed_at,
            simplified_text: model.simplified_text,
            linked_id: model.firebase_id,
            owner_id: model.owner_id,
        }
    }
}
