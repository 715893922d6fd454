//! Document records shared by the upload and simplification flows

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an uploaded document
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Uploaded,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
        }
    }

    /// Status only moves forward out of `Uploaded`
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (DocumentStatus::Uploaded, DocumentStatus::Processed)
                | (DocumentStatus::Uploaded, DocumentStatus::Failed)
        )
    }
}

impl From<String> for DocumentStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processed" => DocumentStatus::Processed,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::Uploaded,
        }
    }
}

impl From<DocumentStatus> for String {
    fn from(status: DocumentStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Metadata describing one uploaded file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    /// Id assigned by whichever store accepted the write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub file_name: String,

    pub original_name: String,

    /// MIME type reported by the client
    pub file_type: String,

    /// Size in bytes
    pub file_size: u64,

    /// Server-local path of the persisted bytes
    pub file_path: String,

    #[serde(default)]
    pub status: DocumentStatus,

    pub uploaded_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simplified_text: Option<String>,

    /// Id of the same document in the other store, when dual-written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_id: Option<String>,

    /// Subject of the authenticated uploader
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl DocumentRecord {
    /// Build a fresh `uploaded` record for a persisted file
    pub fn uploaded(
        file_name: impl Into<String>,
        original_name: impl Into<String>,
        file_type: impl Into<String>,
        file_size: u64,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            file_name: file_name.into(),
            original_name: original_name.into(),
            file_type: file_type.into(),
            file_size,
            file_path: file_path.into(),
            status: DocumentStatus::Uploaded,
            uploaded_at: Utc::now(),
            processed_at: None,
            simplified_text: None,
            linked_id: None,
            owner_id: None,
        }
    }

    /// Apply a status patch, refusing backward transitions
    pub fn apply(&mut self, patch: &StatusPatch) -> bool {
        if !self.status.can_transition_to(patch.status) {
            return false;
        }
        self.status = patch.status;
        self.processed_at = Some(patch.processed_at);
        if patch.simplified_text.is_some() {
            self.simplified_text = patch.simplified_text.clone();
        }
        true
    }
}

/// Mutation applied once a simplification run completes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPatch {
    pub status: DocumentStatus,
    pub processed_at: DateTime<Utc>,
    pub simplified_text: Option<String>,
}

impl StatusPatch {
    /// Patch marking a document processed with its simplified text
    pub fn processed(simplified_text: impl Into<String>) -> Self {
        Self {
            status: DocumentStatus::Processed,
            processed_at: Utc::now(),
            simplified_text: Some(simplified_text.into()),
        }
    }
}

/// Ids a document received from the primary and secondary stores
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreIds {
    #[serde(rename = "firebaseId", alias = "primaryId", default)]
    pub primary_id: Option<String>,

    #[serde(rename = "mongoId", alias = "secondaryId", default)]
    pub secondary_id: Option<String>,
}

impl StoreIds {
    pub fn is_empty(&self) -> bool {
        self.primary_id.is_none() && self.secondary_id.is_none()
    }

    /// Both stores accepted the write
    pub fn is_dual(&self) -> bool {
        self.primary_id.is_some() && self.secondary_id.is_some()
    }

    /// Preferred single id: primary first
    pub fn first(&self) -> Option<&str> {
        self.primary_id
            .as_deref()
            .or(self.secondary_id.as_deref())
    }
}

/// Id for records kept in the local metadata file
pub fn generate_local_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("local-{}-{}", Utc::now().timestamp_millis(), suffix)
}
