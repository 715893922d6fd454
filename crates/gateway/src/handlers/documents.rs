//! Document upload and simplification handlers

use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        rejection::JsonRejection,
        Multipart, State,
    },
    http::StatusCode,
    Extension, Json,
};
use lexplain_common::{
    auth::Identity,
    errors::{AppError, Result},
    metrics,
    models::{DocumentRecord, StoreIds},
};
use lexplain_simplifier::SimplifyRequest;
use rand::Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::AppState;

const DEFAULT_FILE_TYPE: &str = "application/octet-stream";

/// Response after an upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Present only when both stores accepted the record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<StoreIds>,
    pub data: DocumentRecord,
}

/// Response after a simplification
#[derive(Debug, Serialize)]
pub struct SimplifyResponse {
    pub success: bool,
    pub output: String,
}

/// A file persisted from the `file` field
#[derive(Debug)]
struct SavedFile {
    file_name: String,
    original_name: String,
    file_type: String,
    size: u64,
    path: PathBuf,
}

/// Keep only a short alphanumeric extension from a client-supplied name
fn safe_extension(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 16 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Final path component of a client-supplied name
fn display_name(raw: Option<&str>) -> String {
    raw.and_then(|n| n.rsplit(['/', '\\']).next())
        .filter(|n| !n.is_empty())
        .unwrap_or("file")
        .to_string()
}

fn storage_name(original_name: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!(
        "{}-{}{}",
        chrono::Utc::now().timestamp_millis(),
        suffix,
        safe_extension(original_name)
    )
}

fn read_error(e: axum::extract::multipart::MultipartError, limit: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit }
    } else {
        debug!(error = %e.body_text(), "Malformed multipart body");
        AppError::Validation {
            message: "Malformed upload".to_string(),
            field: Some("file".to_string()),
        }
    }
}

/// Stream one field to disk, enforcing the size limit
async fn save_field(mut field: Field<'_>, dir: &Path, limit: usize) -> Result<SavedFile> {
    let original_name = display_name(field.file_name());
    let file_type = field
        .content_type()
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_FILE_TYPE)
        .to_string();

    tokio::fs::create_dir_all(dir).await?;
    let file_name = storage_name(&original_name);
    let path = dir.join(&file_name);

    let mut file = tokio::fs::File::create(&path).await?;
    let mut size: u64 = 0;

    let written = async {
        while let Some(chunk) = field.chunk().await.map_err(|e| read_error(e, limit))? {
            size += chunk.len() as u64;
            if size > limit as u64 {
                return Err(AppError::PayloadTooLarge { limit });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok::<(), AppError>(())
    }
    .await;

    if let Err(e) = written {
        drop(file);
        if let Err(rm) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %rm, "Failed to remove partial upload");
        }
        return Err(e);
    }

    Ok(SavedFile {
        file_name,
        original_name,
        file_type,
        size,
        path,
    })
}

/// Upload one document (multipart field `file`)
#[instrument(skip_all)]
pub async fn upload(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let mut multipart = multipart?;
    let limit = state.config.uploads.max_file_size;
    let mode = state.stores.mode().as_str();

    let mut saved = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| read_error(e, limit))? {
        if saved.is_some() || field.name() != Some("file") {
            continue;
        }
        saved = Some(save_field(field, &state.config.uploads.dir, limit).await?);
    }

    let Some(saved) = saved else {
        return Err(AppError::Validation {
            message: "No file uploaded".to_string(),
            field: Some("file".to_string()),
        });
    };

    let mut record = DocumentRecord::uploaded(
        saved.file_name,
        saved.original_name,
        saved.file_type,
        saved.size,
        saved.path.display().to_string(),
    );
    record.owner_id = identity.map(|Extension(identity)| identity.uid);

    match persist(&state, record).await {
        Ok(response) => {
            metrics::record_upload(saved.size, mode, true);
            info!(
                id = ?response.id,
                size = saved.size,
                mode,
                "Document uploaded"
            );
            Ok((StatusCode::CREATED, Json(response)))
        }
        Err(e) => {
            metrics::record_upload(saved.size, mode, false);
            Err(AppError::Upload {
                message: format!("{:?}", e),
            })
        }
    }
}

/// Write the record to the configured stores, or the local file when none is
async fn persist(state: &AppState, record: DocumentRecord) -> Result<UploadResponse> {
    if !state.stores.is_available() {
        let stored = state.local.append(record).await?;
        return Ok(UploadResponse {
            success: true,
            id: stored.id.clone(),
            ids: None,
            data: stored,
        });
    }

    let ids = state.stores.create(&record).await?;
    let id = ids.first().map(String::from);
    Ok(UploadResponse {
        success: true,
        id,
        ids: ids.is_dual().then_some(ids),
        data: record,
    })
}

/// Simplify a file path or raw text
///
/// A body without a JSON content type reads as an empty request.
pub async fn simplify(
    State(state): State<AppState>,
    body: std::result::Result<Json<SimplifyRequest>, JsonRejection>,
) -> Result<Json<SimplifyResponse>> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => SimplifyRequest::default(),
        Err(rejection) => return Err(rejection.into()),
    };
    let output = state.simplification.simplify(&request).await?;

    Ok(Json(SimplifyResponse {
        success: true,
        output,
    }))
}
