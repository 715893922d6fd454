//! Firestore primary store over the REST API
//!
//! Authenticates with the service-account JWT bearer flow: an RS256 assertion
//! is exchanged for an access token, which is cached until shortly before it
//! expires.

use super::DocumentStore;
use crate::config::FirebaseConfig;
use crate::credentials::ServiceAccount;
use crate::errors::{AppError, Result};
use crate::models::{DocumentRecord, DocumentStatus, StatusPatch};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

const STORE_NAME: &str = "firestore";
const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Refresh tokens this long before they expire
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Typed Firestore field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FirestoreValue {
    #[serde(rename = "stringValue")]
    String(String),

    /// int64 values travel as decimal strings
    #[serde(rename = "integerValue")]
    Integer(String),

    #[serde(rename = "nullValue")]
    Null(()),
}

impl FirestoreValue {
    pub fn string(value: impl Into<String>) -> Self {
        FirestoreValue::String(value.into())
    }

    pub fn integer(value: i64) -> Self {
        FirestoreValue::Integer(value.to_string())
    }

    pub fn optional(value: Option<impl Into<String>>) -> Self {
        value.map(Self::string).unwrap_or(FirestoreValue::Null(()))
    }
}

type Fields = BTreeMap<&'static str, FirestoreValue>;

#[derive(Serialize)]
struct DocumentBody {
    fields: Fields,
}

#[derive(Deserialize)]
struct DocumentName {
    name: String,
}

/// Current status of a stored document and the revision it was read at
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentSnapshot {
    #[serde(default)]
    fields: BTreeMap<String, FirestoreValue>,
    update_time: String,
}

impl DocumentSnapshot {
    fn status(&self) -> DocumentStatus {
        match self.fields.get("status") {
            Some(FirestoreValue::String(status)) => DocumentStatus::from(status.clone()),
            _ => DocumentStatus::Uploaded,
        }
    }
}

/// Write precondition for a PATCH
enum Precondition<'a> {
    Exists,
    /// Fails if the document changed since this revision
    UpdateTime(&'a str),
}

impl Precondition<'_> {
    fn query(&self) -> (&'static str, &str) {
        match self {
            Precondition::Exists => ("currentDocument.exists", "true"),
            Precondition::UpdateTime(revision) => ("currentDocument.updateTime", revision),
        }
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now
    }
}

/// Firestore-backed document store
pub struct FirestoreStore {
    http: reqwest::Client,
    account: ServiceAccount,
    collection: String,
    api_base: String,
    token_uri: String,
    token: RwLock<Option<CachedToken>>,
}

impl FirestoreStore {
    pub fn new(account: ServiceAccount, config: &FirebaseConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            account,
            collection: config.collection.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token_uri: config.token_uri.clone(),
            token: RwLock::new(None),
        })
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            self.api_base, self.account.project_id, self.collection
        )
    }

    fn document_url(&self, id: &str) -> String {
        format!("{}/{}", self.collection_url(), id)
    }

    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let claims = AssertionClaims {
            iss: &self.account.client_email,
            scope: DATASTORE_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };

        let key = EncodingKey::from_rsa_pem(self.account.private_key.as_bytes()).map_err(|e| {
            AppError::Configuration {
                message: format!("Invalid service account private key: {}", e),
            }
        })?;

        encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|e| AppError::Internal {
            message: format!("Failed to sign token assertion: {}", e),
        })
    }

    async fn access_token(&self) -> Result<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
                return Ok(token.value.clone());
            }
        }

        let mut cached = self.token.write().await;
        let now = Utc::now();
        // Another request may have refreshed while we waited for the lock
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.value.clone());
        }

        let assertion = self.sign_assertion(now)?;
        let response = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let response = check_status(response, "token exchange").await?;
        let body: TokenResponse = response.json().await?;

        debug!(expires_in = body.expires_in, "Obtained Firestore access token");
        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: now + Duration::seconds(body.expires_in),
        });

        Ok(body.access_token)
    }

    async fn snapshot(&self, id: &str) -> Result<DocumentSnapshot> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.document_url(id))
            .bearer_auth(token)
            .query(&[("mask.fieldPaths", "status")])
            .send()
            .await?;

        Ok(check_status(response, "document read").await?.json().await?)
    }

    async fn patch_fields(&self, id: &str, fields: Fields, precondition: Precondition<'_>) -> Result<()> {
        let token = self.access_token().await?;
        let mut query: Vec<(&str, &str)> = fields
            .keys()
            .map(|k| ("updateMask.fieldPaths", *k))
            .collect();
        query.push(precondition.query());

        let response = self
            .http
            .patch(self.document_url(id))
            .bearer_auth(token)
            .query(&query)
            .json(&DocumentBody { fields })
            .send()
            .await?;

        check_status(response, "document update").await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::store(
        STORE_NAME,
        format!("{} failed with {}: {}", operation, status, body),
    ))
}

/// Firestore fields for a new document record
fn record_fields(record: &DocumentRecord, linked_id: Option<&str>) -> Fields {
    let mut fields = Fields::new();
    fields.insert("fileName", FirestoreValue::string(&record.file_name));
    fields.insert("originalName", FirestoreValue::string(&record.original_name));
    fields.insert("fileType", FirestoreValue::string(&record.file_type));
    fields.insert("fileSize", FirestoreValue::integer(record.file_size as i64));
    fields.insert("filePath", FirestoreValue::string(&record.file_path));
    fields.insert("status", FirestoreValue::string(record.status.as_str()));
    fields.insert("uploadedAt", FirestoreValue::string(record.uploaded_at.to_rfc3339()));
    if let Some(owner) = &record.owner_id {
        fields.insert("ownerId", FirestoreValue::string(owner));
    }
    if let Some(linked) = linked_id {
        fields.insert("mongoId", FirestoreValue::string(linked));
    }
    fields
}

/// Firestore fields touched by a status patch
fn patch_fields(patch: &StatusPatch) -> Fields {
    let mut fields = Fields::new();
    fields.insert("status", FirestoreValue::string(patch.status.as_str()));
    fields.insert("processedAt", FirestoreValue::string(patch.processed_at.to_rfc3339()));
    fields.insert("simplifiedText", FirestoreValue::optional(patch.simplified_text.clone()));
    fields
}

/// The document id is the last segment of its resource name
fn document_id(name: &str) -> Option<&str> {
    name.rsplit('/').next().filter(|id| !id.is_empty())
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    fn name(&self) -> &'static str {
        STORE_NAME
    }

    async fn create(&self, record: &DocumentRecord, linked_id: Option<&str>) -> Result<String> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.collection_url())
            .bearer_auth(token)
            .json(&DocumentBody {
                fields: record_fields(record, linked_id),
            })
            .send()
            .await?;

        let created: DocumentName = check_status(response, "document create").await?.json().await?;
        document_id(&created.name)
            .map(String::from)
            .ok_or_else(|| AppError::store(STORE_NAME, format!("unexpected document name '{}'", created.name)))
    }

    async fn update(&self, id: &str, patch: &StatusPatch) -> Result<()> {
        let current = self.snapshot(id).await?;
        let status = current.status();
        if !status.can_transition_to(patch.status) {
            return Err(AppError::store(
                STORE_NAME,
                format!("document {} cannot move from {} to {}", id, status.as_str(), patch.status.as_str()),
            ));
        }

        // Conditional on the revision read above so a concurrent run cannot patch twice
        self.patch_fields(id, patch_fields(patch), Precondition::UpdateTime(&current.update_time))
            .await
    }

    async fn link(&self, id: &str, linked_id: &str) -> Result<()> {
        let mut fields = Fields::new();
        fields.insert("mongoId", FirestoreValue::string(linked_id));
        self.patch_fields(id, fields, Precondition::Exists).await
    }

    async fn ping(&self) -> Result<()> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.collection_url())
            .bearer_auth(token)
            .query(&[("pageSize", "1")])
            .send()
            .await?;
        check_status(response, "ping").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Bytes,
        extract::State,
        http::{Method, StatusCode, Uri},
        response::{IntoResponse, Response},
        routing::post,
        Json, Router,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Firestore stand-in holding a single document
    struct MockFirestore {
        status: Mutex<String>,
        revision: AtomicUsize,
        patches: AtomicUsize,
        /// Report an outdated revision on reads, as if another writer got in first
        stale_reads: AtomicBool,
    }

    impl MockFirestore {
        fn new(status: &str) -> Arc<Self> {
            Arc::new(Self {
                status: Mutex::new(status.to_string()),
                revision: AtomicUsize::new(1),
                patches: AtomicUsize::new(0),
                stale_reads: AtomicBool::new(false),
            })
        }

        fn status(&self) -> String {
            self.status.lock().unwrap().clone()
        }

        fn revision(&self) -> String {
            format!("rev-{}", self.revision.load(Ordering::SeqCst))
        }
    }

    async fn mock_token() -> Json<serde_json::Value> {
        Json(serde_json::json!({ "access_token": "test-token", "expires_in": 3600 }))
    }

    async fn mock_document(
        State(mock): State<Arc<MockFirestore>>,
        method: Method,
        uri: Uri,
        body: Bytes,
    ) -> Response {
        if method == Method::GET {
            let revision = if mock.stale_reads.load(Ordering::SeqCst) {
                "rev-0".to_string()
            } else {
                mock.revision()
            };
            return Json(serde_json::json!({
                "name": uri.path(),
                "fields": { "status": { "stringValue": mock.status() } },
                "updateTime": revision,
            }))
            .into_response();
        }

        let precondition = format!("currentDocument.updateTime={}", mock.revision());
        if !uri.query().unwrap_or_default().contains(&precondition) {
            return (StatusCode::BAD_REQUEST, "FAILED_PRECONDITION").into_response();
        }

        let patch: serde_json::Value = serde_json::from_slice(&body).unwrap();
        if let Some(status) = patch["fields"]["status"]["stringValue"].as_str() {
            *mock.status.lock().unwrap() = status.to_string();
        }
        mock.revision.fetch_add(1, Ordering::SeqCst);
        mock.patches.fetch_add(1, Ordering::SeqCst);
        Json(serde_json::json!({ "name": uri.path() })).into_response()
    }

    async fn serve(mock: Arc<MockFirestore>) -> FirestoreStore {
        let app = Router::new()
            .route("/token", post(mock_token))
            .fallback(mock_document)
            .with_state(mock);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let account = ServiceAccount {
            project_id: "legal-app".into(),
            client_email: "svc@legal-app.iam.gserviceaccount.com".into(),
            private_key: crate::credentials::TEST_RSA_KEY.into(),
        };
        let config = FirebaseConfig {
            api_base: format!("{}/v1", base),
            token_uri: format!("{}/token", base),
            ..FirebaseConfig::default()
        };
        FirestoreStore::new(account, &config).unwrap()
    }

    #[tokio::test]
    async fn test_update_applies_once() {
        let mock = MockFirestore::new("uploaded");
        let store = serve(mock.clone()).await;

        store.update("doc-1", &StatusPatch::processed("first")).await.unwrap();
        assert_eq!(mock.status(), "processed");

        let err = store.update("doc-1", &StatusPatch::processed("second")).await.unwrap_err();
        assert!(matches!(err, AppError::Store { .. }));
        assert_eq!(mock.patches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_update_is_conditional_on_read_revision() {
        let mock = MockFirestore::new("uploaded");
        mock.stale_reads.store(true, Ordering::SeqCst);
        let store = serve(mock.clone()).await;

        let err = store.update("doc-1", &StatusPatch::processed("late")).await.unwrap_err();
        assert!(matches!(err, AppError::Store { .. }));
        assert_eq!(mock.patches.load(Ordering::SeqCst), 0);
        assert_eq!(mock.status(), "uploaded");
    }

    fn store() -> FirestoreStore {
        let account = ServiceAccount {
            project_id: "legal-app".into(),
            client_email: "svc@legal-app.iam.gserviceaccount.com".into(),
            private_key: "not a key".into(),
        };
        FirestoreStore::new(account, &FirebaseConfig::default()).unwrap()
    }

    #[test]
    fn test_value_encoding() {
        let json = serde_json::to_value(FirestoreValue::integer(10)).unwrap();
        assert_eq!(json, serde_json::json!({"integerValue": "10"}));

        let json = serde_json::to_value(FirestoreValue::optional(None::<String>)).unwrap();
        assert_eq!(json, serde_json::json!({"nullValue": null}));

        let json = serde_json::to_value(FirestoreValue::string("x")).unwrap();
        assert_eq!(json, serde_json::json!({"stringValue": "x"}));
    }

    #[test]
    fn test_record_fields() {
        let record = DocumentRecord::uploaded("1-a.txt", "a.txt", "text/plain", 10, "uploads/1-a.txt");
        let fields = record_fields(&record, Some("sql-id"));

        assert_eq!(fields["fileSize"], FirestoreValue::integer(10));
        assert_eq!(fields["status"], FirestoreValue::string("uploaded"));
        assert_eq!(fields["mongoId"], FirestoreValue::string("sql-id"));
        assert!(!fields.contains_key("ownerId"));
    }

    #[test]
    fn test_patch_fields_cover_exact_mask() {
        let fields = patch_fields(&StatusPatch::processed("plain"));
        let keys: Vec<_> = fields.keys().copied().collect();
        assert_eq!(keys, vec!["processedAt", "simplifiedText", "status"]);
        assert_eq!(fields["status"], FirestoreValue::string("processed"));
    }

    #[test]
    fn test_document_id_from_name() {
        assert_eq!(
            document_id("projects/p/databases/(default)/documents/documents/AbC123"),
            Some("AbC123")
        );
        assert_eq!(document_id("trailing/"), None);
    }

    #[test]
    fn test_urls() {
        let store = store();
        assert_eq!(
            store.document_url("xyz"),
            "https://firestore.googleapis.com/v1/projects/legal-app/databases/(default)/documents/documents/xyz"
        );
    }

    #[test]
    fn test_invalid_key_is_configuration_error() {
        let err = store().sign_assertion(Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_token_freshness() {
        let now = Utc::now();
        let fresh = CachedToken { value: "t".into(), expires_at: now + Duration::minutes(10) };
        let stale = CachedToken { value: "t".into(), expires_at: now + Duration::seconds(30) };
        assert!(fresh.is_fresh(now));
        assert!(!stale.is_fresh(now));
    }
}
