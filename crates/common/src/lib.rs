//! Lexplain Common Library
//!
//! Shared code for the Lexplain services including:
//! - Configuration management
//! - Error types and handling
//! - Document records and status transitions
//! - Document stores (Firestore primary, SQL mirror, local fallback file)
//! - Service-account credential loading
//! - ID token verification
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod store;

// Re-export commonly used types
pub use auth::{Identity, IdentityVerifier};
pub use config::AppConfig;
pub use errors::{AppError, ErrorCode, Result};
pub use models::{DocumentRecord, DocumentStatus, StatusPatch, StoreIds};
pub use store::{DocumentStore, DocumentStores, LocalMetadataStore, StoreMode};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
