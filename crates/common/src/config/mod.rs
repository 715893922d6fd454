//! Configuration management for Lexplain services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Legacy flat variables (PORT, PYTHON_PATH, FIREBASE_*, MONGO_URI)
//! - Default values

use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Primary document store (Firestore)
    pub firebase: FirebaseConfig,

    /// Secondary document store (SQL mirror)
    pub database: DatabaseConfig,

    /// Upload persistence
    pub uploads: UploadConfig,

    /// External simplifier process
    pub simplifier: SimplifierConfig,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,

    /// Allow any origin in CORS responses
    pub cors_allow_any: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FirebaseConfig {
    /// Path to a service-account JSON file
    pub service_account_path: Option<String>,

    /// Discrete credential fields, used when no file is configured
    pub project_id: Option<String>,
    pub client_email: Option<String>,
    pub private_key: Option<String>,

    /// Firestore collection holding document records
    pub collection: String,

    /// Firestore REST base URL
    pub api_base: String,

    /// OAuth2 token endpoint for the service-account flow
    pub token_uri: String,

    /// HTTP timeout for Firestore and token requests
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection string; the secondary store is unavailable when absent
    pub url: Option<String>,

    /// Maximum number of connections
    pub max_connections: u32,

    /// Minimum number of connections
    pub min_connections: u32,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory receiving uploaded bytes
    pub dir: PathBuf,

    /// Local metadata file name (inside `dir`) used when no store is configured
    pub metadata_file: String,

    /// Maximum accepted file size in bytes
    pub max_file_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimplifierConfig {
    /// Executable used to run the script
    pub interpreter: String,

    /// Location of the simplifier script
    pub script_path: PathBuf,

    /// Directory for temp files staged from raw text (uploads dir when unset)
    pub scratch_dir: Option<PathBuf>,
}

/// How bearer credentials are verified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Routes are open
    #[default]
    Disabled,
    /// Firebase ID tokens (RS256, Google signing keys)
    Firebase,
    /// HS256 tokens signed with `jwt_secret`
    SharedSecret,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,

    /// Firebase project; falls back to `firebase.project_id`
    pub project_id: Option<String>,

    /// Secret for shared-secret mode
    pub jwt_secret: Option<String>,

    /// JWK set holding the ID token signing keys
    pub jwks_url: String,

    /// How long fetched signing keys are reused
    pub jwks_cache_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    pub log_level: String,

    /// Enable JSON logging
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    pub metrics_port: u16,

    /// Service name reported in startup logs and as the `service` metrics label
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 5000 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_collection() -> String { "documents".to_string() }
fn default_firestore_base() -> String { "https://firestore.googleapis.com/v1".to_string() }
fn default_token_uri() -> String { "https://oauth2.googleapis.com/token".to_string() }
fn default_http_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_upload_dir() -> PathBuf { PathBuf::from("uploads") }
fn default_metadata_file() -> String { "metadata.json".to_string() }
fn default_max_file_size() -> usize { 10 * 1024 * 1024 }
fn default_interpreter() -> String { "python".to_string() }
fn default_script_path() -> PathBuf { PathBuf::from("scripts/simple_legal_simplifier.py") }
fn default_jwks_url() -> String {
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com".to_string()
}
fn default_jwks_cache() -> u64 { 3600 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "lexplain".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            cors_allow_any: true,
        }
    }
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            service_account_path: None,
            project_id: None,
            client_email: None,
            private_key: None,
            collection: default_collection(),
            api_base: default_firestore_base(),
            token_uri: default_token_uri(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            metadata_file: default_metadata_file(),
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for SimplifierConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script_path: default_script_path(),
            scratch_dir: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Disabled,
            project_id: None,
            jwt_secret: None,
            jwks_url: default_jwks_url(),
            jwks_cache_secs: default_jwks_cache(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

/// Flat variable names accepted on top of the layered sources
const LEGACY_OVERRIDES: &[(&str, &str)] = &[
    ("PORT", "server.port"),
    ("PYTHON_PATH", "simplifier.interpreter"),
    ("FIREBASE_SERVICE_ACCOUNT_PATH", "firebase.service_account_path"),
    ("FIREBASE_PROJECT_ID", "firebase.project_id"),
    ("FIREBASE_CLIENT_EMAIL", "firebase.client_email"),
    ("FIREBASE_PRIVATE_KEY", "firebase.private_key"),
    ("MONGO_URI", "database.url"),
    ("DATABASE_URL", "database.url"),
];

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            );

        Self::apply_legacy_overrides(builder, |name| std::env::var(name).ok())?
            .build()?
            .try_deserialize()
    }

    /// Load from a specific file, still honouring environment overrides
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            );

        Self::apply_legacy_overrides(builder, |name| std::env::var(name).ok())?
            .build()?
            .try_deserialize()
    }

    fn apply_legacy_overrides<F>(
        mut builder: ConfigBuilder<DefaultState>,
        lookup: F,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (name, key) in LEGACY_OVERRIDES {
            let value = lookup(name).filter(|v| !v.trim().is_empty());
            if value.is_some() {
                builder = builder.set_override_option(*key, value)?;
            }
        }
        Ok(builder)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Directory for staged temp files
    pub fn scratch_dir(&self) -> PathBuf {
        self.simplifier
            .scratch_dir
            .clone()
            .unwrap_or_else(|| self.uploads.dir.clone())
    }

    /// Full path of the local fallback metadata file
    pub fn metadata_path(&self) -> PathBuf {
        self.uploads.dir.join(&self.uploads.metadata_file)
    }

    /// Project whose ID tokens are accepted
    pub fn auth_project_id(&self) -> Option<&str> {
        self.auth
            .project_id
            .as_deref()
            .or(self.firebase.project_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.firebase.collection, "documents");
        assert_eq!(config.simplifier.interpreter, "python");
        assert_eq!(config.auth.mode, AuthMode::Disabled);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_scratch_dir_falls_back_to_uploads() {
        let mut config = AppConfig::default();
        assert_eq!(config.scratch_dir(), PathBuf::from("uploads"));

        config.simplifier.scratch_dir = Some(PathBuf::from("/tmp/scratch"));
        assert_eq!(config.scratch_dir(), PathBuf::from("/tmp/scratch"));
    }

    #[test]
    fn test_metadata_path() {
        let config = AppConfig::default();
        assert_eq!(config.metadata_path(), PathBuf::from("uploads/metadata.json"));
    }

    #[test]
    fn test_auth_project_falls_back_to_firebase() {
        let mut config = AppConfig::default();
        assert!(config.auth_project_id().is_none());

        config.firebase.project_id = Some("legal-app".into());
        assert_eq!(config.auth_project_id(), Some("legal-app"));

        config.auth.project_id = Some("other".into());
        assert_eq!(config.auth_project_id(), Some("other"));
    }

    #[test]
    fn test_legacy_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "7001"),
            ("PYTHON_PATH", "python3"),
            ("MONGO_URI", "sqlite::memory:"),
            ("FIREBASE_PROJECT_ID", "   "),
        ]
        .into_iter()
        .collect();

        let builder = AppConfig::apply_legacy_overrides(Config::builder(), |name| {
            vars.get(name).map(|v| v.to_string())
        })
        .unwrap();
        let config: AppConfig = builder.build().unwrap().try_deserialize().unwrap();

        assert_eq!(config.server.port, 7001);
        assert_eq!(config.simplifier.interpreter, "python3");
        assert_eq!(config.database.url.as_deref(), Some("sqlite::memory:"));
        // Blank values are ignored
        assert!(config.firebase.project_id.is_none());
        // Untouched sections keep their defaults
        assert_eq!(config.uploads.max_file_size, 10 * 1024 * 1024);
    }
}
