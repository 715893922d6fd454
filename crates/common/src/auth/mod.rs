//! Authentication utilities
//!
//! Provides:
//! - Bearer credential extraction
//! - ID token verification (Firebase RS256 or shared-secret HS256)
//! - The normalized identity attached to authenticated requests

use crate::config::{AppConfig, AuthMode};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Identity attached to the request context after verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Subject id
    pub uid: String,
    pub email: String,
    /// Display name
    pub name: String,
    pub picture: String,
    pub email_verified: bool,
}

/// Claims carried by ID tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Subject (user ID)
    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, alias = "displayName", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,

    #[serde(default)]
    pub email_verified: bool,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl IdTokenClaims {
    fn into_identity(self) -> Result<Identity> {
        if self.sub.is_empty() {
            return Err(AppError::InvalidCredential {
                reason: "token has an empty subject".to_string(),
            });
        }
        Ok(Identity {
            uid: self.sub,
            email: self.email.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            picture: self.picture.unwrap_or_default(),
            email_verified: self.email_verified,
        })
    }
}

/// Verifies bearer credentials against an identity provider
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn invalid(e: jsonwebtoken::errors::Error) -> AppError {
    AppError::InvalidCredential {
        reason: e.to_string(),
    }
}

// ============================================================================
// Shared-secret tokens
// ============================================================================

/// HS256 token verifier for development deployments and tests
pub struct SharedSecretVerifier {
    decoding_key: DecodingKey,
    #[cfg(any(test, feature = "test-utils"))]
    encoding_key: jsonwebtoken::EncodingKey,
}

impl SharedSecretVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            #[cfg(any(test, feature = "test-utils"))]
            encoding_key: jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint a token for `identity` valid for `ttl_secs` (negative for expired)
    #[cfg(any(test, feature = "test-utils"))]
    pub fn generate_token(&self, identity: &Identity, ttl_secs: i64) -> Result<String> {
        let now = chrono::Utc::now();
        let claims = IdTokenClaims {
            sub: identity.uid.clone(),
            email: Some(identity.email.clone()),
            name: Some(identity.name.clone()),
            picture: Some(identity.picture.clone()),
            email_verified: identity.email_verified,
            exp: (now + chrono::Duration::seconds(ttl_secs)).timestamp(),
            iat: now.timestamp(),
        };

        jsonwebtoken::encode(&jsonwebtoken::Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal {
                message: format!("Failed to generate token: {}", e),
            })
    }
}

#[async_trait]
impl IdentityVerifier for SharedSecretVerifier {
    async fn verify(&self, token: &str) -> Result<Identity> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<IdTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(invalid)?
            .claims
            .into_identity()
    }
}

// ============================================================================
// Firebase ID tokens
// ============================================================================

/// Minimum age of the cached key set before an unknown `kid` may trigger a refetch
const MIN_KEY_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

enum KeyLookup {
    Found(DecodingKey),
    /// Key set is recent and lacks the kid; reject without refetching
    Unknown,
    Refresh,
}

/// Verifies Firebase ID tokens against Google's published signing keys.
///
/// Signing keys are cached; verification results never are.
pub struct FirebaseVerifier {
    http: reqwest::Client,
    project_id: String,
    jwks_url: String,
    cache_ttl: Duration,
    min_refetch: Duration,
    keys: RwLock<Option<CachedKeys>>,
}

impl FirebaseVerifier {
    pub fn new(project_id: impl Into<String>, jwks_url: impl Into<String>, cache_ttl: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            project_id: project_id.into(),
            jwks_url: jwks_url.into(),
            cache_ttl,
            min_refetch: MIN_KEY_REFETCH_INTERVAL,
            keys: RwLock::new(None),
        }
    }

    fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[self.issuer()]);
        validation
    }

    async fn fetch_keys(&self) -> Result<JwkSet> {
        debug!(url = %self.jwks_url, "Fetching token signing keys");
        let keys = self
            .http
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json::<JwkSet>()
            .await?;
        Ok(keys)
    }

    fn lookup(&self, cached: Option<&CachedKeys>, kid: &str) -> Result<KeyLookup> {
        let Some(cached) = cached else {
            return Ok(KeyLookup::Refresh);
        };
        let age = cached.fetched_at.elapsed();
        if age >= self.cache_ttl {
            return Ok(KeyLookup::Refresh);
        }
        match cached.keys.find(kid) {
            Some(jwk) => Ok(KeyLookup::Found(DecodingKey::from_jwk(jwk).map_err(invalid)?)),
            None if age < self.min_refetch => Ok(KeyLookup::Unknown),
            None => Ok(KeyLookup::Refresh),
        }
    }

    /// Decoding key for `kid`. The key set is refreshed when stale, or when it
    /// lacks the kid and is older than the minimum refetch interval. Only one
    /// refresh runs at a time; waiters reuse its result.
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        let unknown = || AppError::InvalidCredential {
            reason: format!("unknown signing key '{}'", kid),
        };

        match self.lookup(self.keys.read().await.as_ref(), kid)? {
            KeyLookup::Found(key) => return Ok(key),
            KeyLookup::Unknown => return Err(unknown()),
            KeyLookup::Refresh => {}
        }

        let mut cached = self.keys.write().await;
        // Another request may have refreshed while we waited for the lock
        match self.lookup(cached.as_ref(), kid)? {
            KeyLookup::Found(key) => return Ok(key),
            KeyLookup::Unknown => return Err(unknown()),
            KeyLookup::Refresh => {}
        }

        let keys = self.fetch_keys().await?;
        let key = keys
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()
            .map_err(invalid)?;
        *cached = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });

        key.ok_or_else(unknown)
    }
}

#[async_trait]
impl IdentityVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<Identity> {
        let header = decode_header(token).map_err(invalid)?;
        if header.alg != Algorithm::RS256 {
            return Err(AppError::InvalidCredential {
                reason: format!("unexpected algorithm {:?}", header.alg),
            });
        }
        let kid = header.kid.ok_or_else(|| AppError::InvalidCredential {
            reason: "token has no key id".to_string(),
        })?;

        let key = self.decoding_key(&kid).await?;
        decode::<IdTokenClaims>(token, &key, &self.validation())
            .map_err(invalid)?
            .claims
            .into_identity()
    }
}

/// Build the verifier selected by `auth.mode`
pub fn build_verifier(config: &AppConfig) -> Result<Option<Arc<dyn IdentityVerifier>>> {
    match config.auth.mode {
        AuthMode::Disabled => {
            warn!("Authentication disabled; document routes are open");
            Ok(None)
        }
        AuthMode::SharedSecret => {
            let secret = config.auth.jwt_secret.as_deref().ok_or_else(|| AppError::Configuration {
                message: "auth.jwt_secret is required for shared_secret mode".to_string(),
            })?;
            info!("Authentication enabled (shared secret)");
            Ok(Some(Arc::new(SharedSecretVerifier::new(secret))))
        }
        AuthMode::Firebase => {
            let project = config.auth_project_id().ok_or_else(|| AppError::Configuration {
                message: "auth.project_id or firebase.project_id is required for firebase mode".to_string(),
            })?;
            info!(project_id = project, "Authentication enabled (Firebase ID tokens)");
            Ok(Some(Arc::new(FirebaseVerifier::new(
                project,
                config.auth.jwks_url.clone(),
                Duration::from_secs(config.auth.jwks_cache_secs),
            ))))
        }
    }
}
