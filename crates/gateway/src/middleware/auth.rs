//! Bearer token gate
//!
//! When a verifier is configured, requests must carry a valid
//! `Authorization: Bearer <token>`; the verified identity is attached to the
//! request extensions. Without a verifier requests pass through untouched.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use lexplain_common::{
    auth::extract_bearer,
    errors::{AppError, Result},
};

use crate::AppState;

pub async fn require_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let Some(verifier) = state.verifier.as_ref() else {
        return Ok(next.run(request).await);
    };

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .map(str::to_owned)
        .ok_or(AppError::MissingCredential)?;

    let identity = verifier.verify(&token).await.map_err(|e| match e {
        AppError::InvalidCredential { .. } => e,
        other => AppError::InvalidCredential {
            reason: format!("{:?}", other),
        },
    })?;

    tracing::debug!(uid = %identity.uid, "Request authenticated");
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
