//! Current user handler

use axum::{Extension, Json};
use lexplain_common::{
    auth::Identity,
    errors::{AppError, Result},
};
use serde::Serialize;

#[derive(Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: Identity,
}

/// Echo the identity attached by the auth middleware
pub async fn me(identity: Option<Extension<Identity>>) -> Result<Json<MeResponse>> {
    let Extension(user) = identity.ok_or(AppError::MissingCredential)?;
    Ok(Json(MeResponse {
        success: true,
        user,
    }))
}
