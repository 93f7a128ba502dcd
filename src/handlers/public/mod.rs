mod check;

pub use check::*;

use axum::{Router, extract::State, middleware, routing::get};
use serde::Serialize;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::rate_limit::check_rate_limit;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct PublicKeyResponse {
    pub public_key: String,
}

/// Key clients use to verify offline tokens and signed responses.
pub async fn public_key(State(state): State<AppState>) -> Result<Json<PublicKeyResponse>> {
    let public_key = state
        .signing_public_key
        .as_deref()
        .ok_or_else(|| AppError::NotFound("Response signing is not configured".into()))?;
    Ok(Json(PublicKeyResponse {
        public_key: public_key.to_string(),
    }))
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // License key travels in the X-License-Key header, never in the URL
        .route("/check", get(check_license_key))
        .route("/public-key", get(public_key))
        .layer(middleware::from_fn_with_state(state, check_rate_limit))
}
