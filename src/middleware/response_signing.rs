use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use chrono::{SecondsFormat, Utc};

use crate::db::AppState;
use crate::error::AppError;
use crate::jwt::sign_bytes;

pub const TIMESTAMP_HEADER: &str = "x-keyhold-timestamp";
pub const SIGNATURE_HEADER: &str = "x-keyhold-signature";

/// Sign every response body when a signing key is configured.
///
/// The signature is base64 Ed25519 over `timestamp + "." + body`, so a
/// client holding the public key can detect tampered or replayed answers.
pub async fn sign_response(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let response = next.run(request).await;
    let Some(signing_key) = state.response_signing_key.as_deref() else {
        return Ok(response);
    };

    let (mut parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to buffer response body: {}", e)))?;

    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut message = Vec::with_capacity(timestamp.len() + 1 + bytes.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.push(b'.');
    message.extend_from_slice(&bytes);
    let signature = sign_bytes(signing_key, &message);

    let headers = &mut parts.headers;
    headers.insert(
        TIMESTAMP_HEADER,
        HeaderValue::from_str(&timestamp).map_err(|e| AppError::Internal(e.to_string()))?,
    );
    headers.insert(
        SIGNATURE_HEADER,
        HeaderValue::from_str(&signature).map_err(|e| AppError::Internal(e.to_string()))?,
    );

    Ok(Response::from_parts(parts, Body::from(bytes)))
}
