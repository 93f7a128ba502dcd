use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::check::{CheckConstraints, check_license};
use crate::db::{AppState, LicenseStore};
use crate::error::{AppError, Result, msg};
use crate::extractors::{ClientIp, Json, Query};
use crate::id::EntityType;
use crate::jwt;
use crate::models::{CheckRequestSummary, CheckResponseSummary, License, LicenseCheckLog};
use crate::util::{extract_license_key, extract_user_agent};

#[derive(Debug, Default, Deserialize)]
pub struct CheckQuery {
    pub version: Option<String>,
    pub feature: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub valid: bool,
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Offline token, only when signing is configured and succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// GET /check with the key in `X-License-Key`.
///
/// An invalid license is a 200 with `valid: false`. Every call, including
/// a missing header or an unknown key, leaves one check-log entry.
pub async fn check_license_key(
    State(state): State<AppState>,
    client: ClientIp,
    headers: HeaderMap,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckResponse>> {
    let key = extract_license_key(&headers).unwrap_or_default().to_string();
    let client_ip = client.resolved.map(|ip| ip.to_string());
    let audit = CheckAudit {
        request: CheckRequestSummary {
            version: query.version.clone(),
            feature: query.feature.clone(),
        },
        ip_address: client_ip.clone(),
        user_agent: extract_user_agent(&headers),
    };

    match evaluate(&state, &key, client_ip.as_deref(), query) {
        Ok((license, response)) => {
            let summary = CheckResponseSummary {
                valid: response.valid,
                reason: response.reason.clone(),
                expires_at: response.expires_at,
                error: None,
            };
            state
                .audit_log
                .record_check(audit.entry(&key, Some(&license), summary, StatusCode::OK));
            Ok(Json(response))
        }
        Err(e) => {
            let summary = CheckResponseSummary {
                error: Some(e.to_string()),
                ..Default::default()
            };
            state
                .audit_log
                .record_check(audit.entry(&key, None, summary, e.status_code()));
            Err(e)
        }
    }
}

fn evaluate(
    state: &AppState,
    key: &str,
    client_ip: Option<&str>,
    query: CheckQuery,
) -> Result<(License, CheckResponse)> {
    if key.is_empty() {
        return Err(AppError::BadRequest(msg::LICENSE_KEY_HEADER_REQUIRED.into()));
    }

    let conn = state.db.get()?;
    let mut license = conn.get_license_by_key(key)?;

    let constraints = CheckConstraints::new(query.version, query.feature);
    let now = Utc::now().timestamp();
    let outcome = check_license(&*conn, &mut license, client_ip, &constraints, now);

    let token = state.token_key.as_deref().and_then(|key_pair| {
        match jwt::sign_offline_token(
            key_pair,
            &license.key,
            license.expires_at,
            outcome.valid,
            &license.features,
        ) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::error!(key = %license.key, "Failed to sign offline token: {}", e);
                None
            }
        }
    });

    let response = CheckResponse {
        valid: outcome.valid,
        expires_at: license.expires_at,
        reason: outcome.reason,
        token,
    };
    Ok((license, response))
}

/// Request-side fields shared by every check-log entry of one call.
struct CheckAudit {
    request: CheckRequestSummary,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl CheckAudit {
    fn entry(
        self,
        key: &str,
        license: Option<&License>,
        response: CheckResponseSummary,
        status: StatusCode,
    ) -> LicenseCheckLog {
        LicenseCheckLog {
            id: EntityType::CheckLog.gen_id(),
            license_key: key.to_string(),
            license_id: license.map(|l| l.id.clone()),
            product_id: license.map(|l| l.product_id.clone()),
            owner_id: license.and_then(|l| l.owner_id.clone()),
            request: self.request,
            response,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            status_code: status.as_u16(),
            created_at: Utc::now().timestamp(),
        }
    }
}
