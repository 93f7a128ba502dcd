use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::db::{AppState, LicenseStore, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Query};
use crate::issue;
use crate::models::{
    AdminAction, AuditEntity, GenerateLicense, License, LicenseListQuery, UpdateLicense,
};
use crate::pagination::Paginated;
use crate::util::extract_license_key;

fn required_key(headers: &HeaderMap) -> Result<&str> {
    extract_license_key(headers)
        .ok_or_else(|| AppError::BadRequest(msg::LICENSE_KEY_HEADER_REQUIRED.into()))
}

/// One license when `X-License-Key` is sent, otherwise a page of licenses.
pub async fn get_licenses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LicenseListQuery>,
) -> Result<Response> {
    let conn = state.db.get()?;

    if let Some(key) = extract_license_key(&headers) {
        let license = conn.get_license_by_key(key)?;
        return Ok(Json(license).into_response());
    }

    let page = query.page();
    let (limit, offset) = (page.limit(), page.offset());
    let (licenses, total) =
        queries::list_licenses_paginated(&conn, query.owner_id.as_deref(), limit, offset)?;
    Ok(Json(Paginated::new(licenses, total, limit, offset)).into_response())
}

pub async fn generate_license(
    State(state): State<AppState>,
    Json(input): Json<GenerateLicense>,
) -> Result<(StatusCode, Json<License>)> {
    let conn = state.db.get()?;
    let license = issue::issue_license(
        &*conn,
        &input,
        &state.generation_defaults,
        Utc::now().timestamp(),
    )?;

    state
        .audit_log
        .admin(AdminAction::GenerateLicense, AuditEntity::License)
        .entity(&license.id)
        .owner(license.owner_id.as_deref())
        .details(serde_json::json!({
            "key": license.key,
            "product_id": license.product_id,
            "type": license.license_type,
        }))
        .record();

    Ok((StatusCode::CREATED, Json(license)))
}

pub async fn update_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<UpdateLicense>,
) -> Result<Json<License>> {
    let key = required_key(&headers)?;
    let conn = state.db.get()?;
    let license = issue::amend_license(&*conn, key, &input, Utc::now().timestamp())?;

    state
        .audit_log
        .admin(AdminAction::UpdateLicense, AuditEntity::License)
        .entity(&license.id)
        .owner(input.owner_id.as_deref().or(license.owner_id.as_deref()))
        .details(serde_json::to_value(&input)?)
        .record();

    Ok(Json(license))
}

pub async fn revoke_license(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<License>> {
    let key = required_key(&headers)?;
    let conn = state.db.get()?;
    let license = issue::revoke_license(&*conn, key, Utc::now().timestamp())?;

    state
        .audit_log
        .admin(AdminAction::RevokeLicense, AuditEntity::License)
        .entity(&license.id)
        .owner(license.owner_id.as_deref())
        .details(serde_json::json!({ "key": license.key }))
        .record();

    Ok(Json(license))
}

/// Hard delete. The key stops resolving immediately.
pub async fn purge_license(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let key = required_key(&headers)?;
    let conn = state.db.get()?;
    let license = conn.get_license_by_key(key)?;
    conn.delete_license(key)?;

    state
        .audit_log
        .admin(AdminAction::DeleteLicense, AuditEntity::License)
        .entity(&license.id)
        .owner(license.owner_id.as_deref())
        .details(serde_json::json!({ "key": license.key, "product_id": license.product_id }))
        .record();

    Ok(Json(serde_json::json!({ "deleted": true })))
}
