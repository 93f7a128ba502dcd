//! Features and releases.

use axum::{extract::State, http::StatusCode};
use rusqlite::Connection;

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, is_constraint_violation, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{
    AdminAction, AuditEntity, CatalogListQuery, CreateFeature, CreateRelease, Feature, Release,
    UpdateFeature, UpdateRelease,
};
use crate::pagination::Paginated;

/// The scope an entry is attached to must exist.
fn ensure_scope_exists(
    conn: &Connection,
    product_id: Option<&str>,
    product_group_id: Option<&str>,
) -> Result<()> {
    if let Some(id) = product_id {
        queries::get_product_by_id(conn, id)?.or_not_found(msg::PRODUCT_NOT_FOUND)?;
    }
    if let Some(id) = product_group_id {
        queries::get_product_group_by_id(conn, id)?.or_not_found(msg::PRODUCT_GROUP_NOT_FOUND)?;
    }
    Ok(())
}

/// With the scope checked, the only constraint left to trip is the
/// per-scope uniqueness index.
fn duplicate_as_conflict(err: AppError, message: &str) -> AppError {
    match err {
        AppError::Database(ref e) if is_constraint_violation(e) => AppError::Conflict(message.into()),
        other => other,
    }
}

// ============ Features ============

pub async fn create_feature(
    State(state): State<AppState>,
    Json(input): Json<CreateFeature>,
) -> Result<(StatusCode, Json<Feature>)> {
    input.validate()?;

    let conn = state.db.get()?;
    ensure_scope_exists(&conn, input.product_id.as_deref(), input.product_group_id.as_deref())?;
    let feature = queries::create_feature(&conn, &input)
        .map_err(|e| duplicate_as_conflict(e, msg::DUPLICATE_FEATURE))?;

    state
        .audit_log
        .admin(AdminAction::CreateFeature, AuditEntity::Feature)
        .entity(&feature.id)
        .owner(feature.owner_id.as_deref())
        .details(serde_json::json!({
            "code": feature.code,
            "product_id": feature.product_id,
            "product_group_id": feature.product_group_id,
        }))
        .record();

    Ok((StatusCode::CREATED, Json(feature)))
}

pub async fn list_features(
    State(state): State<AppState>,
    Query(query): Query<CatalogListQuery>,
) -> Result<Json<Paginated<Feature>>> {
    let conn = state.db.get()?;
    let page = query.page();
    let (features, total) = queries::list_features_paginated(&conn, &query)?;
    Ok(Json(Paginated::new(features, total, page.limit(), page.offset())))
}

pub async fn get_feature(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Feature>> {
    let conn = state.db.get()?;
    let feature = queries::get_feature_by_id(&conn, &id)?.or_not_found(msg::FEATURE_NOT_FOUND)?;
    Ok(Json(feature))
}

/// Renaming a code does not rewrite licenses that already carry the old one.
pub async fn update_feature(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateFeature>,
) -> Result<Json<Feature>> {
    input.validate()?;

    let conn = state.db.get()?;
    let feature = queries::update_feature(&conn, &id, &input)
        .map_err(|e| duplicate_as_conflict(e, msg::DUPLICATE_FEATURE))?
        .or_not_found(msg::FEATURE_NOT_FOUND)?;

    state
        .audit_log
        .admin(AdminAction::UpdateFeature, AuditEntity::Feature)
        .entity(&feature.id)
        .owner(feature.owner_id.as_deref())
        .details(serde_json::to_value(&input)?)
        .record();

    Ok(Json(feature))
}

pub async fn delete_feature(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    let feature = queries::get_feature_by_id(&conn, &id)?.or_not_found(msg::FEATURE_NOT_FOUND)?;
    queries::delete_feature(&conn, &id)?;

    state
        .audit_log
        .admin(AdminAction::DeleteFeature, AuditEntity::Feature)
        .entity(&feature.id)
        .owner(feature.owner_id.as_deref())
        .details(serde_json::json!({ "code": feature.code }))
        .record();

    Ok(Json(serde_json::json!({ "deleted": true })))
}

// ============ Releases ============

pub async fn create_release(
    State(state): State<AppState>,
    Json(input): Json<CreateRelease>,
) -> Result<(StatusCode, Json<Release>)> {
    input.validate()?;

    let conn = state.db.get()?;
    ensure_scope_exists(&conn, input.product_id.as_deref(), input.product_group_id.as_deref())?;
    let release = queries::create_release(&conn, &input)
        .map_err(|e| duplicate_as_conflict(e, msg::DUPLICATE_RELEASE))?;

    state
        .audit_log
        .admin(AdminAction::CreateRelease, AuditEntity::Release)
        .entity(&release.id)
        .owner(release.owner_id.as_deref())
        .details(serde_json::json!({
            "version": release.version,
            "product_id": release.product_id,
            "product_group_id": release.product_group_id,
        }))
        .record();

    Ok((StatusCode::CREATED, Json(release)))
}

pub async fn list_releases(
    State(state): State<AppState>,
    Query(query): Query<CatalogListQuery>,
) -> Result<Json<Paginated<Release>>> {
    let conn = state.db.get()?;
    let page = query.page();
    let (releases, total) = queries::list_releases_paginated(&conn, &query)?;
    Ok(Json(Paginated::new(releases, total, page.limit(), page.offset())))
}

pub async fn get_release(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Release>> {
    let conn = state.db.get()?;
    let release = queries::get_release_by_id(&conn, &id)?.or_not_found(msg::RELEASE_NOT_FOUND)?;
    Ok(Json(release))
}

pub async fn update_release(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateRelease>,
) -> Result<Json<Release>> {
    input.validate()?;

    let conn = state.db.get()?;
    let release = queries::update_release(&conn, &id, &input)
        .map_err(|e| duplicate_as_conflict(e, msg::DUPLICATE_RELEASE))?
        .or_not_found(msg::RELEASE_NOT_FOUND)?;

    state
        .audit_log
        .admin(AdminAction::UpdateRelease, AuditEntity::Release)
        .entity(&release.id)
        .owner(release.owner_id.as_deref())
        .details(serde_json::json!({ "version": release.version }))
        .record();

    Ok(Json(release))
}

pub async fn delete_release(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    let release = queries::get_release_by_id(&conn, &id)?.or_not_found(msg::RELEASE_NOT_FOUND)?;
    queries::delete_release(&conn, &id)?;

    state
        .audit_log
        .admin(AdminAction::DeleteRelease, AuditEntity::Release)
        .entity(&release.id)
        .owner(release.owner_id.as_deref())
        .details(serde_json::json!({ "version": release.version }))
        .record();

    Ok(Json(serde_json::json!({ "deleted": true })))
}
