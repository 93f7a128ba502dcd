use axum::{extract::State, http::StatusCode};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{AdminAction, AuditEntity, CreateProduct, Product, ProductListQuery, UpdateProduct};
use crate::pagination::Paginated;

fn ensure_group_exists(conn: &rusqlite::Connection, group_id: Option<&str>) -> Result<()> {
    if let Some(group_id) = group_id {
        queries::get_product_group_by_id(conn, group_id)?.or_not_found(msg::PRODUCT_GROUP_NOT_FOUND)?;
    }
    Ok(())
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<CreateProduct>,
) -> Result<(StatusCode, Json<Product>)> {
    input.validate()?;

    let conn = state.db.get()?;
    ensure_group_exists(&conn, input.product_group_id.as_deref())?;
    let product = queries::create_product(&conn, &input)?;

    state
        .audit_log
        .admin(AdminAction::CreateProduct, AuditEntity::Product)
        .entity(&product.id)
        .owner(product.owner_id.as_deref())
        .details(serde_json::json!({ "name": product.name, "product_group_id": product.product_group_id }))
        .record();

    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductListQuery>,
) -> Result<Json<Paginated<Product>>> {
    let conn = state.db.get()?;
    let page = query.page();
    let (limit, offset) = (page.limit(), page.offset());
    let (products, total) = queries::list_products_paginated(
        &conn,
        query.owner_id.as_deref(),
        query.product_group_id.as_deref(),
        limit,
        offset,
    )?;
    Ok(Json(Paginated::new(products, total, limit, offset)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>> {
    let conn = state.db.get()?;
    let product = queries::get_product_by_id(&conn, &id)?.or_not_found(msg::PRODUCT_NOT_FOUND)?;
    Ok(Json(product))
}

/// Changes only affect licenses generated afterwards.
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateProduct>,
) -> Result<Json<Product>> {
    input.validate()?;

    let conn = state.db.get()?;
    if let Some(Some(ref group_id)) = input.product_group_id {
        ensure_group_exists(&conn, Some(group_id))?;
    }
    let product = queries::update_product(&conn, &id, &input)?.or_not_found(msg::PRODUCT_NOT_FOUND)?;

    state
        .audit_log
        .admin(AdminAction::UpdateProduct, AuditEntity::Product)
        .entity(&product.id)
        .owner(product.owner_id.as_deref())
        .details(serde_json::to_value(&input)?)
        .record();

    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    let product = queries::get_product_by_id(&conn, &id)?.or_not_found(msg::PRODUCT_NOT_FOUND)?;

    if queries::count_licenses_for_product(&conn, &id)? > 0 {
        return Err(AppError::Conflict(msg::PRODUCT_HAS_LICENSES.into()));
    }
    queries::delete_product(&conn, &id)?;

    state
        .audit_log
        .admin(AdminAction::DeleteProduct, AuditEntity::Product)
        .entity(&product.id)
        .owner(product.owner_id.as_deref())
        .details(serde_json::json!({ "name": product.name }))
        .record();

    Ok(Json(serde_json::json!({ "deleted": true })))
}
