use axum::{extract::State, http::StatusCode};

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{
    AdminAction, AuditEntity, CreateProductGroup, ProductGroup, ProductGroupListQuery,
    UpdateProductGroup,
};
use crate::pagination::Paginated;

pub async fn create_product_group(
    State(state): State<AppState>,
    Json(input): Json<CreateProductGroup>,
) -> Result<(StatusCode, Json<ProductGroup>)> {
    input.validate()?;

    let conn = state.db.get()?;
    let group = queries::create_product_group(&conn, &input)?;

    state
        .audit_log
        .admin(AdminAction::CreateProductGroup, AuditEntity::ProductGroup)
        .entity(&group.id)
        .owner(group.owner_id.as_deref())
        .details(serde_json::json!({ "name": group.name }))
        .record();

    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn list_product_groups(
    State(state): State<AppState>,
    Query(query): Query<ProductGroupListQuery>,
) -> Result<Json<Paginated<ProductGroup>>> {
    let conn = state.db.get()?;
    let page = query.page();
    let (limit, offset) = (page.limit(), page.offset());
    let (groups, total) =
        queries::list_product_groups_paginated(&conn, query.owner_id.as_deref(), limit, offset)?;
    Ok(Json(Paginated::new(groups, total, limit, offset)))
}

pub async fn get_product_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProductGroup>> {
    let conn = state.db.get()?;
    let group = queries::get_product_group_by_id(&conn, &id)?
        .or_not_found(msg::PRODUCT_GROUP_NOT_FOUND)?;
    Ok(Json(group))
}

pub async fn update_product_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateProductGroup>,
) -> Result<Json<ProductGroup>> {
    input.validate()?;

    let conn = state.db.get()?;
    let group = queries::update_product_group(&conn, &id, &input)?
        .or_not_found(msg::PRODUCT_GROUP_NOT_FOUND)?;

    state
        .audit_log
        .admin(AdminAction::UpdateProductGroup, AuditEntity::ProductGroup)
        .entity(&group.id)
        .owner(group.owner_id.as_deref())
        .details(serde_json::to_value(&input)?)
        .record();

    Ok(Json(group))
}

/// Member products are detached, not deleted.
pub async fn delete_product_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    let group = queries::get_product_group_by_id(&conn, &id)?
        .or_not_found(msg::PRODUCT_GROUP_NOT_FOUND)?;
    queries::delete_product_group(&conn, &id)?;

    state
        .audit_log
        .admin(AdminAction::DeleteProductGroup, AuditEntity::ProductGroup)
        .entity(&group.id)
        .owner(group.owner_id.as_deref())
        .details(serde_json::json!({ "name": group.name }))
        .record();

    Ok(Json(serde_json::json!({ "deleted": true })))
}
