use axum::extract::State;
use chrono::Utc;

use super::logs::with_deadline;
use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::models::{DashboardStats, StatsQuery};
use crate::util::parse_expiration_duration;

const DEFAULT_WINDOW: &str = "30d";

/// Catalogue totals plus audit activity inside the requested window.
pub async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<DashboardStats>> {
    let now = Utc::now().timestamp();
    let window = query.duration.as_deref().unwrap_or(DEFAULT_WINDOW);
    let since = now - (parse_expiration_duration(window, now)? - now);

    let owner = query.owner_id.clone();
    let (total_products, total_licenses, active_licenses) = with_deadline(state.db.clone(), move |conn| {
        queries::count_catalog_stats(conn, owner.as_deref(), now)
    })
    .await?;

    let owner = query.owner_id;
    let (license_checks, failed_license_checks, admin_actions) =
        with_deadline(state.audit.clone(), move |conn| {
            queries::count_audit_stats(conn, owner.as_deref(), since)
        })
        .await?;

    Ok(Json(DashboardStats {
        total_products,
        total_licenses,
        active_licenses,
        license_checks,
        failed_license_checks,
        admin_actions,
        since,
    }))
}
