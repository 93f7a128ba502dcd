use std::time::Duration;

use axum::extract::State;
use rusqlite::Connection;

use crate::db::{AppState, DbPool, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Query};
use crate::models::{AdminLog, AdminLogQuery, CheckLogQuery, LicenseCheckLog};
use crate::pagination::Paginated;

/// Upper bound for reporting reads against the audit database.
const QUERY_DEADLINE: Duration = Duration::from_secs(5);

/// Run `query` on the blocking pool, giving up after [`QUERY_DEADLINE`].
///
/// The blocking task keeps running after a timeout; only the response is
/// released.
pub(super) async fn with_deadline<T, F>(pool: DbPool, query: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        query(&conn)
    });

    match tokio::time::timeout(QUERY_DEADLINE, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(AppError::Internal(format!("Query task failed: {}", e))),
        Err(_) => Err(AppError::Internal(format!(
            "Query exceeded {}s deadline",
            QUERY_DEADLINE.as_secs()
        ))),
    }
}

pub async fn list_license_check_logs(
    State(state): State<AppState>,
    Query(query): Query<CheckLogQuery>,
) -> Result<Json<Paginated<LicenseCheckLog>>> {
    let page = query.page();
    let (limit, offset) = (page.limit(), page.offset());
    let (logs, total) =
        with_deadline(state.audit.clone(), move |conn| queries::list_check_logs(conn, &query)).await?;
    Ok(Json(Paginated::new(logs, total, limit, offset)))
}

pub async fn list_admin_action_logs(
    State(state): State<AppState>,
    Query(query): Query<AdminLogQuery>,
) -> Result<Json<Paginated<AdminLog>>> {
    let page = query.page();
    let (limit, offset) = (page.limit(), page.offset());
    let (logs, total) =
        with_deadline(state.audit.clone(), move |conn| queries::list_admin_logs(conn, &query)).await?;
    Ok(Json(Paginated::new(logs, total, limit, offset)))
}
