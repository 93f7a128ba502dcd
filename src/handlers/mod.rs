pub mod admin;
pub mod public;

use axum::{Router, middleware};
use tower_http::trace::TraceLayer;

use crate::db::AppState;
use crate::middleware::sign_response;

/// The complete HTTP surface.
///
/// Public and admin routes sit behind separate rate-limit pools. Response
/// signing wraps both so rejections from the limiter and the auth layer
/// are signed too.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(public::router(state.clone()))
        .merge(admin::router(state.clone()))
        .layer(middleware::from_fn_with_state(state.clone(), sign_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
