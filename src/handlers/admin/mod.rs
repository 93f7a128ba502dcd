mod catalog;
mod licenses;
mod logs;
mod product_groups;
mod products;
mod stats;

pub use catalog::*;
pub use licenses::*;
pub use logs::*;
pub use product_groups::*;
pub use products::*;
pub use stats::*;

use axum::{
    Router, middleware,
    routing::{delete, get},
};

use crate::db::AppState;
use crate::middleware::admin_auth;
use crate::rate_limit::admin_rate_limit;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // Licenses, addressed by the X-License-Key header
        .route(
            "/admin/keys",
            get(get_licenses)
                .post(generate_license)
                .put(update_license)
                .delete(revoke_license),
        )
        .route("/admin/keys/purge", delete(purge_license))
        // Products
        .route("/admin/products", get(list_products).post(create_product))
        .route(
            "/admin/products/{id}",
            get(get_product).put(update_product).delete(delete_product),
        )
        // Product groups
        .route(
            "/admin/product-groups",
            get(list_product_groups).post(create_product_group),
        )
        .route(
            "/admin/product-groups/{id}",
            get(get_product_group)
                .put(update_product_group)
                .delete(delete_product_group),
        )
        // Catalog
        .route("/admin/features", get(list_features).post(create_feature))
        .route(
            "/admin/features/{id}",
            get(get_feature).put(update_feature).delete(delete_feature),
        )
        .route("/admin/releases", get(list_releases).post(create_release))
        .route(
            "/admin/releases/{id}",
            get(get_release).put(update_release).delete(delete_release),
        )
        // Reporting
        .route("/admin/stats", get(get_stats))
        .route("/admin/logs/license-checks", get(list_license_check_logs))
        .route("/admin/logs/admin-actions", get(list_admin_action_logs))
        // Limiter is outermost: unauthenticated requests spend tokens too
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .layer(middleware::from_fn_with_state(state, admin_rate_limit))
}
