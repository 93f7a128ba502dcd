use serde::{Deserialize, Serialize};

/// Dashboard counters for `GET /admin/stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_products: i64,
    pub total_licenses: i64,
    pub active_licenses: i64,
    /// Checks recorded inside the requested window.
    pub license_checks: i64,
    /// Checks inside the window that were not a 200 with `valid: true`.
    pub failed_license_checks: i64,
    pub admin_actions: i64,
    /// Start of the window, unix seconds.
    pub since: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub owner_id: Option<String>,
    /// Window length such as `7d` or `1mo`; defaults to `30d`.
    pub duration: Option<String>,
}
