use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::pagination::PaginationQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminAction {
    GenerateLicense,
    UpdateLicense,
    RevokeLicense,
    DeleteLicense,
    CreateProduct,
    UpdateProduct,
    DeleteProduct,
    CreateProductGroup,
    UpdateProductGroup,
    DeleteProductGroup,
    CreateFeature,
    UpdateFeature,
    DeleteFeature,
    CreateRelease,
    UpdateRelease,
    DeleteRelease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEntity {
    License,
    Product,
    ProductGroup,
    Feature,
    Release,
}

/// Constraints a caller sent with a check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequestSummary {
    pub version: Option<String>,
    pub feature: Option<String>,
}

/// What the check endpoint answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponseSummary {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Set when the check failed before a verdict (unknown key, store error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseCheckLog {
    pub id: String,
    pub license_key: String,
    pub license_id: Option<String>,
    pub product_id: Option<String>,
    pub owner_id: Option<String>,
    pub request: CheckRequestSummary,
    pub response: CheckResponseSummary,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub status_code: u16,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminLog {
    pub id: String,
    pub action: AdminAction,
    pub entity_type: AuditEntity,
    pub entity_id: Option<String>,
    pub owner_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckLogQuery {
    pub license_key: Option<String>,
    pub product_id: Option<String>,
    pub status_code: Option<u16>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl CheckLogQuery {
    pub fn page(&self) -> PaginationQuery {
        PaginationQuery {
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminLogQuery {
    pub owner_id: Option<String>,
    pub action: Option<AdminAction>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AdminLogQuery {
    pub fn page(&self) -> PaginationQuery {
        PaginationQuery {
            limit: self.limit,
            offset: self.offset,
        }
    }
}
