use serde::{Deserialize, Serialize};

use super::{LicenseTemplate, UpdateLicenseTemplate};
use crate::error::{AppError, Result, msg};

/// Fallback source of license-generation defaults for its products.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductGroup {
    pub id: String,
    pub owner_id: Option<String>,
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub template: LicenseTemplate,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateProductGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(flatten)]
    pub template: LicenseTemplate,
}

impl CreateProductGroup {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest(msg::NAME_EMPTY.into()));
        }
        self.template.validate()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateProductGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub template: UpdateLicenseTemplate,
}

impl UpdateProductGroup {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref name) = self.name
            && name.trim().is_empty()
        {
            return Err(AppError::BadRequest(msg::NAME_EMPTY.into()));
        }
        self.template.validate()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductGroupListQuery {
    pub owner_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ProductGroupListQuery {
    pub fn page(&self) -> crate::pagination::PaginationQuery {
        crate::pagination::PaginationQuery {
            limit: self.limit,
            offset: self.offset,
        }
    }
}
