//! Features and releases. Each one is scoped to a product, a product group,
//! or is global when neither is set.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result, msg};
use crate::pagination::PaginationQuery;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub owner_id: Option<String>,
    pub product_id: Option<String>,
    pub product_group_id: Option<String>,
    pub name: String,
    pub code: String,
    pub description: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub owner_id: Option<String>,
    pub product_id: Option<String>,
    pub product_group_id: Option<String>,
    pub version: String,
    pub created_at: i64,
}

fn check_scope(product_id: &Option<String>, product_group_id: &Option<String>) -> Result<()> {
    if product_id.is_some() && product_group_id.is_some() {
        return Err(AppError::BadRequest(msg::SCOPE_CONFLICT.into()));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateFeature {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub product_group_id: Option<String>,
}

impl CreateFeature {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest(msg::NAME_EMPTY.into()));
        }
        if self.code.trim().is_empty() {
            return Err(AppError::BadRequest(msg::CODE_EMPTY.into()));
        }
        check_scope(&self.product_id, &self.product_group_id)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateFeature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl UpdateFeature {
    pub fn validate(&self) -> Result<()> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::BadRequest(msg::NAME_EMPTY.into()));
        }
        if self.code.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(AppError::BadRequest(msg::CODE_EMPTY.into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateRelease {
    pub version: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub product_group_id: Option<String>,
}

impl CreateRelease {
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(AppError::BadRequest(msg::VERSION_EMPTY.into()));
        }
        check_scope(&self.product_id, &self.product_group_id)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateRelease {
    pub version: String,
}

impl UpdateRelease {
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(AppError::BadRequest(msg::VERSION_EMPTY.into()));
        }
        Ok(())
    }
}

/// List filter shared by features and releases.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogListQuery {
    pub product_id: Option<String>,
    pub product_group_id: Option<String>,
    /// Only entries scoped to neither a product nor a group.
    #[serde(default)]
    pub global: bool,
    pub owner_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl CatalogListQuery {
    pub fn page(&self) -> PaginationQuery {
        PaginationQuery {
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_cannot_have_two_scopes() {
        let req = CreateFeature {
            name: "Single sign-on".into(),
            code: "sso".into(),
            product_id: Some("kh_prod_1".into()),
            product_group_id: Some("kh_grp_1".into()),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_global_feature_is_valid() {
        let req = CreateFeature {
            name: "Export".into(),
            code: "export".into(),
            ..Default::default()
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_release_version_required() {
        let req = CreateRelease {
            version: " ".into(),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }
}
