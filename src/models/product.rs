use serde::{Deserialize, Serialize};

use super::LicenseType;
use crate::error::{AppError, Result, msg};
use crate::keygen::{MAX_KEY_LENGTH, parse_charset};
use crate::util::parse_expiration_duration;

/// License-generation defaults shared by products and product groups.
/// Empty strings and zeroes mean "not set, inherit".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseTemplate {
    pub license_prefix: String,
    pub license_separator: String,
    pub license_charset: String,
    pub license_length: i64,
    pub license_type: Option<LicenseType>,
    pub license_duration: Option<String>,
    pub auto_allowed_ip: bool,
    pub auto_allowed_ip_limit: i64,
}

impl LicenseTemplate {
    pub fn validate(&self) -> Result<()> {
        validate_template_fields(
            Some(&self.license_charset),
            self.license_duration.as_deref(),
            Some(self.license_length),
            Some(self.auto_allowed_ip_limit),
        )
    }
}

/// Partial update of a [`LicenseTemplate`]; absent fields are left unchanged.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateLicenseTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_separator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_charset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_length: Option<i64>,
    #[serde(
        deserialize_with = "super::deserialize_optional_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub license_type: Option<Option<LicenseType>>,
    #[serde(
        deserialize_with = "super::deserialize_optional_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub license_duration: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_allowed_ip: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_allowed_ip_limit: Option<i64>,
}

impl UpdateLicenseTemplate {
    pub fn validate(&self) -> Result<()> {
        validate_template_fields(
            self.license_charset.as_deref(),
            self.license_duration.as_ref().and_then(|d| d.as_deref()),
            self.license_length,
            self.auto_allowed_ip_limit,
        )
    }
}

fn validate_template_fields(
    charset: Option<&str>,
    duration: Option<&str>,
    length: Option<i64>,
    auto_allowed_ip_limit: Option<i64>,
) -> Result<()> {
    if let Some(charset) = charset {
        parse_charset(charset)?;
    }
    if let Some(duration) = duration {
        parse_expiration_duration(duration, chrono::Utc::now().timestamp())?;
    }
    if length.is_some_and(|l| l < 0) {
        return Err(AppError::BadRequest("license_length cannot be negative".into()));
    }
    if length.is_some_and(|l| l > MAX_KEY_LENGTH as i64) {
        return Err(AppError::BadRequest(format!(
            "license_length cannot exceed {}",
            MAX_KEY_LENGTH
        )));
    }
    if auto_allowed_ip_limit.is_some_and(|l| l < 0) {
        return Err(AppError::BadRequest(
            "auto_allowed_ip_limit cannot be negative".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub owner_id: Option<String>,
    pub name: String,
    pub description: String,
    pub product_group_id: Option<String>,
    #[serde(flatten)]
    pub template: LicenseTemplate,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub product_group_id: Option<String>,
    #[serde(flatten)]
    pub template: LicenseTemplate,
}

impl CreateProduct {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest(msg::NAME_EMPTY.into()));
        }
        self.template.validate()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateProduct {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Use null to detach the product from its group.
    #[serde(
        default,
        deserialize_with = "super::deserialize_optional_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub product_group_id: Option<Option<String>>,
    #[serde(flatten)]
    pub template: UpdateLicenseTemplate,
}

impl UpdateProduct {
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
pub struct ProductListQuery {
    pub owner_id: Option<String>,
    pub product_group_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ProductListQuery {
    pub fn page(&self) -> crate::pagination::PaginationQuery {
        crate::pagination::PaginationQuery {
            limit: self.limit,
            offset: self.offset,
        }
    }
}
