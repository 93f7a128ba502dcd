use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::{AppError, Result, msg};
use crate::keygen::MAX_KEY_LENGTH;
use crate::pagination::PaginationQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseType {
    Perpetual,
    Timed,
    Trial,
}

/// `Expired` is informational only: the check pipeline computes expiry from
/// `expires_at` and never reads this flag for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Revoked,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    /// Generated once, globally unique, never reassigned.
    pub key: String,
    pub owner_id: Option<String>,
    #[serde(rename = "type")]
    pub license_type: LicenseType,
    pub product_id: String,
    pub allowed_ips: Vec<String>,
    pub allowed_networks: Vec<String>,
    pub auto_allowed_ip: bool,
    pub auto_allowed_ip_limit: i64,
    /// Unix timestamp; None = never expires
    pub expires_at: Option<i64>,
    pub features: Vec<String>,
    pub releases: Vec<String>,
    pub status: LicenseStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl License {
    pub fn is_revoked(&self) -> bool {
        self.status == LicenseStatus::Revoked
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }

    /// Whether the check pipeline must evaluate the caller's address.
    pub fn has_ip_restrictions(&self) -> bool {
        !self.allowed_ips.is_empty() || !self.allowed_networks.is_empty() || self.auto_allowed_ip
    }
}

/// Body of `POST /admin/keys`.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateLicense {
    pub product_id: String,
    /// Falls back to the product's default license type.
    #[serde(rename = "type", default)]
    pub license_type: Option<LicenseType>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// `30d`, `2w`, `1mo`, ... mutually exclusive with `expires_at`
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub separator: Option<String>,
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub length: Option<i64>,
    #[serde(default)]
    pub feature_codes: Vec<String>,
    #[serde(default)]
    pub release_versions: Vec<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub allowed_networks: Vec<String>,
    #[serde(default)]
    pub auto_allowed_ip: Option<bool>,
    #[serde(default)]
    pub auto_allowed_ip_limit: Option<i64>,
    #[serde(default)]
    pub owner_id: Option<String>,
}

impl GenerateLicense {
    pub fn validate(&self) -> Result<()> {
        if self.product_id.trim().is_empty() {
            return Err(AppError::BadRequest("product_id is required".into()));
        }
        if self.expires_at.is_some() && self.duration.is_some() {
            return Err(AppError::BadRequest(msg::EXPIRY_CONFLICT.into()));
        }
        if let Some(length) = self.length {
            if length < 0 {
                return Err(AppError::BadRequest("length cannot be negative".into()));
            }
            if length > MAX_KEY_LENGTH as i64 {
                return Err(AppError::BadRequest(format!(
                    "length cannot exceed {}",
                    MAX_KEY_LENGTH
                )));
            }
        }
        if let Some(limit) = self.auto_allowed_ip_limit
            && limit < 0
        {
            return Err(AppError::BadRequest(
                "auto_allowed_ip_limit cannot be negative".into(),
            ));
        }
        validate_allow_lists(&self.allowed_ips, &self.allowed_networks)
    }
}

/// Body of `PUT /admin/keys`; absent fields are left unchanged.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateLicense {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub license_type: Option<LicenseType>,
    #[serde(
        default,
        deserialize_with = "super::deserialize_optional_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<Option<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_ips: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_networks: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_codes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_versions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LicenseStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_allowed_ip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_allowed_ip_limit: Option<i64>,
    /// Recorded on the admin action only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl UpdateLicense {
    pub fn validate(&self) -> Result<()> {
        if self.expires_at.is_some() && self.duration.is_some() {
            return Err(AppError::BadRequest(msg::EXPIRY_CONFLICT.into()));
        }
        if let Some(limit) = self.auto_allowed_ip_limit
            && limit < 0
        {
            return Err(AppError::BadRequest(
                "auto_allowed_ip_limit cannot be negative".into(),
            ));
        }
        validate_allow_lists(
            self.allowed_ips.as_deref().unwrap_or_default(),
            self.allowed_networks.as_deref().unwrap_or_default(),
        )
    }
}

fn validate_allow_lists(ips: &[String], networks: &[String]) -> Result<()> {
    for ip in ips {
        if ip.trim().parse::<std::net::IpAddr>().is_err() {
            return Err(AppError::BadRequest(format!("Invalid IP address: {}", ip)));
        }
    }
    for network in networks {
        if network.trim().parse::<ipnet::IpNet>().is_err() {
            return Err(AppError::BadRequest(format!("Invalid CIDR network: {}", network)));
        }
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct LicenseListQuery {
    pub owner_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl LicenseListQuery {
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

    fn license() -> License {
        License {
            id: "kh_lic_1".into(),
            key: "K".into(),
            owner_id: None,
            license_type: LicenseType::Perpetual,
            product_id: "kh_prod_1".into(),
            allowed_ips: vec![],
            allowed_networks: vec![],
            auto_allowed_ip: false,
            auto_allowed_ip_limit: 0,
            expires_at: None,
            features: vec![],
            releases: vec![],
            status: LicenseStatus::Active,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_expiry_is_strict() {
        let mut l = license();
        assert!(!l.is_expired(100));
        l.expires_at = Some(100);
        assert!(!l.is_expired(100));
        assert!(l.is_expired(101));
    }

    #[test]
    fn test_type_serializes_under_type_key() {
        let json = serde_json::to_value(license()).unwrap();
        assert_eq!(json["type"], "perpetual");
        assert_eq!(json["status"], "active");
    }

    #[test]
    fn test_generate_rejects_both_expiry_forms() {
        let req = GenerateLicense {
            product_id: "p".into(),
            expires_at: Some(1),
            duration: Some("1d".into()),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_generate_rejects_bad_allow_lists() {
        let req = GenerateLicense {
            product_id: "p".into(),
            allowed_ips: vec!["10.0.0.300".into()],
            ..Default::default()
        };
        assert!(req.validate().is_err());

        let req = GenerateLicense {
            product_id: "p".into(),
            allowed_networks: vec!["10.0.0.0/33".into()],
            ..Default::default()
        };
        assert!(req.validate().is_err());

        let req = GenerateLicense {
            product_id: "p".into(),
            allowed_ips: vec!["2001:db8::1".into()],
            allowed_networks: vec!["192.168.1.0/24".into()],
            ..Default::default()
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_update_distinguishes_null_expiry() {
        let clear: UpdateLicense = serde_json::from_str(r#"{"expires_at": null}"#).unwrap();
        assert_eq!(clear.expires_at, Some(None));

        let untouched: UpdateLicense = serde_json::from_str("{}").unwrap();
        assert_eq!(untouched.expires_at, None);
    }
}
