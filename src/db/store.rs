//! Storage contracts the license core depends on.
//!
//! The check pipeline and license issuance are written against these
//! traits rather than SQL, so they can run against any backing store. The
//! SQLite implementation forwards to [`super::queries`].

use rusqlite::Connection;

use super::queries;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::models::{License, Product, ProductGroup};

pub trait LicenseStore {
    fn create_license(&self, license: &License) -> Result<()>;

    /// Overwrites type, expiry, allow-lists, auto-allow policy, features,
    /// releases and status of the license with the same key.
    /// Fails with `NotFound` when no license has that key.
    fn update_license(&self, license: &License) -> Result<()>;

    fn get_license_by_key(&self, key: &str) -> Result<License>;

    fn delete_license(&self, key: &str) -> Result<()>;

    /// Append `ip` to the allow-list if the license still has room.
    /// Returns false when nothing was appended.
    fn admit_allowed_ip(&self, key: &str, ip: &str) -> Result<bool>;
}

pub trait CatalogStore {
    fn get_product(&self, id: &str) -> Result<Product>;

    fn get_product_group(&self, id: &str) -> Result<ProductGroup>;

    /// The subset of `codes` that exist for the product, its group, or globally.
    fn confirm_feature_codes(&self, product: &Product, codes: &[String]) -> Result<Vec<String>>;

    /// The subset of `versions` that exist for the product, its group, or globally.
    fn confirm_release_versions(
        &self,
        product: &Product,
        versions: &[String],
    ) -> Result<Vec<String>>;
}

impl LicenseStore for Connection {
    fn create_license(&self, license: &License) -> Result<()> {
        queries::create_license(self, license)
    }

    fn update_license(&self, license: &License) -> Result<()> {
        if queries::update_license(self, license)? {
            Ok(())
        } else {
            Err(AppError::NotFound(msg::LICENSE_NOT_FOUND.into()))
        }
    }

    fn get_license_by_key(&self, key: &str) -> Result<License> {
        queries::get_license_by_key(self, key)?.or_not_found(msg::LICENSE_NOT_FOUND)
    }

    fn delete_license(&self, key: &str) -> Result<()> {
        if queries::delete_license_by_key(self, key)? {
            Ok(())
        } else {
            Err(AppError::NotFound(msg::LICENSE_NOT_FOUND.into()))
        }
    }

    fn admit_allowed_ip(&self, key: &str, ip: &str) -> Result<bool> {
        queries::admit_allowed_ip(self, key, ip)
    }
}

impl CatalogStore for Connection {
    fn get_product(&self, id: &str) -> Result<Product> {
        queries::get_product_by_id(self, id)?.or_not_found(msg::PRODUCT_NOT_FOUND)
    }

    fn get_product_group(&self, id: &str) -> Result<ProductGroup> {
        queries::get_product_group_by_id(self, id)?.or_not_found(msg::PRODUCT_GROUP_NOT_FOUND)
    }

    fn confirm_feature_codes(&self, product: &Product, codes: &[String]) -> Result<Vec<String>> {
        queries::confirm_feature_codes(self, product, codes)
    }

    fn confirm_release_versions(
        &self,
        product: &Product,
        versions: &[String],
    ) -> Result<Vec<String>> {
        queries::confirm_release_versions(self, product, versions)
    }
}
