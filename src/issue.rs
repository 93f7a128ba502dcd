//! License issuance and amendment.
//!
//! Generation resolves the effective settings once and bakes them into the
//! new record. Feature codes and release versions are passed through the
//! catalog store, which keeps only those that belong to the product, its
//! group, or are global.

use crate::db::{CatalogStore, LicenseStore};
use crate::error::{AppError, Result, is_constraint_violation, msg};
use crate::id::EntityType;
use crate::keygen::{generate_license_key, parse_charset};
use crate::models::{
    GenerateLicense, License, LicenseStatus, Product, ProductGroup, UpdateLicense,
};
use crate::settings::{GenerationDefaults, SettingsOverrides, resolve_settings};
use crate::util::parse_expiration_duration;

/// Fresh keys tried before a unique-key collision becomes an error.
const MAX_KEY_ATTEMPTS: usize = 3;

/// Generate and persist a new license.
pub fn issue_license<S>(
    store: &S,
    input: &GenerateLicense,
    defaults: &GenerationDefaults,
    now: i64,
) -> Result<License>
where
    S: LicenseStore + CatalogStore + ?Sized,
{
    input.validate()?;

    let product = store.get_product(input.product_id.trim())?;
    let group = load_group(store, &product)?;
    let inherited = group.as_ref().map(|g| &g.template);

    let license_type = input
        .license_type
        .or(product.template.license_type)
        .or_else(|| inherited.and_then(|t| t.license_type))
        .ok_or_else(|| AppError::BadRequest(msg::LICENSE_TYPE_REQUIRED.into()))?;

    let expires_at = match (input.expires_at, input.duration.as_deref()) {
        (Some(at), _) => Some(at),
        (None, Some(duration)) => Some(parse_expiration_duration(duration, now)?),
        (None, None) => {
            let default_duration = product
                .template
                .license_duration
                .as_deref()
                .filter(|d| !d.is_empty())
                .or_else(|| {
                    inherited
                        .and_then(|t| t.license_duration.as_deref())
                        .filter(|d| !d.is_empty())
                });
            default_duration
                .map(|d| parse_expiration_duration(d, now))
                .transpose()?
        }
    };

    let overrides = SettingsOverrides {
        prefix: input.prefix.clone(),
        separator: input.separator.clone(),
        charset: input.charset.clone(),
        length: input.length,
        auto_allowed_ip: input.auto_allowed_ip,
        auto_allowed_ip_limit: input.auto_allowed_ip_limit,
    };
    let settings = resolve_settings(&product, group.as_ref(), &overrides, defaults);
    let alphabet = parse_charset(&settings.charset)?;

    let features = store.confirm_feature_codes(&product, &input.feature_codes)?;
    let releases = store.confirm_release_versions(&product, &input.release_versions)?;

    let mut license = License {
        id: EntityType::License.gen_id(),
        key: String::new(),
        owner_id: input.owner_id.clone().or_else(|| product.owner_id.clone()),
        license_type,
        product_id: product.id.clone(),
        allowed_ips: trimmed(&input.allowed_ips),
        allowed_networks: trimmed(&input.allowed_networks),
        auto_allowed_ip: settings.auto_allowed_ip,
        auto_allowed_ip_limit: settings.auto_allowed_ip_limit,
        expires_at,
        features,
        releases,
        status: LicenseStatus::Active,
        created_at: now,
        updated_at: now,
    };

    for attempt in 1..=MAX_KEY_ATTEMPTS {
        license.key = generate_license_key(
            &settings.prefix,
            settings.length,
            &settings.separator,
            &alphabet,
        )?;

        match store.create_license(&license) {
            Ok(()) => {
                tracing::info!(
                    key = %license.key,
                    product_id = %license.product_id,
                    license_type = license.license_type.as_ref(),
                    "Generated license"
                );
                return Ok(license);
            }
            Err(AppError::Database(ref e)) if is_constraint_violation(e) && attempt < MAX_KEY_ATTEMPTS => {
                tracing::warn!(attempt, "License key collision, regenerating");
            }
            Err(e) => return Err(e),
        }
    }

    Err(AppError::Internal("Failed to generate a unique license key".into()))
}

/// A dangling group reference is treated as no group.
fn load_group<S: CatalogStore + ?Sized>(store: &S, product: &Product) -> Result<Option<ProductGroup>> {
    let Some(ref group_id) = product.product_group_id else {
        return Ok(None);
    };
    match store.get_product_group(group_id) {
        Ok(group) => Ok(Some(group)),
        Err(AppError::NotFound(_)) => {
            tracing::debug!(product_id = %product.id, group_id = %group_id, "Product group missing, ignoring");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn trimmed(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.trim().to_string()).collect()
}

/// Apply a partial update to the license with `key` and persist it.
pub fn amend_license<S>(store: &S, key: &str, input: &UpdateLicense, now: i64) -> Result<License>
where
    S: LicenseStore + CatalogStore + ?Sized,
{
    input.validate()?;

    let mut license = store.get_license_by_key(key)?;

    if let Some(license_type) = input.license_type {
        license.license_type = license_type;
    }
    if let Some(expires_at) = input.expires_at {
        license.expires_at = expires_at;
    }
    if let Some(ref duration) = input.duration {
        license.expires_at = Some(parse_expiration_duration(duration, now)?);
    }
    if let Some(ref ips) = input.allowed_ips {
        license.allowed_ips = trimmed(ips);
    }
    if let Some(ref networks) = input.allowed_networks {
        license.allowed_networks = trimmed(networks);
    }
    if let Some(status) = input.status {
        license.status = status;
    }
    if let Some(enabled) = input.auto_allowed_ip {
        license.auto_allowed_ip = enabled;
    }
    if let Some(limit) = input.auto_allowed_ip_limit {
        license.auto_allowed_ip_limit = limit;
    }

    if input.feature_codes.is_some() || input.release_versions.is_some() {
        let product = store.get_product(&license.product_id)?;
        if let Some(ref codes) = input.feature_codes {
            license.features = store.confirm_feature_codes(&product, codes)?;
        }
        if let Some(ref versions) = input.release_versions {
            license.releases = store.confirm_release_versions(&product, versions)?;
        }
    }

    license.updated_at = now;
    store.update_license(&license)?;
    Ok(license)
}

/// Mark the license revoked. Revoking twice is not an error.
pub fn revoke_license<S: LicenseStore + ?Sized>(store: &S, key: &str, now: i64) -> Result<License> {
    let mut license = store.get_license_by_key(key)?;
    license.status = LicenseStatus::Revoked;
    license.updated_at = now;
    store.update_license(&license)?;
    Ok(license)
}
