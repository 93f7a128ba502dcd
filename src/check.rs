//! The license check pipeline.
//!
//! Rules run in a fixed order and stop at the first failure:
//! status, expiry, client address, version, feature. A failed rule is not
//! an error: the caller answers `200` with `valid: false` and the reason.
//!
//! The address rule is the only one with a side effect. When auto-allow is
//! on and the license has room, an unseen address is appended to the
//! allow-list through [`LicenseStore::admit_allowed_ip`].

use std::net::IpAddr;

use ipnet::IpNet;

use crate::db::LicenseStore;
use crate::models::License;

pub const REASON_REVOKED: &str = "License is revoked";
pub const REASON_EXPIRED: &str = "License has expired";
pub const REASON_UNKNOWN_CLIENT_IP: &str = "Unable to determine client IP for validation";
pub const REASON_IP_NOT_ALLOWED: &str = "IP address not allowed";

/// Optional constraints sent with a check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckConstraints {
    pub version: Option<String>,
    pub feature: Option<String>,
}

impl CheckConstraints {
    /// Empty values count as "not supplied".
    pub fn new(version: Option<String>, feature: Option<String>) -> Self {
        Self {
            version: version.filter(|v| !v.is_empty()),
            feature: feature.filter(|f| !f.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub valid: bool,
    /// Present only when `valid` is false.
    pub reason: Option<String>,
}

impl CheckOutcome {
    fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Evaluate `license` for a caller at `client_ip`.
///
/// `license` is updated in place when the caller's address is admitted, so
/// it reflects what was persisted. Store failures during admission are
/// logged and do not turn an admitted address into a rejection.
pub fn check_license<S: LicenseStore + ?Sized>(
    store: &S,
    license: &mut License,
    client_ip: Option<&str>,
    constraints: &CheckConstraints,
    now: i64,
) -> CheckOutcome {
    if license.is_revoked() {
        return CheckOutcome::invalid(REASON_REVOKED);
    }

    if license.is_expired(now) {
        return CheckOutcome::invalid(REASON_EXPIRED);
    }

    if license.has_ip_restrictions()
        && let Err(reason) = check_client_ip(store, license, client_ip)
    {
        return CheckOutcome::invalid(reason);
    }

    if let Some(ref version) = constraints.version
        && !license.releases.is_empty()
        && !license.releases.iter().any(|r| r == version)
    {
        return CheckOutcome::invalid(format!("License not valid for version {}", version));
    }

    // Unlike releases, an empty feature list grants nothing.
    if let Some(ref feature) = constraints.feature
        && !license.features.iter().any(|f| f == feature)
    {
        return CheckOutcome::invalid(format!("Feature not enabled: {}", feature));
    }

    CheckOutcome::valid()
}

fn check_client_ip<S: LicenseStore + ?Sized>(
    store: &S,
    license: &mut License,
    client_ip: Option<&str>,
) -> Result<(), &'static str> {
    let addr = client_ip
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
        .map(|ip| ip.to_canonical())
        .ok_or(REASON_UNKNOWN_CLIENT_IP)?;

    if is_address_allowed(license, addr) {
        return Ok(());
    }

    let has_room = i64::try_from(license.allowed_ips.len())
        .is_ok_and(|len| len < license.auto_allowed_ip_limit);
    if !license.auto_allowed_ip || !has_room {
        return Err(REASON_IP_NOT_ALLOWED);
    }

    let ip_text = addr.to_string();
    match store.admit_allowed_ip(&license.key, &ip_text) {
        Ok(true) => {
            tracing::info!(key = %license.key, ip = %ip_text, "Auto-allowed new client IP");
            license.allowed_ips.push(ip_text);
            Ok(())
        }
        // Lost a race: another check filled the last slot, or admitted
        // this same address first.
        Ok(false) => match store.get_license_by_key(&license.key) {
            Ok(fresh) => {
                license.allowed_ips = fresh.allowed_ips;
                if is_literal_allowed(&license.allowed_ips, addr) {
                    Ok(())
                } else {
                    Err(REASON_IP_NOT_ALLOWED)
                }
            }
            Err(e) => {
                tracing::warn!(key = %license.key, error = %e, "Failed to re-read license after auto-allow");
                Ok(())
            }
        },
        Err(e) => {
            tracing::warn!(key = %license.key, ip = %ip_text, error = %e, "Failed to persist auto-allowed IP");
            license.allowed_ips.push(ip_text);
            Ok(())
        }
    }
}

/// True when `addr` equals a listed address or falls inside a listed network.
pub fn is_address_allowed(license: &License, addr: IpAddr) -> bool {
    is_literal_allowed(&license.allowed_ips, addr)
        || license
            .allowed_networks
            .iter()
            .filter_map(|n| n.trim().parse::<IpNet>().ok())
            .any(|net| net.contains(&addr))
}

/// Literal entries compare by address; an entry written in CIDR form is
/// compared by its address part only.
fn is_literal_allowed(allowed_ips: &[String], addr: IpAddr) -> bool {
    allowed_ips.iter().any(|entry| {
        let entry = entry.trim();
        entry
            .parse::<IpAddr>()
            .ok()
            .or_else(|| entry.parse::<IpNet>().ok().map(|net| net.addr()))
            .is_some_and(|allowed| allowed.to_canonical() == addr)
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;
    use crate::error::{AppError, Result};
    use crate::models::{LicenseStatus, LicenseType};

    const NOW: i64 = 1_700_000_000;

    /// In-memory store with the same admission rule as the SQL store.
    #[derive(Default)]
    struct MemoryStore {
        licenses: RefCell<HashMap<String, License>>,
        admissions: RefCell<u32>,
    }

    impl MemoryStore {
        fn with(license: &License) -> Self {
            let store = Self::default();
            store
                .licenses
                .borrow_mut()
                .insert(license.key.clone(), license.clone());
            store
        }

        fn stored(&self, key: &str) -> License {
            self.licenses.borrow()[key].clone()
        }
    }

    impl LicenseStore for MemoryStore {
        fn create_license(&self, license: &License) -> Result<()> {
            self.licenses
                .borrow_mut()
                .insert(license.key.clone(), license.clone());
            Ok(())
        }

        fn update_license(&self, license: &License) -> Result<()> {
            self.create_license(license)
        }

        fn get_license_by_key(&self, key: &str) -> Result<License> {
            self.licenses
                .borrow()
                .get(key)
                .cloned()
                .ok_or_else(|| AppError::NotFound("License not found".into()))
        }

        fn delete_license(&self, key: &str) -> Result<()> {
            self.licenses.borrow_mut().remove(key);
            Ok(())
        }

        fn admit_allowed_ip(&self, key: &str, ip: &str) -> Result<bool> {
            *self.admissions.borrow_mut() += 1;
            let mut licenses = self.licenses.borrow_mut();
            let license = licenses
                .get_mut(key)
                .ok_or_else(|| AppError::NotFound("License not found".into()))?;
            if !license.auto_allowed_ip
                || license.allowed_ips.len() as i64 >= license.auto_allowed_ip_limit
                || license.allowed_ips.iter().any(|a| a == ip)
            {
                return Ok(false);
            }
            license.allowed_ips.push(ip.to_string());
            Ok(true)
        }
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    impl LicenseStore for BrokenStore {
        fn create_license(&self, _: &License) -> Result<()> {
            Err(AppError::Internal("disk full".into()))
        }
        fn update_license(&self, _: &License) -> Result<()> {
            Err(AppError::Internal("disk full".into()))
        }
        fn get_license_by_key(&self, _: &str) -> Result<License> {
            Err(AppError::Internal("disk full".into()))
        }
        fn delete_license(&self, _: &str) -> Result<()> {
            Err(AppError::Internal("disk full".into()))
        }
        fn admit_allowed_ip(&self, _: &str, _: &str) -> Result<bool> {
            Err(AppError::Internal("disk full".into()))
        }
    }

    fn license() -> License {
        License {
            id: "kh_lic_1".into(),
            key: "TEST-abcdefghijkl".into(),
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
            created_at: NOW,
            updated_at: NOW,
        }
    }

    fn run(license: &mut License, ip: &str, constraints: &CheckConstraints) -> CheckOutcome {
        let store = MemoryStore::with(license);
        check_license(&store, license, Some(ip), constraints, NOW)
    }

    fn reason(outcome: &CheckOutcome) -> &str {
        outcome.reason.as_deref().unwrap_or("")
    }

    #[test]
    fn test_unrestricted_license_is_valid() {
        let outcome = run(&mut license(), "203.0.113.5", &CheckConstraints::default());
        assert_eq!(outcome, CheckOutcome { valid: true, reason: None });
    }

    #[test]
    fn test_revoked_is_reported_before_expiry() {
        let mut l = license();
        l.status = LicenseStatus::Revoked;
        l.expires_at = Some(NOW - 10);
        let outcome = run(&mut l, "203.0.113.5", &CheckConstraints::default());
        assert!(!outcome.valid);
        assert_eq!(reason(&outcome), REASON_REVOKED);
    }

    #[test]
    fn test_expiry_is_reported_before_ip() {
        let mut l = license();
        l.expires_at = Some(NOW - 1);
        l.allowed_ips = vec!["10.0.0.1".into()];
        let outcome = run(&mut l, "10.9.9.9", &CheckConstraints::default());
        assert_eq!(reason(&outcome), REASON_EXPIRED);
    }

    #[test]
    fn test_expired_status_flag_is_not_read() {
        let mut l = license();
        l.status = LicenseStatus::Expired;
        l.expires_at = Some(NOW + 3600);
        assert!(run(&mut l, "10.0.0.1", &CheckConstraints::default()).valid);
    }

    #[test]
    fn test_expiry_boundary_is_strict() {
        let mut l = license();
        l.expires_at = Some(NOW);
        assert!(run(&mut l, "10.0.0.1", &CheckConstraints::default()).valid);
    }

    #[test]
    fn test_literal_ip_matches_only_itself() {
        let mut l = license();
        l.allowed_ips = vec!["10.0.0.1".into()];
        assert!(run(&mut l, "10.0.0.1", &CheckConstraints::default()).valid);
        let outcome = run(&mut l, "10.0.0.2", &CheckConstraints::default());
        assert_eq!(reason(&outcome), REASON_IP_NOT_ALLOWED);
    }

    #[test]
    fn test_cidr_network_matching() {
        let mut l = license();
        l.allowed_networks = vec!["192.168.1.0/24".into()];
        for ip in ["192.168.1.1", "192.168.1.100", "192.168.1.254"] {
            assert!(run(&mut l, ip, &CheckConstraints::default()).valid, "{}", ip);
        }
        assert!(!run(&mut l, "192.168.2.1", &CheckConstraints::default()).valid);
    }

    #[test]
    fn test_ipv6_literal_equality() {
        let mut l = license();
        l.allowed_ips = vec!["2001:db8::1".into()];
        assert!(run(&mut l, "2001:0db8:0000::0001", &CheckConstraints::default()).valid);
        assert!(!run(&mut l, "2001:db8::2", &CheckConstraints::default()).valid);
    }

    #[test]
    fn test_ipv4_mapped_address_matches_ipv4_entry() {
        let mut l = license();
        l.allowed_ips = vec!["10.0.0.1".into()];
        assert!(run(&mut l, "::ffff:10.0.0.1", &CheckConstraints::default()).valid);
    }

    #[test]
    fn test_unparseable_client_ip() {
        let mut l = license();
        l.allowed_ips = vec!["10.0.0.1".into()];
        let outcome = run(&mut l, "not-an-ip", &CheckConstraints::default());
        assert_eq!(reason(&outcome), REASON_UNKNOWN_CLIENT_IP);

        let store = MemoryStore::with(&l);
        let outcome = check_license(&store, &mut l, None, &CheckConstraints::default(), NOW);
        assert_eq!(reason(&outcome), REASON_UNKNOWN_CLIENT_IP);
    }

    #[test]
    fn test_unrestricted_license_ignores_missing_ip() {
        let mut l = license();
        let store = MemoryStore::with(&l);
        let outcome = check_license(&store, &mut l, None, &CheckConstraints::default(), NOW);
        assert!(outcome.valid);
    }

    #[test]
    fn test_auto_allow_grows_to_limit() {
        let mut l = license();
        l.auto_allowed_ip = true;
        l.auto_allowed_ip_limit = 2;
        let store = MemoryStore::with(&l);
        let none = CheckConstraints::default();

        let mut current = store.stored(&l.key);
        assert!(check_license(&store, &mut current, Some("10.0.0.1"), &none, NOW).valid);
        let mut current = store.stored(&l.key);
        assert!(check_license(&store, &mut current, Some("10.0.0.2"), &none, NOW).valid);
        assert_eq!(store.stored(&l.key).allowed_ips, vec!["10.0.0.1", "10.0.0.2"]);

        let mut current = store.stored(&l.key);
        let outcome = check_license(&store, &mut current, Some("10.0.0.3"), &none, NOW);
        assert_eq!(reason(&outcome), REASON_IP_NOT_ALLOWED);

        // A known address stays allowed and does not grow the list.
        let mut current = store.stored(&l.key);
        assert!(check_license(&store, &mut current, Some("10.0.0.1"), &none, NOW).valid);
        assert_eq!(store.stored(&l.key).allowed_ips.len(), 2);
        assert_eq!(*store.admissions.borrow(), 2);
    }

    #[test]
    fn test_auto_allow_updates_license_in_place() {
        let mut l = license();
        l.auto_allowed_ip = true;
        l.auto_allowed_ip_limit = 1;
        let store = MemoryStore::with(&l);
        check_license(&store, &mut l, Some("10.0.0.7"), &CheckConstraints::default(), NOW);
        assert_eq!(l.allowed_ips, vec!["10.0.0.7"]);
    }

    #[test]
    fn test_auto_allow_lost_race_rechecks_store() {
        let mut stale = license();
        stale.auto_allowed_ip = true;
        stale.auto_allowed_ip_limit = 1;
        let store = MemoryStore::with(&stale);

        // Another request fills the only slot after `stale` was read.
        let mut other = stale.clone();
        assert!(check_license(&store, &mut other, Some("10.0.0.1"), &CheckConstraints::default(), NOW).valid);

        let outcome = check_license(&store, &mut stale, Some("10.0.0.2"), &CheckConstraints::default(), NOW);
        assert_eq!(reason(&outcome), REASON_IP_NOT_ALLOWED);
        assert_eq!(stale.allowed_ips, vec!["10.0.0.1"]);
    }

    #[test]
    fn test_auto_allow_disabled_does_not_touch_store() {
        let mut l = license();
        l.allowed_ips = vec!["10.0.0.1".into()];
        l.auto_allowed_ip_limit = 5;
        let store = MemoryStore::with(&l);
        let outcome = check_license(&store, &mut l, Some("10.0.0.2"), &CheckConstraints::default(), NOW);
        assert!(!outcome.valid);
        assert_eq!(*store.admissions.borrow(), 0);
    }

    #[test]
    fn test_persistence_failure_keeps_admission() {
        let mut l = license();
        l.auto_allowed_ip = true;
        l.auto_allowed_ip_limit = 3;
        let outcome = check_license(&BrokenStore, &mut l, Some("10.0.0.9"), &CheckConstraints::default(), NOW);
        assert!(outcome.valid);
        assert_eq!(l.allowed_ips, vec!["10.0.0.9"]);
    }

    #[test]
    fn test_version_gating() {
        let mut l = license();
        let v1 = CheckConstraints::new(Some("1.0.0".into()), None);
        let v2 = CheckConstraints::new(Some("2.0.0".into()), None);

        assert!(run(&mut l, "10.0.0.1", &v2).valid);

        l.releases = vec!["1.0.0".into()];
        assert!(run(&mut l, "10.0.0.1", &v1).valid);
        let outcome = run(&mut l, "10.0.0.1", &v2);
        assert_eq!(reason(&outcome), "License not valid for version 2.0.0");
    }

    #[test]
    fn test_feature_gating() {
        let mut l = license();
        let sso = CheckConstraints::new(None, Some("sso".into()));
        let other = CheckConstraints::new(None, Some("other".into()));

        let outcome = run(&mut l, "10.0.0.1", &sso);
        assert_eq!(reason(&outcome), "Feature not enabled: sso");

        l.features = vec!["sso".into()];
        assert!(run(&mut l, "10.0.0.1", &sso).valid);
        assert_eq!(reason(&run(&mut l, "10.0.0.1", &other)), "Feature not enabled: other");
    }

    #[test]
    fn test_version_checked_before_feature() {
        let mut l = license();
        l.releases = vec!["1.0.0".into()];
        let both = CheckConstraints::new(Some("9.9.9".into()), Some("missing".into()));
        assert_eq!(reason(&run(&mut l, "10.0.0.1", &both)), "License not valid for version 9.9.9");
    }

    #[test]
    fn test_empty_constraints_are_ignored() {
        let c = CheckConstraints::new(Some(String::new()), Some(String::new()));
        assert_eq!(c, CheckConstraints::default());
    }
}
