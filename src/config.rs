use std::env;
use std::str::FromStr;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ipnet::IpNet;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::rate_limit::RateLimitConfig;
use crate::settings::GenerationDefaults;
use crate::util::parse_networks;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub audit_database_path: String,
    pub admin_secret: String,
    /// Base64 Ed25519 private key (32-byte seed or 64-byte keypair).
    pub signing_private_key: Option<String>,
    pub signing_public_key: Option<String>,
    pub trusted_proxies: Vec<IpNet>,
    pub audit_log_enabled: bool,
    /// 0 keeps audit entries forever.
    pub audit_log_retention_days: i64,
    pub admin_rate_limit: RateLimitConfig,
    pub check_rate_limit: RateLimitConfig,
    pub generation_defaults: GenerationDefaults,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build a config from any variable source. Unset, empty and
    /// unparseable values fall back to their defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| var(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let admin_secret = get("ADMIN_SECRET").unwrap_or_else(|| {
            let secret = random_secret();
            tracing::warn!("ADMIN_SECRET not set, generated an ephemeral secret for this run: {}", secret);
            secret
        });

        let trusted_proxies = match get("TRUSTED_PROXIES").map(|v| parse_networks(&v)) {
            Some(Ok(networks)) => networks,
            Some(Err(e)) => {
                tracing::warn!("Ignoring TRUSTED_PROXIES: {}", e);
                Vec::new()
            }
            None => Vec::new(),
        };

        let rate_limit = |pool: &str| {
            let defaults = RateLimitConfig::default();
            RateLimitConfig {
                enabled: get(&format!("RATE_LIMIT_{}_ENABLED", pool))
                    .map_or(defaults.enabled, |v| parse_bool(&v)),
                requests_per_second: parsed(get(&format!("RATE_LIMIT_{}_RPS", pool)))
                    .unwrap_or(defaults.requests_per_second),
                burst: parsed(get(&format!("RATE_LIMIT_{}_BURST", pool))).unwrap_or(defaults.burst),
                cache_size: parsed(get(&format!("RATE_LIMIT_{}_CACHE_SIZE", pool)))
                    .unwrap_or(defaults.cache_size),
                cache_ttl: parsed(get(&format!("RATE_LIMIT_{}_CACHE_TTL_SECS", pool)))
                    .map_or(defaults.cache_ttl, Duration::from_secs),
            }
        };

        Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parsed(get("PORT")).unwrap_or(8080),
            database_path: get("DATABASE_PATH").unwrap_or_else(|| "keyhold.db".to_string()),
            audit_database_path: get("AUDIT_DATABASE_PATH")
                .unwrap_or_else(|| "keyhold_audit.db".to_string()),
            admin_secret,
            signing_private_key: get("RESPONSE_SIGNING_PRIVATE_KEY"),
            signing_public_key: get("RESPONSE_SIGNING_PUBLIC_KEY"),
            trusted_proxies,
            audit_log_enabled: get("AUDIT_LOG_ENABLED").is_none_or(|v| parse_bool(&v)),
            audit_log_retention_days: parsed(get("AUDIT_LOG_RETENTION_DAYS")).unwrap_or(0),
            admin_rate_limit: rate_limit("ADMIN"),
            check_rate_limit: rate_limit("CHECK"),
            generation_defaults: GenerationDefaults::default(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert_eq!(c.addr(), "127.0.0.1:8080");
        assert_eq!(c.database_path, "keyhold.db");
        assert_eq!(c.audit_database_path, "keyhold_audit.db");
        assert!(c.audit_log_enabled);
        assert_eq!(c.audit_log_retention_days, 0);
        assert!(c.signing_private_key.is_none());
        assert!(c.trusted_proxies.is_empty());
        assert_eq!(c.admin_rate_limit, RateLimitConfig::default());
        assert_eq!(c.check_rate_limit, RateLimitConfig::default());
        assert_eq!(c.generation_defaults.length, 12);
    }

    #[test]
    fn test_missing_admin_secret_is_random() {
        let a = config(&[]).admin_secret;
        let b = config(&[]).admin_secret;
        assert!(a.len() >= 40);
        assert_ne!(a, b);
        assert_eq!(config(&[("ADMIN_SECRET", "s3cret")]).admin_secret, "s3cret");
    }

    #[test]
    fn test_rate_limit_pools_are_independent() {
        let c = config(&[
            ("RATE_LIMIT_ADMIN_RPS", "1"),
            ("RATE_LIMIT_ADMIN_BURST", "2"),
            ("RATE_LIMIT_CHECK_ENABLED", "false"),
            ("RATE_LIMIT_CHECK_CACHE_SIZE", "10"),
            ("RATE_LIMIT_CHECK_CACHE_TTL_SECS", "60"),
        ]);
        assert_eq!(c.admin_rate_limit.requests_per_second, 1);
        assert_eq!(c.admin_rate_limit.burst, 2);
        assert!(c.admin_rate_limit.enabled);
        assert!(!c.check_rate_limit.enabled);
        assert_eq!(c.check_rate_limit.cache_size, 10);
        assert_eq!(c.check_rate_limit.cache_ttl, Duration::from_secs(60));
        assert_eq!(c.check_rate_limit.requests_per_second, 5);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let c = config(&[
            ("PORT", "not-a-port"),
            ("RATE_LIMIT_ADMIN_RPS", "-3"),
            ("TRUSTED_PROXIES", "10.0.0.0/8,bogus"),
        ]);
        assert_eq!(c.port, 8080);
        assert_eq!(c.admin_rate_limit.requests_per_second, 5);
        assert!(c.trusted_proxies.is_empty());
    }

    #[test]
    fn test_flags_and_lists() {
        let c = config(&[
            ("AUDIT_LOG_ENABLED", "0"),
            ("AUDIT_LOG_RETENTION_DAYS", "30"),
            ("TRUSTED_PROXIES", "10.0.0.0/8, 127.0.0.1"),
            ("RESPONSE_SIGNING_PRIVATE_KEY", "  abc  "),
        ]);
        assert!(!c.audit_log_enabled);
        assert_eq!(c.audit_log_retention_days, 30);
        assert_eq!(c.trusted_proxies.len(), 2);
        assert_eq!(c.signing_private_key.as_deref(), Some("abc"));
    }
}
