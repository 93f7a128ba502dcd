mod from_row;
pub mod queries;
mod schema;
mod store;

pub use schema::{init_audit_db, init_db};
pub use store::{CatalogStore, LicenseStore};

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

use ed25519_dalek::SigningKey;
use ipnet::IpNet;
use jwt_simple::prelude::Ed25519KeyPair;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::audit::AuditLogger;
use crate::config::Config;
use crate::jwt;
use crate::rate_limit::ClientRateLimiter;
use crate::settings::GenerationDefaults;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state holding database pools and configuration
#[derive(Clone)]
pub struct AppState {
    /// Main database pool (products, groups, catalog, licenses)
    pub db: DbPool,
    /// Audit log database pool (separate file to isolate growth)
    pub audit: DbPool,
    pub audit_log: AuditLogger,
    /// Bearer secret for `/admin/*`.
    pub admin_secret: Arc<str>,
    /// Offline-token key, decoded once at startup; None disables tokens.
    pub token_key: Option<Arc<Ed25519KeyPair>>,
    pub signing_public_key: Option<Arc<str>>,
    /// The same key in the form used for response signatures.
    pub response_signing_key: Option<Arc<SigningKey>>,
    pub generation_defaults: Arc<GenerationDefaults>,
    /// Peers whose `X-Forwarded-For` header is believed.
    pub trusted_proxies: Arc<[IpNet]>,
    pub admin_rate_limiter: Arc<ClientRateLimiter>,
    pub check_rate_limiter: Arc<ClientRateLimiter>,
}

impl AppState {
    /// Assemble state from config. A malformed signing key is logged and
    /// disables token issuance and response signing instead of failing.
    pub fn new(db: DbPool, audit: DbPool, audit_log: AuditLogger, config: &Config) -> Self {
        let signing_key = config
            .signing_private_key
            .as_deref()
            .and_then(|key| match load_signing_key(key) {
                Ok(keys) => Some(keys),
                Err(e) => {
                    tracing::error!("Response signing disabled: {}", e);
                    None
                }
            });

        let derived_public = signing_key
            .as_ref()
            .map(|(_, decoded)| BASE64.encode(decoded.verifying_key().to_bytes()));
        if let (Some(derived), Some(configured)) = (&derived_public, &config.signing_public_key)
            && derived != configured
        {
            tracing::warn!("RESPONSE_SIGNING_PUBLIC_KEY does not match the private key, using the derived key");
        }
        let signing_public_key = derived_public
            .or_else(|| config.signing_public_key.clone())
            .map(Arc::from);

        let (token_key, response_signing_key) = match signing_key {
            Some((token_key, decoded)) => (Some(Arc::new(token_key)), Some(Arc::new(decoded))),
            None => (None, None),
        };

        Self {
            db,
            audit,
            audit_log,
            admin_secret: Arc::from(config.admin_secret.as_str()),
            token_key,
            signing_public_key,
            response_signing_key,
            generation_defaults: Arc::new(config.generation_defaults.clone()),
            trusted_proxies: Arc::from(config.trusted_proxies.as_slice()),
            admin_rate_limiter: Arc::new(ClientRateLimiter::new(config.admin_rate_limit)),
            check_rate_limiter: Arc::new(ClientRateLimiter::new(config.check_rate_limit)),
        }
    }
}

fn load_signing_key(private_key_b64: &str) -> Result<(Ed25519KeyPair, SigningKey), jwt::SigningError> {
    let decoded = jwt::decode_signing_key(private_key_b64)?;
    let token_key = jwt::token_key_pair(&decoded)?;
    Ok((token_key, decoded))
}

fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(configure_connection);
    Pool::builder().max_size(10).build(manager)
}

/// Pool over a private shared-cache in-memory database. Every connection
/// in the pool sees the same data; other pools do not.
pub fn create_memory_pool() -> Result<DbPool, r2d2::Error> {
    let uri = format!(
        "file:keyhold-{}?mode=memory&cache=shared",
        uuid::Uuid::new_v4().simple()
    );
    let manager = SqliteConnectionManager::file(uri).with_init(|conn| {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    Pool::builder().max_size(4).build(manager)
}
