use std::net::SocketAddr;

use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keyhold::audit::AuditLogger;
use keyhold::config::Config;
use keyhold::db::{AppState, DbPool, create_pool, init_audit_db, init_db, queries};
use keyhold::handlers;
use keyhold::jwt;

#[derive(Parser, Debug)]
#[command(name = "keyhold")]
#[command(about = "License key issuing and validation service")]
struct Cli {
    /// Print a fresh Ed25519 key pair for RESPONSE_SIGNING_* and exit
    #[arg(long)]
    generate_keys: bool,

    /// Verify an offline token against RESPONSE_SIGNING_PUBLIC_KEY and exit
    #[arg(long, value_name = "TOKEN")]
    verify_token: Option<String>,
}

fn fatal(context: &str, err: impl std::fmt::Display) -> ! {
    tracing::error!("{}: {}", context, err);
    eprintln!("{}: {}", context, err);
    std::process::exit(1);
}

fn print_keypair() {
    let (private_key, public_key) = jwt::generate_keypair();
    println!("RESPONSE_SIGNING_PRIVATE_KEY={}", private_key);
    println!("RESPONSE_SIGNING_PUBLIC_KEY={}", public_key);
}

fn verify_token(config: &Config, token: &str) {
    let public_key = config
        .signing_public_key
        .clone()
        .or_else(|| {
            config
                .signing_private_key
                .as_deref()
                .and_then(|key| jwt::derive_public_key(key).ok())
        })
        .unwrap_or_else(|| fatal("Cannot verify token", "no signing key configured"));

    let claims = jwt::verify_offline_token(token, &public_key)
        .unwrap_or_else(|e| fatal("Token rejected", e));

    println!("subject:  {}", claims.subject.as_deref().unwrap_or("-"));
    println!("valid:    {}", claims.custom.valid);
    println!("features: {}", claims.custom.features.join(", "));
    match claims.expires_at {
        Some(exp) => println!("expires:  {}", exp.as_secs()),
        None => println!("expires:  never"),
    }
}

fn open_databases(config: &Config) -> (DbPool, DbPool) {
    let db_pool = create_pool(&config.database_path)
        .unwrap_or_else(|e| fatal("Failed to create database pool", e));
    let audit_pool = create_pool(&config.audit_database_path)
        .unwrap_or_else(|e| fatal("Failed to create audit database pool", e));

    match db_pool.get() {
        Ok(conn) => {
            if let Err(e) = init_db(&conn) {
                fatal("Failed to initialize database", e);
            }
        }
        Err(e) => fatal("Failed to get connection", e),
    }
    match audit_pool.get() {
        Ok(conn) => {
            if let Err(e) = init_audit_db(&conn) {
                fatal("Failed to initialize audit database", e);
            }
        }
        Err(e) => fatal("Failed to get audit connection", e),
    }

    (db_pool, audit_pool)
}

/// Drop audit entries past the retention window (0 = keep forever).
fn purge_old_audit_logs(audit_pool: &DbPool, retention_days: i64) {
    if retention_days <= 0 {
        return;
    }
    let cutoff = Utc::now().timestamp() - retention_days.saturating_mul(86400);
    let result = audit_pool
        .get()
        .map_err(keyhold::error::AppError::from)
        .and_then(|conn| queries::purge_audit_logs_before(&conn, cutoff));
    match result {
        Ok(count) if count > 0 => {
            tracing::info!("Purged {} audit log entries older than {} days", count, retention_days);
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("Failed to purge old audit logs: {}", e);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyhold=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.generate_keys {
        print_keypair();
        return;
    }

    let config = Config::from_env();

    if let Some(ref token) = cli.verify_token {
        verify_token(&config, token);
        return;
    }

    let (db_pool, audit_pool) = open_databases(&config);
    purge_old_audit_logs(&audit_pool, config.audit_log_retention_days);

    let (audit_log, audit_writer) = AuditLogger::spawn(audit_pool.clone(), config.audit_log_enabled);
    let state = AppState::new(db_pool, audit_pool, audit_log, &config);

    if state.token_key.is_some() {
        tracing::info!("Offline tokens and response signing enabled");
    } else {
        tracing::info!("No signing key configured, offline tokens disabled");
    }

    let app = handlers::app(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| fatal("Failed to bind to address", e));

    tracing::info!("Keyhold server listening on {}", addr);

    // Connect info feeds client IP resolution for rate limiting and checks
    if let Err(e) = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    tracing::info!("Flushing pending audit entries...");
    audit_writer.drain().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}
