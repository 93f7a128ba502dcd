//! Fire-and-forget audit trail.
//!
//! Handlers hand entries to an [`AuditLogger`], which queues them on an
//! unbounded channel and returns immediately. A single [`AuditWriter`]
//! worker owns the audit database writes. A failed write is logged and
//! never reaches the caller's response.

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::db::{DbPool, queries};
use crate::error::AppError;
use crate::id::EntityType;
use crate::models::{AdminAction, AdminLog, AuditEntity, LicenseCheckLog};

enum AuditEvent {
    Check(Box<LicenseCheckLog>),
    Admin(AdminLog),
    /// Reply once everything queued before it is written.
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable handle for recording audit entries.
#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::UnboundedSender<AuditEvent>,
    enabled: bool,
}

/// The background worker behind an [`AuditLogger`].
pub struct AuditWriter {
    tx: mpsc::UnboundedSender<AuditEvent>,
    handle: JoinHandle<()>,
}

impl AuditLogger {
    /// Start the writer on the blocking pool. When `enabled` is false,
    /// entries are traced but never stored.
    pub fn spawn(pool: DbPool, enabled: bool) -> (Self, AuditWriter) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::task::spawn_blocking(move || run_writer(pool, rx));
        (
            Self {
                tx: tx.clone(),
                enabled,
            },
            AuditWriter { tx, handle },
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_check(&self, entry: LicenseCheckLog) {
        tracing::info!(
            key = %entry.license_key,
            valid = entry.response.valid,
            reason = entry.response.reason.as_deref().unwrap_or(""),
            ip = entry.ip_address.as_deref().unwrap_or(""),
            status = entry.status_code,
            "License check"
        );
        if self.enabled {
            self.send(AuditEvent::Check(Box::new(entry)));
        }
    }

    pub fn record_admin(&self, entry: AdminLog) {
        tracing::info!(
            action = entry.action.as_ref(),
            entity_type = entry.entity_type.as_ref(),
            entity_id = entry.entity_id.as_deref().unwrap_or(""),
            owner_id = entry.owner_id.as_deref().unwrap_or(""),
            "Admin action"
        );
        if self.enabled {
            self.send(AuditEvent::Admin(entry));
        }
    }

    /// Start building an admin-action entry.
    pub fn admin(&self, action: AdminAction, entity: AuditEntity) -> AdminLogBuilder<'_> {
        AdminLogBuilder {
            logger: self,
            action,
            entity,
            entity_id: None,
            owner_id: None,
            details: None,
        }
    }

    /// Wait until every entry queued so far has been written.
    pub async fn flush(&self) {
        let (reply, done) = oneshot::channel();
        self.send(AuditEvent::Flush(reply));
        let _ = done.await;
    }

    fn send(&self, event: AuditEvent) {
        if self.tx.send(event).is_err() {
            tracing::error!("Audit writer has stopped, dropping audit entry");
        }
    }
}

impl AuditWriter {
    /// Write everything still queued, then stop the worker.
    pub async fn drain(self) {
        let _ = self.tx.send(AuditEvent::Shutdown);
        if let Err(e) = self.handle.await {
            tracing::error!("Audit writer panicked: {}", e);
        }
    }
}

fn run_writer(pool: DbPool, mut rx: mpsc::UnboundedReceiver<AuditEvent>) {
    while let Some(event) = rx.blocking_recv() {
        let result = match event {
            AuditEvent::Check(entry) => pool
                .get()
                .map_err(AppError::from)
                .and_then(|conn| queries::create_check_log(&conn, &entry)),
            AuditEvent::Admin(entry) => pool
                .get()
                .map_err(AppError::from)
                .and_then(|conn| queries::create_admin_log(&conn, &entry)),
            AuditEvent::Flush(reply) => {
                let _ = reply.send(());
                Ok(())
            }
            AuditEvent::Shutdown => break,
        };
        if let Err(e) = result {
            tracing::error!("Failed to write audit log: {}", e);
        }
    }
    tracing::debug!("Audit writer stopped");
}

/// Builder for admin-action entries.
///
/// ```ignore
/// state
///     .audit_log
///     .admin(AdminAction::CreateProduct, AuditEntity::Product)
///     .entity(&product.id)
///     .owner(product.owner_id.as_deref())
///     .record();
/// ```
pub struct AdminLogBuilder<'a> {
    logger: &'a AuditLogger,
    action: AdminAction,
    entity: AuditEntity,
    entity_id: Option<String>,
    owner_id: Option<String>,
    details: Option<Value>,
}

impl AdminLogBuilder<'_> {
    pub fn entity(mut self, id: &str) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn owner(mut self, owner_id: Option<&str>) -> Self {
        self.owner_id = owner_id.map(String::from);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn record(self) {
        self.logger.record_admin(AdminLog {
            id: EntityType::AdminLog.gen_id(),
            action: self.action,
            entity_type: self.entity,
            entity_id: self.entity_id,
            owner_id: self.owner_id,
            details: self.details,
            created_at: Utc::now().timestamp(),
        });
    }
}
