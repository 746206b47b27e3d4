use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{db::DbPool, error::AppResult, models::AuditEntry};

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> AppResult<()>;
}

#[derive(Clone)]
pub struct PgAuditLog {
    pool: DbPool,
}

impl PgAuditLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn record(&self, entry: AuditEntry) -> AppResult<()> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, user_id, action, resource, metadata)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(entry.user_id)
        .bind(entry.action)
        .bind(entry.resource)
        .bind(entry.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub async fn log_audit(
    audit: &dyn AuditLog,
    user_id: Option<Uuid>,
    action: &str,
    resource: Option<&str>,
    metadata: Option<Value>,
) -> AppResult<()> {
    audit
        .record(AuditEntry {
            user_id,
            action: action.to_string(),
            resource: resource.map(str::to_string),
            metadata,
        })
        .await
}
