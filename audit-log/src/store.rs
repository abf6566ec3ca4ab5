//! Storage for audit log entries.

use async_trait::async_trait;
use metadata_core::error::AppError;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::models::AuditLogEntry;

/// Opens transactions against the audit log storage.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn AuditTransaction>, sqlx::Error>;
}

/// A storage transaction. Dropping it without [`AuditTransaction::commit`] rolls back.
#[async_trait]
pub trait AuditTransaction: Send {
    async fn persist(&mut self, entry: &AuditLogEntry) -> Result<(), sqlx::Error>;

    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error>;
}

/// PostgreSQL-backed audit log storage.
#[derive(Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    /// Create a new connection pool.
    #[instrument(skip(config), fields(service = "audit-log"))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(config.url.expose_secret())
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn begin(&self) -> Result<Box<dyn AuditTransaction>, sqlx::Error> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgAuditTransaction { tx }))
    }
}

struct PgAuditTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AuditTransaction for PgAuditTransaction {
    async fn persist(&mut self, entry: &AuditLogEntry) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_log_local (local_id, user_id, action, resource_type, resource_id, workspace_id, method_name, metadata, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.local_id)
        .bind(&entry.user_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.workspace_id)
        .bind(&entry.method_name)
        .bind(&entry.metadata)
        .bind(entry.created_utc)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }
}
