//! Transactional writer for audit log batches.

use std::sync::Arc;

use metadata_core::retry::{RetryConfig, RetryError, retry_with};
use tracing::{debug, error, instrument};

use crate::classifier::{PgRetryClassifier, RetryClassifier};
use crate::error::AuditWriteError;
use crate::models::AuditLogEntry;
use crate::store::{AuditStore, PgAuditStore};

/// Persists audit log batches all-or-nothing.
///
/// A batch that fails with a transient error (as judged by the classifier) is
/// written again from scratch in a new transaction, up to the retry bound.
#[derive(Clone)]
pub struct AuditWriter {
    store: Arc<dyn AuditStore>,
    classifier: Arc<dyn RetryClassifier>,
    retry: RetryConfig,
}

impl AuditWriter {
    pub fn new(
        store: Arc<dyn AuditStore>,
        classifier: Arc<dyn RetryClassifier>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            retry,
        }
    }

    /// Writer over PostgreSQL with the default transient-failure rules.
    pub fn postgres(store: PgAuditStore, retry: RetryConfig) -> Self {
        Self::new(Arc::new(store), Arc::new(PgRetryClassifier), retry)
    }

    /// Save every entry in one transaction.
    ///
    /// Returns the storage error as-is when it is not retryable, or
    /// [`AuditWriteError::RetriesExhausted`] once the retry bound is reached.
    #[instrument(skip(self, entries), fields(batch_size = entries.len()))]
    pub async fn save_batch(&self, entries: &[AuditLogEntry]) -> Result<(), AuditWriteError> {
        if entries.is_empty() {
            debug!("Empty audit log batch, nothing to save");
            return Ok(());
        }

        let result = retry_with(
            &self.retry,
            "save_audit_logs",
            |err: &sqlx::Error| {
                let retryable = self.classifier.is_retryable(err);
                if retryable {
                    metrics::counter!("audit_log_batch_retries").increment(1);
                }
                retryable
            },
            || self.write_batch(entries),
        )
        .await;

        match result {
            Ok(()) => {
                metrics::counter!("audit_log_batches_saved").increment(1);
                debug!("Audit logged successfully");
                Ok(())
            }
            Err(RetryError::Permanent(err)) => {
                metrics::counter!("audit_log_batches_failed", "reason" => "terminal").increment(1);
                error!(error = %err, "Audit log batch failed");
                Err(AuditWriteError::Terminal(err))
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                metrics::counter!("audit_log_batches_failed", "reason" => "exhausted").increment(1);
                error!(error = %last, attempts, "Audit log batch failed after retries");
                Err(AuditWriteError::RetriesExhausted {
                    attempts,
                    source: last,
                })
            }
        }
    }

    async fn write_batch(&self, entries: &[AuditLogEntry]) -> Result<(), sqlx::Error> {
        let mut tx = self.store.begin().await?;
        for entry in entries {
            tx.persist(entry).await?;
        }
        tx.commit().await
    }
}
