use metadata_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditWriteError {
    /// The classifier rejected the failure; it is returned untouched.
    #[error(transparent)]
    Terminal(sqlx::Error),

    #[error("Audit log batch not saved after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },
}

impl AuditWriteError {
    /// The storage failure behind this error.
    pub fn storage_error(&self) -> &sqlx::Error {
        match self {
            AuditWriteError::Terminal(err) => err,
            AuditWriteError::RetriesExhausted { source, .. } => source,
        }
    }
}

impl From<AuditWriteError> for AppError {
    fn from(err: AuditWriteError) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}
