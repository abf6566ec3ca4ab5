//! Decides whether a storage failure is worth retrying.

/// Classifies persistence failures as transient (retry) or terminal.
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, err: &sqlx::Error) -> bool;
}

impl<F> RetryClassifier for F
where
    F: Fn(&sqlx::Error) -> bool + Send + Sync,
{
    fn is_retryable(&self, err: &sqlx::Error) -> bool {
        self(err)
    }
}

/// Treats lost connections, pool exhaustion and transaction conflicts as transient.
#[derive(Clone, Copy, Debug, Default)]
pub struct PgRetryClassifier;

impl RetryClassifier for PgRetryClassifier {
    fn is_retryable(&self, err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db_err) => db_err
                .code()
                .map(|code| is_transient_sqlstate(&code))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// SQLSTATE codes that indicate the same statement may succeed on retry.
pub fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") // connection_exception class
        || matches!(
            code,
            "40001" // serialization_failure
            | "40P01" // deadlock_detected
            | "53300" // too_many_connections
            | "57P01" // admin_shutdown
            | "57P02" // crash_shutdown
            | "57P03" // cannot_connect_now
        )
}
