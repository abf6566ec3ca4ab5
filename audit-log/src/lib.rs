//! Audit log writer: persists batches of audit entries atomically and retries
//! transient storage failures with bounded backoff.

pub mod classifier;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod writer;

pub use classifier::{PgRetryClassifier, RetryClassifier};
pub use error::AuditWriteError;
pub use models::AuditLogEntry;
pub use store::{AuditStore, AuditTransaction, PgAuditStore};
pub use writer::AuditWriter;
