//! Common test utilities for audit-log tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use audit_log::{AuditLogEntry, AuditStore, AuditTransaction};
use metadata_core::retry::RetryConfig;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,audit_log=debug,metadata_core=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Retries without real waiting.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        backoff_multiplier: 2.0,
        add_jitter: false,
    }
}

pub fn entries(n: usize) -> Vec<AuditLogEntry> {
    (0..n)
        .map(|i| {
            AuditLogEntry::new(
                "user-1",
                "UPDATE",
                "experiment_run",
                format!("run-{}", i),
                "UpdateExperimentRun",
            )
        })
        .collect()
}

pub fn connection_reset() -> sqlx::Error {
    sqlx::Error::Io(io::Error::new(
        io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    ))
}

pub fn pool_timeout() -> sqlx::Error {
    sqlx::Error::PoolTimedOut
}

pub fn row_not_found() -> sqlx::Error {
    sqlx::Error::RowNotFound
}

/// What one transaction attempt does.
#[derive(Clone, Copy)]
pub enum Step {
    Succeed,
    FailBegin(fn() -> sqlx::Error),
    /// Persist `after` entries, then fail on the next one.
    FailPersist { after: usize, err: fn() -> sqlx::Error },
    FailCommit(fn() -> sqlx::Error),
}

#[derive(Default)]
struct Inner {
    committed: Mutex<Vec<AuditLogEntry>>,
    script: Mutex<VecDeque<Step>>,
    begins: AtomicU32,
}

/// In-memory store that follows a script of failures, then succeeds.
///
/// Entries become visible in `committed()` only when a transaction commits.
#[derive(Clone, Default)]
pub struct ScriptedStore {
    inner: Arc<Inner>,
}

impl ScriptedStore {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let store = Self::default();
        store.inner.script.lock().unwrap().extend(steps);
        store
    }

    pub fn committed(&self) -> Vec<AuditLogEntry> {
        self.inner.committed.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.inner.begins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditStore for ScriptedStore {
    async fn begin(&self) -> Result<Box<dyn AuditTransaction>, sqlx::Error> {
        self.inner.begins.fetch_add(1, Ordering::SeqCst);
        let step = self
            .inner
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Succeed);

        if let Step::FailBegin(err) = step {
            return Err(err());
        }

        Ok(Box::new(ScriptedTransaction {
            inner: Arc::clone(&self.inner),
            step,
            pending: Vec::new(),
        }))
    }
}

struct ScriptedTransaction {
    inner: Arc<Inner>,
    step: Step,
    pending: Vec<AuditLogEntry>,
}

#[async_trait]
impl AuditTransaction for ScriptedTransaction {
    async fn persist(&mut self, entry: &AuditLogEntry) -> Result<(), sqlx::Error> {
        if let Step::FailPersist { after, err } = self.step
            && self.pending.len() == after
        {
            return Err(err());
        }
        self.pending.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error> {
        let ScriptedTransaction {
            inner,
            step,
            pending,
        } = *self;
        if let Step::FailCommit(err) = step {
            return Err(err());
        }
        inner.committed.lock().unwrap().extend(pending);
        Ok(())
    }
}
