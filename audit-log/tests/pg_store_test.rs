//! PostgreSQL store integration tests.
//!
//! Require a database: set TEST_DATABASE_URL and run with `--ignored`.

mod common;

use audit_log::config::DatabaseConfig;
use audit_log::{AuditWriter, PgAuditStore};
use common::{entries, fast_retry, init_tracing};
use secrecy::SecretString;

async fn store() -> PgAuditStore {
    init_tracing();
    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run database tests");

    let store = PgAuditStore::connect(&DatabaseConfig {
        url: SecretString::new(database_url),
        max_connections: 2,
        min_connections: 1,
    })
    .await
    .expect("Failed to connect");
    store.run_migrations().await.expect("Failed to migrate");
    store
}

#[tokio::test]
#[ignore]
async fn batch_is_persisted() {
    let store = store().await;
    store.health_check().await.unwrap();
    let writer = AuditWriter::postgres(store.clone(), fast_retry(2));
    let batch = entries(3);

    writer.save_batch(&batch).await.unwrap();

    let ids: Vec<_> = batch.iter().map(|e| e.local_id).collect();
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM audit_log_local WHERE local_id = ANY($1)",
    )
    .bind(&ids)
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
#[ignore]
async fn duplicate_entry_rolls_back_whole_batch() {
    let store = store().await;
    let writer = AuditWriter::postgres(store.clone(), fast_retry(2));
    let mut batch = entries(2);
    batch.push(batch[0].clone());

    let err = writer.save_batch(&batch).await.unwrap_err();
    assert!(matches!(err, audit_log::AuditWriteError::Terminal(_)));

    let ids: Vec<_> = batch.iter().map(|e| e.local_id).collect();
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM audit_log_local WHERE local_id = ANY($1)",
    )
    .bind(&ids)
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(count, 0);
}
