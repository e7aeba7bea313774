//! Integration tests for the pool over a real SQLite database file.

use lumen_config::DatabaseConfig;
use lumen_pool::{create_sqlite_pool, StoreConnection};
use serde_json::json;

fn file_config(dir: &tempfile::TempDir) -> DatabaseConfig {
    DatabaseConfig {
        url: format!("sqlite://{}?mode=rwc", dir.path().join("lumen.db").display()),
        target_size: 2,
        retry_delay_ms: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_sqlite_pool_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_sqlite_pool(&file_config(&dir)).await.expect("Failed to create pool");
    assert_eq!(pool.get_pool_stats().total, 2);

    pool.execute_run(
        "CREATE TABLE events (id INTEGER PRIMARY KEY, title TEXT NOT NULL, owner_id INTEGER)",
        &[],
    )
    .await
    .unwrap();

    let inserted = pool
        .execute_run(
            "INSERT INTO events (title, owner_id) VALUES (?, ?)",
            &[json!("Summer wedding"), json!(17)],
        )
        .await
        .unwrap();
    assert_eq!(inserted.rows_affected, 1);

    let row = pool
        .execute_single_query("SELECT title, owner_id FROM events WHERE id = ?", &[json!(inserted.last_insert_id)])
        .await
        .unwrap()
        .expect("row should exist");
    assert_eq!(row["title"], json!("Summer wedding"));
    assert_eq!(row["owner_id"], json!(17));

    let rows = pool.execute_query("SELECT * FROM events", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);

    pool.close_all().await;
}

#[tokio::test]
async fn test_sqlite_pool_applies_tuning() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_sqlite_pool(&file_config(&dir)).await.unwrap();

    let mut conn = pool.get_connection().await.unwrap();
    let row = conn
        .fetch_optional("PRAGMA foreign_keys", &[])
        .await
        .unwrap()
        .expect("pragma returns a row");
    assert_eq!(row["foreign_keys"], json!(1));

    let row = conn
        .fetch_optional("PRAGMA journal_mode", &[])
        .await
        .unwrap()
        .expect("pragma returns a row");
    assert_eq!(row["journal_mode"], json!("wal"));
    conn.release();

    pool.close_all().await;
}

#[tokio::test]
async fn test_sqlite_statement_error_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_sqlite_pool(&file_config(&dir)).await.unwrap();

    let result = pool.execute_query("SELECT * FROM missing_table", &[]).await;
    assert!(result.is_err());
    assert_eq!(pool.get_pool_stats().in_use, 0);

    pool.close_all().await;
}
