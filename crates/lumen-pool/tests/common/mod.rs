//! Common test infrastructure for pool tests.
//!
//! Provides an in-memory store connector whose failures can be scripted.

#![allow(dead_code)]

use async_trait::async_trait;
use lumen_config::DatabaseConfig;
use lumen_core::{ExecResult, LumenError, LumenResult, Row, SqlParam};
use lumen_pool::{ConnectionPool, StoreConnection, StoreConnector};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared, inspectable state behind the fake connector.
#[derive(Default)]
pub struct FakeStore {
    pub connects: AtomicUsize,
    pub connect_failures_left: AtomicUsize,
    pub closed: AtomicUsize,
    pub statements: Mutex<Vec<String>>,
    pub failing_statements: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.connect_failures_left.store(n, Ordering::SeqCst);
    }

    /// Makes every statement containing `fragment` fail.
    pub fn fail_statements_containing(&self, fragment: &str) {
        self.failing_statements.lock().unwrap().push(fragment.to_string());
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    fn run(&self, sql: &str) -> LumenResult<()> {
        self.statements.lock().unwrap().push(sql.to_string());
        let failing = self.failing_statements.lock().unwrap();
        if failing.iter().any(|fragment| sql.contains(fragment.as_str())) {
            return Err(LumenError::Database(format!("statement failed: {}", sql)));
        }
        Ok(())
    }
}

pub struct FakeConnector {
    pub store: Arc<FakeStore>,
}

pub struct FakeConnection {
    pub serial: usize,
    store: Arc<FakeStore>,
}

#[async_trait]
impl StoreConnector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self) -> LumenResult<Self::Connection> {
        let serial = self.store.connects.fetch_add(1, Ordering::SeqCst) + 1;
        let failures = self.store.connect_failures_left.load(Ordering::SeqCst);
        if failures > 0 {
            self.store.connect_failures_left.store(failures - 1, Ordering::SeqCst);
            return Err(LumenError::Database("connection refused".to_string()));
        }
        Ok(FakeConnection {
            serial,
            store: Arc::clone(&self.store),
        })
    }
}

#[async_trait]
impl StoreConnection for FakeConnection {
    async fn execute(&mut self, sql: &str, _params: &[SqlParam]) -> LumenResult<ExecResult> {
        self.store.run(sql)?;
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: Some(self.serial as i64),
        })
    }

    async fn fetch_all(&mut self, sql: &str, params: &[SqlParam]) -> LumenResult<Vec<Row>> {
        self.store.run(sql)?;
        let mut row = Row::new();
        row.insert("connection".to_string(), json!(self.serial));
        row.insert("params".to_string(), json!(params));
        Ok(vec![row])
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[SqlParam]) -> LumenResult<Option<Row>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    async fn close(self) -> LumenResult<()> {
        self.store.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Test configuration: no tuning statements unless requested, short delays.
pub fn test_config(target_size: usize) -> DatabaseConfig {
    DatabaseConfig {
        url: "fake://".to_string(),
        target_size,
        connect_retries: 3,
        retry_delay_ms: 1000,
        idle_timeout_ms: 60_000,
        acquire_timeout_ms: None,
        tuning_statements: Vec::new(),
    }
}

pub fn fake_pool(config: DatabaseConfig) -> (ConnectionPool<FakeConnector>, Arc<FakeStore>) {
    let store = FakeStore::new();
    let connector = FakeConnector {
        store: Arc::clone(&store),
    };
    (ConnectionPool::new(connector, config), store)
}

/// Lets spawned tasks run until they park.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
