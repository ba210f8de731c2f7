use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use gateway_common::record::Payload;

use crate::error::SinkError;

/// The durable store processing results are written to.
#[async_trait]
pub trait SinkStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn write(&self, key: &str, value: &Payload) -> Result<(), SinkError>;
}

/// An in-memory store, for tests and local development.
#[derive(Default)]
pub struct MemorySinkStore {
    values: Mutex<HashMap<String, Payload>>,
}

impl MemorySinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Payload> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SinkStore for MemorySinkStore {
    async fn write(&self, key: &str, value: &Payload) -> Result<(), SinkError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value.clone());

        Ok(())
    }
}

/// Results stored in the `processed_stream_data` PostgreSQL table.
pub struct PgSinkStore {
    pool: PgPool,
}

impl PgSinkStore {
    /// Connect to `url` and bring the schema up to date.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Self::new_from_pool(pool).await
    }

    pub async fn new_from_pool(pool: PgPool) -> Result<Self, SinkError> {
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SinkStore for PgSinkStore {
    async fn write(&self, key: &str, value: &Payload) -> Result<(), SinkError> {
        sqlx::query(
            r#"
INSERT INTO processed_stream_data (record_key, value, written_at)
VALUES ($1, $2, NOW())
ON CONFLICT (record_key) DO UPDATE
SET value = EXCLUDED.value, written_at = EXCLUDED.written_at
            "#,
        )
        .bind(key)
        .bind(sqlx::types::Json(value))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Persists handler results, keyed by the id of the record they came from.
///
/// A write is attempted once. A failure is returned to the caller and nothing is undone.
#[derive(Clone)]
pub struct SinkWriter {
    store: Arc<dyn SinkStore>,
}

impl SinkWriter {
    pub fn new(store: Arc<dyn SinkStore>) -> Self {
        Self { store }
    }

    pub async fn write(&self, record_id: &str, result: &Payload) -> Result<(), SinkError> {
        self.store.write(record_id, result).await?;
        debug!(record_id, "result written to sink");

        Ok(())
    }
}
