use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagRecord {
    pub id: String,
    pub date: DateTime<Utc>,
    pub auth: bool,
    pub info: Option<String>,
}

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn upsert(&self, record: &TagRecord) -> Result<()>;
}

pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(8))
        .connect_lazy(database_url)
        .context("failed to create lazy database pool")
}

/// Latest-read-per-tag table, one row per tag id.
#[derive(Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS data (
                id text PRIMARY KEY,
                date timestamptz NOT NULL,
                auth boolean NOT NULL,
                info text NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure data table")?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceSink for PostgresSink {
    async fn upsert(&self, record: &TagRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO data (id, date, auth, info)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET date = EXCLUDED.date,
                auth = EXCLUDED.auth,
                info = EXCLUDED.info
            "#,
        )
        .bind(&record.id)
        .bind(record.date)
        .bind(record.auth)
        .bind(record.info.as_deref())
        .execute(&self.pool)
        .await?;
        tracing::debug!(tag_id = %record.id, auth = record.auth, "upserted tag record");
        Ok(())
    }
}
