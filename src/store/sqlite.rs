//! SQLite backend.
//!
//! One table per entity family, each keyed by `(scope, name)`. The primary key is
//! what turns a lost insert race into a `RaceConflict` instead of a duplicate.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use super::{Backend, RowKey, Table, COUNTERS_TABLE};
use crate::error::{BotError, Result};

const MAX_CONNECTIONS: u32 = 8;

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    ///
    /// `sqlite::memory:` gives every connection its own database, so in-memory
    /// pools are limited to a single connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            MAX_CONNECTIONS
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let backend = Self::from_pool(pool).await?;
        info!("Connected to SQLite store at {}", url);
        Ok(backend)
    }

    /// Use an existing pool, ensuring the schema
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let backend = Self { pool };
        backend.setup().await?;
        Ok(backend)
    }

    async fn setup(&self) -> Result<()> {
        for table in [Table::RolePermissions, Table::GuildOverrides, Table::Settings] {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    scope TEXT NOT NULL,
                    name TEXT NOT NULL,
                    value TEXT NOT NULL DEFAULT '',
                    PRIMARY KEY (scope, name)
                )",
                table.name()
            ))
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                scope TEXT NOT NULL,
                name TEXT NOT NULL,
                value INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (scope, name)
            )",
            COUNTERS_TABLE
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn insert_error(err: sqlx::Error, table: &'static str, key: &RowKey) -> BotError {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            BotError::RaceConflict {
                table,
                scope: key.scope.clone(),
                name: key.name.clone(),
            }
        }
        other => other.into(),
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn select(&self, table: Table, key: &RowKey) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(&format!(
            "SELECT value FROM {} WHERE scope = ? AND name = ?",
            table.name()
        ))
        .bind(key.scope.as_str())
        .bind(key.name.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn select_scope(&self, table: Table, scope: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, (String, String)>(&format!(
            "SELECT name, value FROM {} WHERE scope = ? ORDER BY rowid",
            table.name()
        ))
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update(&self, table: Table, key: &RowKey, value: &str) -> Result<u64> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET value = ? WHERE scope = ? AND name = ?",
            table.name()
        ))
        .bind(value)
        .bind(key.scope.as_str())
        .bind(key.name.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert(&self, table: Table, key: &RowKey, value: &str) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (scope, name, value) VALUES (?, ?, ?)",
            table.name()
        ))
        .bind(key.scope.as_str())
        .bind(key.name.as_str())
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, table.name(), key))?;
        Ok(())
    }

    async fn delete(&self, table: Table, key: &RowKey) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE scope = ? AND name = ?",
            table.name()
        ))
        .bind(key.scope.as_str())
        .bind(key.name.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn select_counter(&self, key: &RowKey) -> Result<Option<i64>> {
        let value = sqlx::query_scalar::<_, i64>(
            "SELECT value FROM counters WHERE scope = ? AND name = ?",
        )
        .bind(key.scope.as_str())
        .bind(key.name.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn update_counter(&self, key: &RowKey, value: i64) -> Result<u64> {
        let result = sqlx::query("UPDATE counters SET value = ? WHERE scope = ? AND name = ?")
            .bind(value)
            .bind(key.scope.as_str())
            .bind(key.name.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn add_counter(&self, key: &RowKey, delta: i64) -> Result<u64> {
        let result =
            sqlx::query("UPDATE counters SET value = value + ? WHERE scope = ? AND name = ?")
                .bind(delta)
                .bind(key.scope.as_str())
                .bind(key.name.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn insert_counter(&self, key: &RowKey, value: i64) -> Result<()> {
        sqlx::query("INSERT INTO counters (scope, name, value) VALUES (?, ?, ?)")
            .bind(key.scope.as_str())
            .bind(key.name.as_str())
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_error(e, COUNTERS_TABLE, key))?;
        Ok(())
    }

    async fn ranked_counters(&self, scope: &str, limit: usize) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT name, value FROM counters WHERE scope = ? ORDER BY value DESC LIMIT ?",
        )
        .bind(scope)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn counter_sum(&self, scope_prefix: &str, name: &str) -> Result<i64> {
        let sum = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(value), 0) FROM counters
             WHERE name = ? AND substr(scope, 1, length(?)) = ?",
        )
        .bind(name)
        .bind(scope_prefix)
        .bind(scope_prefix)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }
}
