//! Persistence layer.
//!
//! Every write is an emulated upsert: update the row, and insert it if the update
//! touched nothing. The two steps are not atomic on any backend, so [`Store`]
//! serializes them per key with [`KeyLocks`]. A uniqueness violation on the insert
//! (a writer outside this process won) is retried once as an update.

pub mod locks;
pub mod memory;
pub mod permissions;
pub mod settings;
pub mod sqlite;

use async_trait::async_trait;
use poise::serenity_prelude::GuildId;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{BotError, Result};

pub use locks::KeyLocks;
pub use memory::MemoryBackend;
pub use permissions::PermissionStore;
pub use settings::{GuildSetting, SettingsStore};
pub use sqlite::SqliteBackend;

/// Logical tables holding string values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// One permission set per (guild, role)
    RolePermissions,
    /// One custom-command override set per guild
    GuildOverrides,
    /// Generic per-guild and global settings
    Settings,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::RolePermissions => "role_permissions",
            Table::GuildOverrides => "guild_overrides",
            Table::Settings => "settings",
        }
    }
}

/// Name of the integer counter table
pub const COUNTERS_TABLE: &str = "counters";

/// Key prefix of every karma scope
pub const KARMA_SCOPE_PREFIX: &str = "karma:";

/// Where a row lives: a single guild, a guild's karma counters, or process-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Guild(GuildId),
    /// Per-user karma of one guild, kept apart from the guild's other counters
    Karma(GuildId),
    Global,
}

impl Scope {
    pub fn key(&self) -> String {
        match self {
            Scope::Guild(id) => id.to_string(),
            Scope::Karma(id) => format!("{}{}", KARMA_SCOPE_PREFIX, id),
            Scope::Global => "global".to_string(),
        }
    }
}

impl From<GuildId> for Scope {
    fn from(id: GuildId) -> Self {
        Scope::Guild(id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Natural key of a stored row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub scope: String,
    pub name: String,
}

impl RowKey {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

/// Capability set every storage engine provides.
///
/// `update`/`add_counter`/`delete` report affected rows, which the emulated upsert
/// depends on. `insert`/`insert_counter` return [`BotError::RaceConflict`] when a
/// uniqueness constraint rejects the row.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn select(&self, table: Table, key: &RowKey) -> Result<Option<String>>;

    /// All `(name, value)` rows of one scope
    async fn select_scope(&self, table: Table, scope: &str) -> Result<Vec<(String, String)>>;

    async fn update(&self, table: Table, key: &RowKey, value: &str) -> Result<u64>;

    async fn insert(&self, table: Table, key: &RowKey, value: &str) -> Result<()>;

    async fn delete(&self, table: Table, key: &RowKey) -> Result<u64>;

    async fn select_counter(&self, key: &RowKey) -> Result<Option<i64>>;

    async fn update_counter(&self, key: &RowKey, value: i64) -> Result<u64>;

    /// `value = value + delta`
    async fn add_counter(&self, key: &RowKey, delta: i64) -> Result<u64>;

    async fn insert_counter(&self, key: &RowKey, value: i64) -> Result<()>;

    /// Highest counters of a scope first, at most `limit`
    async fn ranked_counters(&self, scope: &str, limit: usize) -> Result<Vec<(String, i64)>>;

    /// Sum of one counter name across every scope whose key starts with
    /// `scope_prefix` (all scopes for `""`)
    async fn counter_sum(&self, scope_prefix: &str, name: &str) -> Result<i64>;
}

/// Shared handle over a backend, the one place writes get serialized.
///
/// Cheap to clone; every component receives its own clone instead of reaching
/// for a global.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
    locks: KeyLocks,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            locks: KeyLocks::new(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn get(&self, table: Table, key: &RowKey) -> Result<String> {
        self.backend
            .select(table, key)
            .await?
            .ok_or_else(|| not_found(table.name(), key))
    }

    pub async fn get_scope(&self, table: Table, scope: &str) -> Result<Vec<(String, String)>> {
        self.backend.select_scope(table, scope).await
    }

    /// Write `value`, leaving exactly one row for `key`
    pub async fn upsert(&self, table: Table, key: &RowKey, value: &str) -> Result<()> {
        let _guard = self.locks.lock(table.name(), key).await;

        if self.backend.update(table, key, value).await? > 0 {
            debug!("Updated {} row {}", table.name(), key);
            return Ok(());
        }

        match self.backend.insert(table, key, value).await {
            Ok(()) => {
                debug!("Inserted {} row {}", table.name(), key);
                Ok(())
            }
            Err(BotError::RaceConflict { .. }) => {
                warn!(
                    "Insert of {} row {} lost a race, retrying as update",
                    table.name(),
                    key
                );
                let affected = self.backend.update(table, key, value).await?;
                ensure_retry_applied(table.name(), key, affected)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the row for `key`, returning whether one existed
    pub async fn remove(&self, table: Table, key: &RowKey) -> Result<bool> {
        let _guard = self.locks.lock(table.name(), key).await;
        Ok(self.backend.delete(table, key).await? > 0)
    }

    pub async fn get_counter(&self, key: &RowKey) -> Result<i64> {
        self.backend
            .select_counter(key)
            .await?
            .ok_or_else(|| not_found(COUNTERS_TABLE, key))
    }

    /// Overwrite a counter, leaving exactly one row for `key`
    pub async fn set_counter(&self, key: &RowKey, value: i64) -> Result<()> {
        let _guard = self.locks.lock(COUNTERS_TABLE, key).await;

        if self.backend.update_counter(key, value).await? > 0 {
            return Ok(());
        }

        match self.backend.insert_counter(key, value).await {
            Err(BotError::RaceConflict { .. }) => {
                warn!("Insert of counter {} lost a race, retrying as update", key);
                let affected = self.backend.update_counter(key, value).await?;
                ensure_retry_applied(COUNTERS_TABLE, key, affected)
            }
            other => other,
        }
    }

    /// Add `delta` to a counter, creating it with `delta` when absent
    pub async fn increment(&self, key: &RowKey, delta: i64) -> Result<()> {
        let _guard = self.locks.lock(COUNTERS_TABLE, key).await;

        if self.backend.add_counter(key, delta).await? > 0 {
            return Ok(());
        }

        match self.backend.insert_counter(key, delta).await {
            Err(BotError::RaceConflict { .. }) => {
                warn!("Insert of counter {} lost a race, retrying as increment", key);
                let affected = self.backend.add_counter(key, delta).await?;
                ensure_retry_applied(COUNTERS_TABLE, key, affected)
            }
            other => other,
        }
    }

    pub async fn ranked_counters(&self, scope: &str, limit: usize) -> Result<Vec<(String, i64)>> {
        self.backend.ranked_counters(scope, limit).await
    }

    pub async fn counter_sum(&self, scope_prefix: &str, name: &str) -> Result<i64> {
        self.backend.counter_sum(scope_prefix, name).await
    }
}

fn not_found(table: &'static str, key: &RowKey) -> BotError {
    BotError::NotFound {
        table,
        scope: key.scope.clone(),
        name: key.name.clone(),
    }
}

/// A conflicting insert means a row exists; if the retry still sees none it was
/// deleted in between and there is nothing consistent left to report.
fn ensure_retry_applied(table: &'static str, key: &RowKey, affected: u64) -> Result<()> {
    if affected == 0 {
        return Err(BotError::Store {
            message: format!(
                "{} row {} vanished between a conflicting insert and its retry",
                table, key
            ),
        });
    }
    Ok(())
}
