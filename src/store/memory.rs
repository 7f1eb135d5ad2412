use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{Backend, RowKey, Table, COUNTERS_TABLE};
use crate::error::{BotError, Result};

/// In-process backend.
///
/// Rows are kept in plain vectors like a table without a primary key, so two
/// unserialized inserts of the same key really do produce a duplicate. Use
/// [`MemoryBackend::with_unique_keys`] to model a table with a uniqueness
/// constraint instead.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<Table, Vec<(RowKey, String)>>>,
    counters: Mutex<Vec<(RowKey, i64)>>,
    unique_keys: bool,
    yield_points: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject inserts of an existing key with `RaceConflict`
    pub fn with_unique_keys() -> Self {
        Self {
            unique_keys: true,
            ..Self::default()
        }
    }

    /// Yield to the scheduler before every operation, so concurrent callers
    /// interleave the way they would around real I/O
    pub fn yielding(mut self) -> Self {
        self.yield_points = true;
        self
    }

    /// Stored rows for one key (more than one means the invariant broke)
    pub fn row_count(&self, table: Table, key: &RowKey) -> usize {
        self.tables
            .lock()
            .get(&table)
            .map(|rows| rows.iter().filter(|(k, _)| k == key).count())
            .unwrap_or(0)
    }

    pub fn counter_row_count(&self, key: &RowKey) -> usize {
        self.counters.lock().iter().filter(|(k, _)| k == key).count()
    }

    async fn io(&self) {
        if self.yield_points {
            tokio::task::yield_now().await;
        }
    }

    fn conflict(table: &'static str, key: &RowKey) -> BotError {
        BotError::RaceConflict {
            table,
            scope: key.scope.clone(),
            name: key.name.clone(),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn select(&self, table: Table, key: &RowKey) -> Result<Option<String>> {
        self.io().await;
        Ok(self
            .tables
            .lock()
            .get(&table)
            .and_then(|rows| rows.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.clone()))
    }

    async fn select_scope(&self, table: Table, scope: &str) -> Result<Vec<(String, String)>> {
        self.io().await;
        Ok(self
            .tables
            .lock()
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|(k, _)| k.scope == scope)
                    .map(|(k, v)| (k.name.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(&self, table: Table, key: &RowKey, value: &str) -> Result<u64> {
        self.io().await;
        let mut tables = self.tables.lock();
        let mut affected = 0;
        if let Some(rows) = tables.get_mut(&table) {
            for (_, v) in rows.iter_mut().filter(|(k, _)| k == key) {
                *v = value.to_string();
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn insert(&self, table: Table, key: &RowKey, value: &str) -> Result<()> {
        self.io().await;
        let mut tables = self.tables.lock();
        let rows = tables.entry(table).or_default();
        if self.unique_keys && rows.iter().any(|(k, _)| k == key) {
            return Err(Self::conflict(table.name(), key));
        }
        rows.push((key.clone(), value.to_string()));
        Ok(())
    }

    async fn delete(&self, table: Table, key: &RowKey) -> Result<u64> {
        self.io().await;
        let mut tables = self.tables.lock();
        let Some(rows) = tables.get_mut(&table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|(k, _)| k != key);
        Ok((before - rows.len()) as u64)
    }

    async fn select_counter(&self, key: &RowKey) -> Result<Option<i64>> {
        self.io().await;
        Ok(self
            .counters
            .lock()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v))
    }

    async fn update_counter(&self, key: &RowKey, value: i64) -> Result<u64> {
        self.io().await;
        let mut affected = 0;
        for (_, v) in self.counters.lock().iter_mut().filter(|(k, _)| k == key) {
            *v = value;
            affected += 1;
        }
        Ok(affected)
    }

    async fn add_counter(&self, key: &RowKey, delta: i64) -> Result<u64> {
        self.io().await;
        let mut affected = 0;
        for (_, v) in self.counters.lock().iter_mut().filter(|(k, _)| k == key) {
            *v += delta;
            affected += 1;
        }
        Ok(affected)
    }

    async fn insert_counter(&self, key: &RowKey, value: i64) -> Result<()> {
        self.io().await;
        let mut counters = self.counters.lock();
        if self.unique_keys && counters.iter().any(|(k, _)| k == key) {
            return Err(Self::conflict(COUNTERS_TABLE, key));
        }
        counters.push((key.clone(), value));
        Ok(())
    }

    async fn ranked_counters(&self, scope: &str, limit: usize) -> Result<Vec<(String, i64)>> {
        self.io().await;
        let mut ranked: Vec<(String, i64)> = self
            .counters
            .lock()
            .iter()
            .filter(|(k, _)| k.scope == scope)
            .map(|(k, v)| (k.name.clone(), *v))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn counter_sum(&self, scope_prefix: &str, name: &str) -> Result<i64> {
        self.io().await;
        Ok(self
            .counters
            .lock()
            .iter()
            .filter(|(k, _)| k.name == name && k.scope.starts_with(scope_prefix))
            .map(|(_, v)| *v)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_without_constraint_duplicates_are_possible() {
        let backend = MemoryBackend::new();
        let key = RowKey::new("1", "prefix");
        backend.insert(Table::Settings, &key, "a").await.unwrap();
        backend.insert(Table::Settings, &key, "b").await.unwrap();
        assert_eq!(backend.row_count(Table::Settings, &key), 2);
        assert_eq!(backend.update(Table::Settings, &key, "c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unique_keys_reject_second_insert() {
        let backend = MemoryBackend::with_unique_keys();
        let key = RowKey::new("1", "prefix");
        backend.insert(Table::Settings, &key, "a").await.unwrap();
        let err = backend.insert(Table::Settings, &key, "b").await.unwrap_err();
        assert!(matches!(err, BotError::RaceConflict { .. }));

        backend.insert_counter(&key, 1).await.unwrap();
        let err = backend.insert_counter(&key, 1).await.unwrap_err();
        assert!(matches!(err, BotError::RaceConflict { .. }));
    }

    #[tokio::test]
    async fn test_tables_are_independent() {
        let backend = MemoryBackend::new();
        let key = RowKey::new("1", "2");
        backend.insert(Table::Settings, &key, "a").await.unwrap();
        assert_eq!(backend.select(Table::RolePermissions, &key).await.unwrap(), None);
        assert_eq!(backend.update(Table::GuildOverrides, &key, "x").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ranked_and_sum() {
        let backend = MemoryBackend::new();
        backend.insert_counter(&RowKey::new("g1", "u1"), 3).await.unwrap();
        backend.insert_counter(&RowKey::new("g1", "u2"), 9).await.unwrap();
        backend.insert_counter(&RowKey::new("g1", "u3"), 5).await.unwrap();
        backend.insert_counter(&RowKey::new("g2", "u1"), 4).await.unwrap();

        let ranked = backend.ranked_counters("g1", 2).await.unwrap();
        assert_eq!(ranked, vec![("u2".to_string(), 9), ("u3".to_string(), 5)]);
        backend.insert_counter(&RowKey::new("karma:g1", "u1"), 10).await.unwrap();
        assert_eq!(backend.counter_sum("", "u1").await.unwrap(), 17);
        assert_eq!(backend.counter_sum("karma:", "u1").await.unwrap(), 10);
        assert_eq!(backend.counter_sum("", "nobody").await.unwrap(), 0);
    }
}
