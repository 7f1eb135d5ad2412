use poise::serenity_prelude::{ChannelId, GuildId, UserId};
use tracing::{debug, warn};

use super::{RowKey, Scope, Store, Table, KARMA_SCOPE_PREFIX};
use crate::error::Result;

/// Value stored for an enabled boolean flag
const FLAG_ON: &str = "1";

/// Separator between channel and text in channel-message settings
const CHANNEL_MESSAGE_SEPARATOR: char = '|';

/// Default number of rows a ranked query returns
const DEFAULT_RANK_LIMIT: usize = 1000;

/// Well-known per-guild settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuildSetting {
    Prefix,
    AutoRole,
    ModLogChannel,
    VoiceLogChannel,
    MuteRole,
    NotifyRole,
    GhostPingMessage,
    JoinMessage,
    LeaveMessage,
    Backup,
    ColorReaction,
}

impl GuildSetting {
    /// Name the setting is stored under (kept from the legacy column names)
    pub fn as_str(self) -> &'static str {
        match self {
            GuildSetting::Prefix => "prefix",
            GuildSetting::AutoRole => "autorole",
            GuildSetting::ModLogChannel => "modlogchanID",
            GuildSetting::VoiceLogChannel => "voicelogchanID",
            GuildSetting::MuteRole => "muteRoleID",
            GuildSetting::NotifyRole => "notifyRoleID",
            GuildSetting::GhostPingMessage => "ghostPingMsg",
            GuildSetting::JoinMessage => "joinMsg",
            GuildSetting::LeaveMessage => "leaveMsg",
            GuildSetting::Backup => "backup",
            GuildSetting::ColorReaction => "colorReaction",
        }
    }
}

/// Generic key/value settings and counters, one row per `(scope, name)`.
///
/// Used by every feature needing durable per-guild, per-user or global state.
#[derive(Clone)]
pub struct SettingsStore {
    store: Store,
}

impl SettingsStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Read a setting; `NotFound` when it was never set.
    /// An empty string is a stored value, not an absent one.
    pub async fn get(&self, scope: impl Into<Scope>, name: &str) -> Result<String> {
        let key = RowKey::new(scope.into().key(), name);
        self.store.get(Table::Settings, &key).await
    }

    /// Read a setting, mapping `NotFound` to `default`
    pub async fn get_or(&self, scope: impl Into<Scope>, name: &str, default: &str) -> Result<String> {
        match self.get(scope, name).await {
            Err(e) if e.is_not_found() => Ok(default.to_string()),
            other => other,
        }
    }

    pub async fn set(&self, scope: impl Into<Scope>, name: &str, value: &str) -> Result<()> {
        let key = RowKey::new(scope.into().key(), name);
        debug!("Setting {} = {:?}", key, value);
        self.store.upsert(Table::Settings, &key, value).await
    }

    /// Delete a setting, returning whether it existed
    pub async fn unset(&self, scope: impl Into<Scope>, name: &str) -> Result<bool> {
        let key = RowKey::new(scope.into().key(), name);
        self.store.remove(Table::Settings, &key).await
    }

    /// All settings of one scope as `(name, value)`
    pub async fn list(&self, scope: impl Into<Scope>) -> Result<Vec<(String, String)>> {
        self.store
            .get_scope(Table::Settings, &scope.into().key())
            .await
    }

    pub async fn get_guild(&self, guild_id: GuildId, setting: GuildSetting) -> Result<String> {
        self.get(guild_id, setting.as_str()).await
    }

    pub async fn set_guild(&self, guild_id: GuildId, setting: GuildSetting, value: &str) -> Result<()> {
        self.set(guild_id, setting.as_str(), value).await
    }

    /// Boolean flags are stored as `"1"` / `""`; an unset flag is off
    pub async fn get_guild_flag(&self, guild_id: GuildId, setting: GuildSetting) -> Result<bool> {
        let value = self.get_or(guild_id, setting.as_str(), "").await?;
        Ok(!value.is_empty())
    }

    pub async fn set_guild_flag(&self, guild_id: GuildId, setting: GuildSetting, enabled: bool) -> Result<()> {
        let value = if enabled { FLAG_ON } else { "" };
        self.set(guild_id, setting.as_str(), value).await
    }

    /// Read a `<channel>|<message>` setting such as the join message.
    /// `None` when unset, empty, or not in that shape.
    pub async fn get_channel_message(
        &self,
        guild_id: GuildId,
        setting: GuildSetting,
    ) -> Result<Option<(ChannelId, String)>> {
        let raw = self.get_or(guild_id, setting.as_str(), "").await?;
        Ok(parse_channel_message(&raw))
    }

    pub async fn set_channel_message(
        &self,
        guild_id: GuildId,
        setting: GuildSetting,
        channel_id: ChannelId,
        message: &str,
    ) -> Result<()> {
        let raw = format!("{}{}{}", channel_id, CHANNEL_MESSAGE_SEPARATOR, message);
        self.set(guild_id, setting.as_str(), &raw).await
    }

    /// Read a counter; `NotFound` when it was never written
    pub async fn get_counter(&self, scope: impl Into<Scope>, name: &str) -> Result<i64> {
        let key = RowKey::new(scope.into().key(), name);
        self.store.get_counter(&key).await
    }

    pub async fn set_counter(&self, scope: impl Into<Scope>, name: &str, value: i64) -> Result<()> {
        let key = RowKey::new(scope.into().key(), name);
        self.store.set_counter(&key, value).await
    }

    /// Add `delta` to a counter, starting from zero when absent
    pub async fn increment(&self, scope: impl Into<Scope>, name: &str, delta: i64) -> Result<()> {
        let key = RowKey::new(scope.into().key(), name);
        debug!("Incrementing {} by {}", key, delta);
        self.store.increment(&key, delta).await
    }

    /// Highest counters of a scope first; `limit < 1` means the default of 1000
    pub async fn ranked(&self, scope: impl Into<Scope>, limit: usize) -> Result<Vec<(String, i64)>> {
        let limit = if limit < 1 { DEFAULT_RANK_LIMIT } else { limit };
        self.store.ranked_counters(&scope.into().key(), limit).await
    }

    /// Sum of one counter name across every scope (0 when none exist)
    pub async fn counter_sum(&self, name: &str) -> Result<i64> {
        self.store.counter_sum("", name).await
    }

    /// Per-user reputation in a guild
    pub async fn karma(&self, guild_id: GuildId, user_id: UserId) -> Result<i64> {
        match self.get_counter(Scope::Karma(guild_id), &user_id.to_string()).await {
            Err(e) if e.is_not_found() => Ok(0),
            other => other,
        }
    }

    pub async fn add_karma(&self, guild_id: GuildId, user_id: UserId, delta: i64) -> Result<()> {
        self.increment(Scope::Karma(guild_id), &user_id.to_string(), delta)
            .await
    }

    /// Total reputation of a user across all guilds
    pub async fn karma_sum(&self, user_id: UserId) -> Result<i64> {
        self.store
            .counter_sum(KARMA_SCOPE_PREFIX, &user_id.to_string())
            .await
    }

    /// Top users of a guild by reputation. Rows not named by a user ID are skipped.
    pub async fn karma_leaderboard(&self, guild_id: GuildId, limit: usize) -> Result<Vec<(UserId, i64)>> {
        let ranking = self
            .ranked(Scope::Karma(guild_id), limit)
            .await?
            .into_iter()
            .filter_map(|(name, value)| {
                match name.parse::<u64>().ok().filter(|id| *id != 0) {
                    Some(id) => Some((UserId::new(id), value)),
                    None => {
                        warn!("Skipping karma row '{}' in guild {}: not a user ID", name, guild_id);
                        None
                    }
                }
            })
            .collect();
        Ok(ranking)
    }
}

fn parse_channel_message(raw: &str) -> Option<(ChannelId, String)> {
    let (channel, message) = raw.split_once(CHANNEL_MESSAGE_SEPARATOR)?;
    let id = channel.parse::<u64>().ok().filter(|id| *id != 0)?;
    Some((ChannelId::new(id), message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use std::sync::Arc;

    fn settings_on(backend: Arc<MemoryBackend>) -> SettingsStore {
        SettingsStore::new(Store::new(backend))
    }

    fn guild1() -> GuildId {
        GuildId::new(1)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let settings = settings_on(Arc::new(MemoryBackend::new()));
        settings.set(guild1(), "prefix", "!").await.unwrap();
        assert_eq!(settings.get(guild1(), "prefix").await.unwrap(), "!");
    }

    #[tokio::test]
    async fn test_empty_value_is_not_absent() {
        let settings = settings_on(Arc::new(MemoryBackend::new()));
        assert!(settings.get(guild1(), "prefix").await.unwrap_err().is_not_found());

        settings.set(guild1(), "prefix", "").await.unwrap();
        assert_eq!(settings.get(guild1(), "prefix").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_upsert_idempotence() {
        let backend = Arc::new(MemoryBackend::new());
        let settings = settings_on(backend.clone());
        let key = RowKey::new("1", "prefix");

        settings.set(guild1(), "prefix", "!").await.unwrap();
        settings.set(guild1(), "prefix", "!").await.unwrap();
        assert_eq!(backend.row_count(Table::Settings, &key), 1);

        for value in ["a", "b", "c"] {
            settings.set(guild1(), "prefix", value).await.unwrap();
        }
        assert_eq!(backend.row_count(Table::Settings, &key), 1);
        assert_eq!(settings.get(guild1(), "prefix").await.unwrap(), "c");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_leave_one_row() {
        // No uniqueness constraint: only the per-key lock prevents duplicates
        let backend = Arc::new(MemoryBackend::new().yielding());
        let settings = settings_on(backend.clone());

        for round in 0..10 {
            let name = format!("key{}", round);
            let tasks: Vec<_> = (0..16)
                .map(|i| {
                    let settings = settings.clone();
                    let name = name.clone();
                    tokio::spawn(async move { settings.set(guild1(), &name, &i.to_string()).await })
                })
                .collect();

            for result in futures::future::join_all(tasks).await {
                result.unwrap().unwrap();
            }

            let key = RowKey::new("1", name.as_str());
            assert_eq!(backend.row_count(Table::Settings, &key), 1);
            let value: usize = settings.get(guild1(), &name).await.unwrap().parse().unwrap();
            assert!(value < 16);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_count_exactly() {
        let backend = Arc::new(MemoryBackend::new().yielding());
        let settings = settings_on(backend.clone());

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let settings = settings.clone();
                tokio::spawn(async move { settings.increment(guild1(), "42", 1).await })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(settings.get_counter(guild1(), "42").await.unwrap(), 50);
        assert_eq!(backend.counter_row_count(&RowKey::new("1", "42")), 1);
    }

    #[tokio::test]
    async fn test_global_scope_is_separate() {
        let settings = settings_on(Arc::new(MemoryBackend::new()));
        settings.set(Scope::Global, "presence", "online").await.unwrap();
        settings.set(guild1(), "presence", "guild").await.unwrap();
        assert_eq!(settings.get(Scope::Global, "presence").await.unwrap(), "online");
        assert_eq!(settings.list(Scope::Global).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unset() {
        let settings = settings_on(Arc::new(MemoryBackend::new()));
        settings.set_guild(guild1(), GuildSetting::AutoRole, "5").await.unwrap();
        assert!(settings.unset(guild1(), "autorole").await.unwrap());
        assert_eq!(settings.get_or(guild1(), "autorole", "none").await.unwrap(), "none");
    }

    #[tokio::test]
    async fn test_guild_flags_and_channel_messages() {
        let settings = settings_on(Arc::new(MemoryBackend::new()));

        assert!(!settings.get_guild_flag(guild1(), GuildSetting::Backup).await.unwrap());
        settings.set_guild_flag(guild1(), GuildSetting::Backup, true).await.unwrap();
        assert!(settings.get_guild_flag(guild1(), GuildSetting::Backup).await.unwrap());
        assert_eq!(settings.get_guild(guild1(), GuildSetting::Backup).await.unwrap(), "1");

        assert_eq!(
            settings.get_channel_message(guild1(), GuildSetting::JoinMessage).await.unwrap(),
            None
        );
        settings
            .set_channel_message(guild1(), GuildSetting::JoinMessage, ChannelId::new(77), "hi | there")
            .await
            .unwrap();
        assert_eq!(
            settings.get_channel_message(guild1(), GuildSetting::JoinMessage).await.unwrap(),
            Some((ChannelId::new(77), "hi | there".to_string()))
        );
    }

    #[tokio::test]
    async fn test_karma() {
        let settings = settings_on(Arc::new(MemoryBackend::new()));
        let alice = UserId::new(10);
        let bob = UserId::new(20);

        assert_eq!(settings.karma(guild1(), alice).await.unwrap(), 0);
        settings.add_karma(guild1(), alice, 3).await.unwrap();
        settings.add_karma(guild1(), bob, 5).await.unwrap();
        settings.add_karma(GuildId::new(2), alice, 4).await.unwrap();
        settings.add_karma(guild1(), bob, 1).await.unwrap();

        assert_eq!(settings.karma_sum(alice).await.unwrap(), 7);
        assert_eq!(
            settings.karma_leaderboard(guild1(), 0).await.unwrap(),
            vec![(bob, 6), (alice, 3)]
        );
    }

    #[tokio::test]
    async fn test_karma_ignores_other_counters() {
        let backend = Arc::new(MemoryBackend::new());
        let settings = settings_on(backend.clone());
        let alice = UserId::new(10);

        settings.add_karma(guild1(), alice, 3).await.unwrap();
        settings.increment(guild1(), "messages", 1).await.unwrap();
        settings.increment(guild1(), "10", 40).await.unwrap();
        settings.set_counter(Scope::Global, "10", 100).await.unwrap();

        assert_eq!(settings.karma(guild1(), alice).await.unwrap(), 3);
        assert_eq!(settings.karma_sum(alice).await.unwrap(), 3);
        assert_eq!(
            settings.karma_leaderboard(guild1(), 0).await.unwrap(),
            vec![(alice, 3)]
        );
        assert_eq!(settings.get_counter(guild1(), "messages").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_karma_leaderboard_skips_foreign_rows() {
        let settings = settings_on(Arc::new(MemoryBackend::new()));
        let alice = UserId::new(10);

        settings.add_karma(guild1(), alice, 2).await.unwrap();
        settings.set_counter(Scope::Karma(guild1()), "legacy", 50).await.unwrap();
        settings.set_counter(Scope::Karma(guild1()), "0", 40).await.unwrap();

        assert_eq!(
            settings.karma_leaderboard(guild1(), 0).await.unwrap(),
            vec![(alice, 2)]
        );
    }

    #[test]
    fn test_parse_channel_message() {
        assert_eq!(
            parse_channel_message("12|welcome"),
            Some((ChannelId::new(12), "welcome".to_string()))
        );
        assert_eq!(parse_channel_message("welcome"), None);
        assert_eq!(parse_channel_message("abc|welcome"), None);
    }
}
