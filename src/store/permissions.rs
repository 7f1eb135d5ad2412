use poise::serenity_prelude::{GuildId, RoleId};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{RowKey, Store, Table};
use crate::error::Result;
use crate::permissions::PermissionSet;

/// Row name of a guild's custom-command override set
const OVERRIDES_ROW: &str = "custom-commands";

/// Persistence of one permission set per `(guild, role)`, plus one
/// custom-command override set per guild.
///
/// Sets are stored in their comma-joined string form and parsed here, so callers
/// only ever see typed rules.
#[derive(Clone)]
pub struct PermissionStore {
    store: Store,
}

impl PermissionStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn role_key(guild_id: GuildId, role_id: RoleId) -> RowKey {
        RowKey::new(guild_id.to_string(), role_id.to_string())
    }

    /// Rules of one role; `NotFound` when the role has no stored set
    pub async fn get_role_permissions(&self, guild_id: GuildId, role_id: RoleId) -> Result<PermissionSet> {
        let raw = self
            .store
            .get(Table::RolePermissions, &Self::role_key(guild_id, role_id))
            .await?;
        Ok(PermissionSet::parse_lossy(
            &raw,
            &format!("role {} in guild {}", role_id, guild_id),
        ))
    }

    /// Rules of one role, `None` when the role has no stored set
    pub async fn find_role_permissions(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
    ) -> Result<Option<PermissionSet>> {
        match self.get_role_permissions(guild_id, role_id).await {
            Ok(set) => Ok(Some(set)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replace the rules of one role. An empty set removes the row.
    pub async fn set_role_permissions(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        permissions: &PermissionSet,
    ) -> Result<()> {
        let key = Self::role_key(guild_id, role_id);
        if permissions.is_empty() {
            let removed = self.store.remove(Table::RolePermissions, &key).await?;
            debug!("Cleared permissions of role {} in guild {} (existed: {})", role_id, guild_id, removed);
            return Ok(());
        }

        self.store
            .upsert(Table::RolePermissions, &key, &permissions.encode())
            .await?;
        info!(
            "Stored {} permission rules for role {} in guild {}",
            permissions.len(),
            role_id,
            guild_id
        );
        Ok(())
    }

    /// Every stored role set of a guild
    pub async fn list_guild_permissions(&self, guild_id: GuildId) -> Result<HashMap<RoleId, PermissionSet>> {
        let rows = self
            .store
            .get_scope(Table::RolePermissions, &guild_id.to_string())
            .await?;

        let mut result = HashMap::new();
        for (name, raw) in rows {
            let Some(role_id) = name.parse::<u64>().ok().filter(|id| *id != 0).map(RoleId::new) else {
                warn!("Skipping permission row with invalid role ID '{}' in guild {}", name, guild_id);
                continue;
            };
            let subject = format!("role {} in guild {}", role_id, guild_id);
            result.insert(role_id, PermissionSet::parse_lossy(&raw, &subject));
        }
        Ok(result)
    }

    /// Custom-command overrides of a guild; empty when none are stored
    pub async fn get_guild_overrides(&self, guild_id: GuildId) -> Result<PermissionSet> {
        let key = RowKey::new(guild_id.to_string(), OVERRIDES_ROW);
        match self.store.get(Table::GuildOverrides, &key).await {
            Ok(raw) => Ok(PermissionSet::parse_lossy(
                &raw,
                &format!("overrides of guild {}", guild_id),
            )),
            Err(e) if e.is_not_found() => Ok(PermissionSet::new()),
            Err(e) => Err(e),
        }
    }

    /// Replace the custom-command overrides of a guild. An empty set removes the row.
    pub async fn set_guild_overrides(&self, guild_id: GuildId, overrides: &PermissionSet) -> Result<()> {
        let key = RowKey::new(guild_id.to_string(), OVERRIDES_ROW);
        if overrides.is_empty() {
            self.store.remove(Table::GuildOverrides, &key).await?;
            return Ok(());
        }
        self.store
            .upsert(Table::GuildOverrides, &key, &overrides.encode())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionRule;
    use crate::store::{Backend, MemoryBackend};
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryBackend>, PermissionStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = PermissionStore::new(Store::new(backend.clone()));
        (backend, store)
    }

    fn rules(raw: &str) -> PermissionSet {
        PermissionSet::parse_lossy(raw, "test")
    }

    #[tokio::test]
    async fn test_set_and_get_role_permissions() {
        let (backend, store) = setup();
        let guild = GuildId::new(1);
        let role = RoleId::new(2);

        assert!(store.get_role_permissions(guild, role).await.unwrap_err().is_not_found());
        assert_eq!(store.find_role_permissions(guild, role).await.unwrap(), None);

        store.set_role_permissions(guild, role, &rules("+sp.chat.*,-sp.chat.quote")).await.unwrap();
        store.set_role_permissions(guild, role, &rules("+sp.etc")).await.unwrap();

        let set = store.get_role_permissions(guild, role).await.unwrap();
        assert_eq!(set.rules(), &[PermissionRule::grant("sp.etc").unwrap()]);
        assert_eq!(backend.row_count(Table::RolePermissions, &RowKey::new("1", "2")), 1);
    }

    #[tokio::test]
    async fn test_empty_set_removes_row() {
        let (backend, store) = setup();
        let guild = GuildId::new(1);
        let role = RoleId::new(2);

        store.set_role_permissions(guild, role, &rules("+sp.etc")).await.unwrap();
        store.set_role_permissions(guild, role, &PermissionSet::new()).await.unwrap();
        assert_eq!(backend.row_count(Table::RolePermissions, &RowKey::new("1", "2")), 0);
    }

    #[tokio::test]
    async fn test_malformed_stored_rules_are_skipped() {
        let (backend, store) = setup();
        backend
            .insert(Table::RolePermissions, &RowKey::new("1", "2"), "+sp.etc,NOT A RULE,-sp.chat")
            .await
            .unwrap();

        let set = store.get_role_permissions(GuildId::new(1), RoleId::new(2)).await.unwrap();
        assert_eq!(set.encode(), "+sp.etc,-sp.chat");
    }

    #[tokio::test]
    async fn test_list_guild_permissions() {
        let (_, store) = setup();
        let guild = GuildId::new(1);
        store.set_role_permissions(guild, RoleId::new(2), &rules("+sp.etc")).await.unwrap();
        store.set_role_permissions(guild, RoleId::new(3), &rules("-sp.chat")).await.unwrap();
        store.set_role_permissions(GuildId::new(9), RoleId::new(4), &rules("+sp")).await.unwrap();

        let all = store.list_guild_permissions(guild).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[&RoleId::new(2)].allows("sp.etc"));
        assert!(!all[&RoleId::new(3)].allows("sp.chat"));
    }

    #[tokio::test]
    async fn test_guild_overrides() {
        let (_, store) = setup();
        let guild = GuildId::new(1);
        assert!(store.get_guild_overrides(guild).await.unwrap().is_empty());

        store.set_guild_overrides(guild, &rules("+sp.custom.hello")).await.unwrap();
        assert!(store.get_guild_overrides(guild).await.unwrap().allows("sp.custom.hello"));

        store.set_guild_overrides(guild, &PermissionSet::new()).await.unwrap();
        assert!(store.get_guild_overrides(guild).await.unwrap().is_empty());
    }
}
