use async_trait::async_trait;
use poise::serenity_prelude::{self as serenity, GuildId, Http, RoleId, UserId};
use std::sync::Arc;
use tracing::debug;

use crate::error::{BotError, Result};

/// A role as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub guild_id: GuildId,
    /// Platform hierarchy rank; only compared for equality by the resolver
    pub hierarchy_rank: i64,
}

impl Role {
    /// The guild's `@everyone` role, which shares the guild's ID
    pub fn everyone(guild_id: GuildId) -> Self {
        Self {
            id: RoleId::new(guild_id.get()),
            guild_id,
            hierarchy_rank: 0,
        }
    }

    pub fn is_everyone(&self) -> bool {
        self.id.get() == self.guild_id.get()
    }
}

/// Source of members' roles in hierarchy order
#[async_trait]
pub trait RoleHierarchyProvider: Send + Sync {
    /// Roles of a member, most senior first. Failures are `BotError::Platform`.
    async fn ranked_roles(&self, guild_id: GuildId, member_id: UserId) -> Result<Vec<Role>>;

    /// Owner of a guild
    async fn guild_owner(&self, guild_id: GuildId) -> Result<UserId>;
}

/// Provider backed by the Discord HTTP API
pub struct SerenityHierarchy {
    http: Arc<Http>,
}

impl SerenityHierarchy {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn platform(context: &str, err: serenity::Error) -> BotError {
    BotError::Platform {
        message: format!("{}: {}", context, err),
    }
}

#[async_trait]
impl RoleHierarchyProvider for SerenityHierarchy {
    async fn ranked_roles(&self, guild_id: GuildId, member_id: UserId) -> Result<Vec<Role>> {
        let member = guild_id
            .member(self.http.as_ref(), member_id)
            .await
            .map_err(|e| platform("Failed to fetch member", e))?;
        let guild_roles = guild_id
            .roles(self.http.as_ref())
            .await
            .map_err(|e| platform("Failed to fetch guild roles", e))?;

        let mut roles: Vec<Role> = member
            .roles
            .iter()
            .filter_map(|role_id| guild_roles.get(role_id))
            .map(|role| Role {
                id: role.id,
                guild_id,
                hierarchy_rank: i64::from(role.position),
            })
            .collect();

        // Discord positions grow towards the top of the role list
        roles.sort_by(|a, b| b.hierarchy_rank.cmp(&a.hierarchy_rank).then(b.id.cmp(&a.id)));

        debug!(
            "Member {} in guild {} has {} ranked roles",
            member_id,
            guild_id,
            roles.len()
        );
        Ok(roles)
    }

    async fn guild_owner(&self, guild_id: GuildId) -> Result<UserId> {
        let guild = guild_id
            .to_partial_guild(self.http.as_ref())
            .await
            .map_err(|e| platform("Failed to fetch guild", e))?;
        Ok(guild.owner_id)
    }
}
