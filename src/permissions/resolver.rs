use futures::future::try_join_all;
use poise::serenity_prelude::{GuildId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::hierarchy::{Role, RoleHierarchyProvider};
use super::policy::CommandPermissionPolicy;
use super::rule::{validate_domain, PermissionRule};
use super::set::{PermissionSet, Seniority};
use crate::error::{BotError, Result};
use crate::store::PermissionStore;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    /// The member's owner level met the domain's required level
    OwnerLevel { level: i32, required: i32 },
    /// A guild custom-command override matched
    GuildOverride,
    /// A rule from the member's merged role sets matched
    RoleRule,
    /// No rule matched and the member's level fell short
    PolicyDefault { level: i32, required: i32 },
}

/// Outcome of one permission resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub matched_rule: Option<PermissionRule>,
    pub source: VerdictSource,
}

impl Verdict {
    fn from_rule(rule: &PermissionRule, source: VerdictSource) -> Self {
        Self {
            allowed: rule.is_grant(),
            matched_rule: Some(rule.clone()),
            source,
        }
    }
}

/// Decides whether a member may use a command domain in a guild.
///
/// Resolution is read-only: it loads the member's role sets, folds them from the
/// most senior role down and walks the domain's prefixes over the result. Any
/// store or platform failure is returned as an error and never turns into an allow.
#[derive(Clone)]
pub struct PermissionResolver {
    permissions: PermissionStore,
    hierarchy: Arc<dyn RoleHierarchyProvider>,
    policy: Arc<CommandPermissionPolicy>,
    bot_owner: Option<UserId>,
    timeout: Duration,
}

impl PermissionResolver {
    pub fn new(
        permissions: PermissionStore,
        hierarchy: Arc<dyn RoleHierarchyProvider>,
        policy: Arc<CommandPermissionPolicy>,
    ) -> Self {
        Self {
            permissions,
            hierarchy,
            policy,
            bot_owner: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_bot_owner(mut self, bot_owner: Option<UserId>) -> Self {
        self.bot_owner = bot_owner;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(&self) -> &CommandPermissionPolicy {
        &self.policy
    }

    /// Resolve within the configured default deadline
    pub async fn resolve(&self, guild_id: GuildId, member_id: UserId, domain: &str) -> Result<Verdict> {
        self.resolve_with_timeout(guild_id, member_id, domain, self.timeout)
            .await
    }

    /// Resolve within `timeout`; an expired deadline is `ResolveTimeout`
    pub async fn resolve_with_timeout(
        &self,
        guild_id: GuildId,
        member_id: UserId,
        domain: &str,
        timeout: Duration,
    ) -> Result<Verdict> {
        match tokio::time::timeout(timeout, self.evaluate(guild_id, member_id, domain)).await {
            Ok(result) => result,
            Err(_) => Err(BotError::ResolveTimeout {
                domain: domain.to_string(),
                timeout_ms: timeout.as_millis(),
            }),
        }
    }

    /// Allow/deny only. Errors deny.
    pub async fn check(&self, guild_id: GuildId, member_id: UserId, domain: &str) -> bool {
        match self.resolve(guild_id, member_id, domain).await {
            Ok(verdict) => verdict.allowed,
            Err(e) => {
                warn!(
                    "Could not evaluate '{}' for member {} in guild {}, denying: {}",
                    domain, member_id, guild_id, e
                );
                false
            }
        }
    }

    /// Numeric privilege level: bot owner, guild owner, or 0
    pub async fn member_level(&self, guild_id: GuildId, member_id: UserId) -> Result<i32> {
        let levels = self.policy.owner_levels();
        if self.bot_owner == Some(member_id) {
            return Ok(levels.bot_owner_level);
        }
        if self.hierarchy.guild_owner(guild_id).await? == member_id {
            return Ok(levels.guild_owner_level);
        }
        Ok(0)
    }

    /// The member's role sets folded into one, most senior role first.
    ///
    /// `@everyone` joins as the least senior role when the provider left it out.
    /// Consecutive roles with the same rank are merged as equals before being
    /// folded under the more senior ones.
    pub async fn merged_permissions(&self, guild_id: GuildId, member_id: UserId) -> Result<PermissionSet> {
        let mut roles = self.hierarchy.ranked_roles(guild_id, member_id).await?;
        if !roles.iter().any(Role::is_everyone) {
            roles.push(Role::everyone(guild_id));
        }

        let sets = try_join_all(
            roles
                .iter()
                .map(|role| self.permissions.find_role_permissions(guild_id, role.id)),
        )
        .await?;

        let mut merged = PermissionSet::new();
        let mut tier = PermissionSet::new();
        let mut tier_rank = None;
        for (role, set) in roles.iter().zip(sets) {
            if tier_rank.is_some() && tier_rank != Some(role.hierarchy_rank) {
                merged = merged.merge(&tier, Seniority::BaseSenior);
                tier = PermissionSet::new();
            }
            tier_rank = Some(role.hierarchy_rank);
            if let Some(set) = set {
                tier = tier.merge(&set, Seniority::Equal);
            }
        }
        Ok(merged.merge(&tier, Seniority::BaseSenior))
    }

    async fn evaluate(&self, guild_id: GuildId, member_id: UserId, domain: &str) -> Result<Verdict> {
        validate_domain(domain)?;

        let verdict = self.decide(guild_id, member_id, domain).await?;
        debug!(
            "Permission '{}' for member {} in guild {}: allowed={} via {:?}",
            domain, member_id, guild_id, verdict.allowed, verdict.source
        );
        Ok(verdict)
    }

    async fn decide(&self, guild_id: GuildId, member_id: UserId, domain: &str) -> Result<Verdict> {
        let level = self.member_level(guild_id, member_id).await?;
        let required = self.policy.required_level(domain);
        if self.policy.level_authorizes(level, domain) {
            return Ok(Verdict {
                allowed: true,
                matched_rule: None,
                source: VerdictSource::OwnerLevel { level, required },
            });
        }

        if self.policy.is_custom_command(domain) {
            let overrides = self.permissions.get_guild_overrides(guild_id).await?;
            if let Some(rule) = overrides.lookup(domain) {
                return Ok(Verdict::from_rule(rule, VerdictSource::GuildOverride));
            }
        }

        let merged = self.merged_permissions(guild_id, member_id).await?;
        if let Some(rule) = merged.lookup(domain) {
            return Ok(Verdict::from_rule(rule, VerdictSource::RoleRule));
        }

        Ok(Verdict {
            allowed: false,
            matched_rule: None,
            source: VerdictSource::PolicyDefault { level, required },
        })
    }
}
