use std::collections::HashMap;

use super::rule::{domain_prefixes, validate_domain};
use crate::config::PermissionsConfig;
use crate::error::Result;

/// Root domain under which admin-defined custom commands live
pub const CUSTOM_COMMAND_ROOT: &str = "sp.custom";

/// Privilege floors for the bot owner and guild owners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerLevelConfig {
    pub bot_owner_level: i32,
    pub guild_owner_level: i32,
}

impl Default for OwnerLevelConfig {
    fn default() -> Self {
        Self {
            bot_owner_level: 1000,
            guild_owner_level: 10,
        }
    }
}

/// Default required privilege levels per command domain.
///
/// Built once at startup and never mutated. Owners whose level meets the
/// requirement skip rule evaluation entirely.
#[derive(Debug, Clone)]
pub struct CommandPermissionPolicy {
    levels: HashMap<String, i32>,
    owner_levels: OwnerLevelConfig,
}

impl CommandPermissionPolicy {
    /// Built-in defaults: guild owners cover guild-facing command groups, the bot
    /// owner covers everything.
    ///
    /// A level only ever authorizes owners. Regular members (level 0) are never
    /// let through by the policy; open access comes from stored rules.
    pub fn new(owner_levels: OwnerLevelConfig) -> Self {
        let mut levels = HashMap::new();
        levels.insert("sp".to_string(), owner_levels.bot_owner_level);
        for group in ["sp.etc", "sp.chat", "sp.guild", CUSTOM_COMMAND_ROOT] {
            levels.insert(group.to_string(), owner_levels.guild_owner_level);
        }
        Self {
            levels,
            owner_levels,
        }
    }

    /// Build the policy from the loaded permissions configuration
    pub fn from_config(config: &PermissionsConfig) -> Result<Self> {
        let mut policy = Self::new(config.owner_levels());
        for (domain, level) in &config.command_levels {
            policy = policy.with_level(domain, *level)?;
        }
        for (command, level) in &config.custom_cmd_permissions {
            let domain = custom_command_domain(command);
            policy = policy.with_level(&domain, *level)?;
        }
        Ok(policy)
    }

    /// Override the required level for one domain.
    ///
    /// Raising it keeps lower owners on rule evaluation; lowering it lets them
    /// skip it. No value admits level 0 members.
    pub fn with_level(mut self, domain: &str, level: i32) -> Result<Self> {
        validate_domain(domain)?;
        self.levels.insert(domain.to_string(), level);
        Ok(self)
    }

    pub fn owner_levels(&self) -> OwnerLevelConfig {
        self.owner_levels
    }

    /// Required level for a domain, using the closest configured parent.
    /// Unlisted domains require the bot owner.
    pub fn required_level(&self, domain: &str) -> i32 {
        domain_prefixes(domain)
            .find_map(|prefix| self.levels.get(prefix).copied())
            .unwrap_or(self.owner_levels.bot_owner_level)
    }

    /// Whether a member's level alone authorizes `domain`
    pub fn level_authorizes(&self, level: i32, domain: &str) -> bool {
        level > 0 && level >= self.required_level(domain)
    }

    /// Whether a domain names an admin-defined custom command
    pub fn is_custom_command(&self, domain: &str) -> bool {
        domain == CUSTOM_COMMAND_ROOT
            || domain
                .strip_prefix(CUSTOM_COMMAND_ROOT)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

/// Domain of a custom command by its invoke name
pub fn custom_command_domain(command: &str) -> String {
    format!("{}.{}", CUSTOM_COMMAND_ROOT, command.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_levels() {
        let policy = CommandPermissionPolicy::new(OwnerLevelConfig::default());
        assert_eq!(policy.required_level("sp.chat.quote"), 10);
        assert_eq!(policy.required_level("sp.etc.ping"), 10);
        assert_eq!(policy.required_level("sp.guild.config.prefix"), 10);
        assert_eq!(policy.required_level("sp.ban"), 1000);
        assert_eq!(policy.required_level("other.thing"), 1000);
    }

    #[test]
    fn test_level_authorizes() {
        let policy = CommandPermissionPolicy::new(OwnerLevelConfig::default())
            .with_level("sp.etc.open", 0)
            .unwrap();
        assert!(policy.level_authorizes(10, "sp.guild.config.prefix"));
        assert!(!policy.level_authorizes(10, "sp.ban"));
        assert!(policy.level_authorizes(1000, "anything.at.all"));
        // Level 0 never passes, even where the required level is 0
        assert!(!policy.level_authorizes(0, "sp.etc.open"));
    }

    #[test]
    fn test_custom_command_levels_from_config() {
        let policy = CommandPermissionPolicy::from_config(&PermissionsConfig::default()).unwrap();
        assert_eq!(policy.required_level("sp.custom.cmdinvoke"), 10);

        let config: PermissionsConfig =
            serde_json::from_str(r#"{ "custom_cmd_permissions": { "cmdinvoke": 1000, "open": 0 } }"#)
                .unwrap();
        let policy = CommandPermissionPolicy::from_config(&config).unwrap();
        assert_eq!(policy.required_level("sp.custom.cmdinvoke"), 1000);
        assert_eq!(policy.required_level("sp.custom.unknown"), 10);

        // Raised level takes the guild owner off the fast path
        assert!(!policy.level_authorizes(10, "sp.custom.cmdinvoke"));
        assert!(policy.level_authorizes(10, "sp.custom.unknown"));
        // A level of 0 still admits owners only
        assert!(policy.level_authorizes(10, "sp.custom.open"));
        assert!(!policy.level_authorizes(0, "sp.custom.open"));
        assert!(policy.is_custom_command("sp.custom.cmdinvoke"));
        assert!(!policy.is_custom_command("sp.customer"));
        assert!(!policy.is_custom_command("sp.chat.quote"));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let policy = CommandPermissionPolicy::new(OwnerLevelConfig::default());
        assert!(policy.with_level("Bad..Domain", 3).is_err());
    }
}
