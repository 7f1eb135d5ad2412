use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::permissions::OwnerLevelConfig;

/// Permission levels configuration
/// Loaded from data/permissions.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionsConfig {
    /// Level granted to the bot owner
    #[serde(default = "default_bot_owner_level")]
    pub bot_owner_level: i32,

    /// Level granted to the owner of a guild
    #[serde(default = "default_guild_owner_level")]
    pub guild_owner_level: i32,

    /// Required levels for custom commands, keyed by invoke name
    /// e.g., {"cmdinvoke": 1000} keeps guild owners on the role rules
    ///
    /// A level only decides which owners pass without rules. Members without an
    /// owner level are never let through by it, whatever its value; open a
    /// command to everyone with a `@everyone` rule instead.
    #[serde(default)]
    pub custom_cmd_permissions: HashMap<String, i32>,

    /// Overrides of the built-in required levels, keyed by domain
    /// e.g., {"sp.chat.quote": 1000}. Same owner-only effect as above.
    #[serde(default)]
    pub command_levels: HashMap<String, i32>,
}

fn default_bot_owner_level() -> i32 {
    1000
}

fn default_guild_owner_level() -> i32 {
    10
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            bot_owner_level: default_bot_owner_level(),
            guild_owner_level: default_guild_owner_level(),
            custom_cmd_permissions: HashMap::new(),
            command_levels: HashMap::new(),
        }
    }
}

impl PermissionsConfig {
    /// Load from a JSON file
    pub fn load_from_file(path: &str) -> crate::error::Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| crate::error::BotError::ConfigLoad {
                path: path.to_string(),
                source: e,
            })?;

        let config: Self =
            serde_json::from_str(&content).map_err(|e| crate::error::BotError::ConfigParse {
                path: path.to_string(),
                source: e,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file, falling back to defaults when the file is absent
    pub fn load_or_default(path: &str) -> crate::error::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("No permissions config at {}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// The bot owner must outrank guild owners, and both must outrank regular members
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.guild_owner_level <= 0 {
            return Err(crate::error::BotError::ConfigValidation {
                message: format!(
                    "guild_owner_level must be positive, got {}",
                    self.guild_owner_level
                ),
            });
        }
        if self.bot_owner_level <= self.guild_owner_level {
            return Err(crate::error::BotError::ConfigValidation {
                message: format!(
                    "bot_owner_level ({}) must be greater than guild_owner_level ({})",
                    self.bot_owner_level, self.guild_owner_level
                ),
            });
        }
        Ok(())
    }

    pub fn owner_levels(&self) -> OwnerLevelConfig {
        OwnerLevelConfig {
            bot_owner_level: self.bot_owner_level,
            guild_owner_level: self.guild_owner_level,
        }
    }
}
