use poise::serenity_prelude::UserId;
use std::time::Duration;

use crate::error::{BotError, Result};

const DEFAULT_DATABASE_URL: &str = "sqlite://warden.db";
const DEFAULT_PERMISSIONS_PATH: &str = "data/permissions.json";
const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 5000;

/// Process configuration read from the environment (and `.env` via dotenv)
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    /// Discord ID of the bot owner, who gets the bot owner level everywhere
    pub owner_id: Option<UserId>,
    pub database_url: String,
    pub permissions_path: String,
    /// Upper bound for one permission resolution
    pub resolve_timeout: Duration,
}

impl BotConfig {
    /// Read configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let token = lookup("DISCORD_TOKEN").ok_or_else(|| BotError::ConfigValidation {
            message: "Missing DISCORD_TOKEN environment variable".to_string(),
        })?;

        let owner_id = match lookup("OWNER_ID") {
            Some(raw) => {
                let id = raw
                    .parse::<u64>()
                    .ok()
                    .filter(|id| *id != 0)
                    .ok_or_else(|| BotError::ConfigValidation {
                        message: format!("OWNER_ID '{}' is not a valid user ID", raw),
                    })?;
                Some(UserId::new(id))
            }
            None => None,
        };

        let resolve_timeout_ms = match lookup("RESOLVE_TIMEOUT_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| BotError::ConfigValidation {
                message: format!("RESOLVE_TIMEOUT_MS '{}' is not a number: {}", raw, e),
            })?,
            None => DEFAULT_RESOLVE_TIMEOUT_MS,
        };

        Ok(Self {
            token,
            owner_id,
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            permissions_path: lookup("PERMISSIONS_PATH")
                .unwrap_or_else(|| DEFAULT_PERMISSIONS_PATH.to_string()),
            resolve_timeout: Duration::from_millis(resolve_timeout_ms),
        })
    }
}
