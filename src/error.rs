use poise::serenity_prelude as serenity;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    // Configuration errors
    #[error("Failed to load config file '{path}': {source}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {message}")]
    ConfigValidation { message: String },

    // Store errors
    #[error("No {table} row for '{name}' in scope '{scope}'")]
    NotFound {
        table: &'static str,
        scope: String,
        name: String,
    },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Concurrent insert won the race for {table} row '{name}' in scope '{scope}'")]
    RaceConflict {
        table: &'static str,
        scope: String,
        name: String,
    },

    // Platform errors
    #[error("Platform error: {message}")]
    Platform { message: String },

    // Permission errors
    #[error("Invalid permission domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("Permission resolution for '{domain}' timed out after {timeout_ms}ms")]
    ResolveTimeout { domain: String, timeout_ms: u128 },
}

impl BotError {
    /// True for absent rows, which callers treat as "use the default".
    pub fn is_not_found(&self) -> bool {
        matches!(self, BotError::NotFound { .. })
    }

    /// True when the failure means "could not evaluate" rather than a decision.
    pub fn is_evaluation_failure(&self) -> bool {
        matches!(
            self,
            BotError::Store { .. }
                | BotError::RaceConflict { .. }
                | BotError::Platform { .. }
                | BotError::ResolveTimeout { .. }
        )
    }
}

impl From<serenity::Error> for BotError {
    fn from(err: serenity::Error) -> Self {
        BotError::Platform {
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for BotError {
    fn from(err: sqlx::Error) -> Self {
        BotError::Store {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
