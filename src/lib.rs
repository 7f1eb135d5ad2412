//! Role-hierarchy command permissions for a Discord bot, backed by a small
//! relational store.

pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod permissions;
pub mod store;

use permissions::PermissionResolver;
use store::{PermissionStore, SettingsStore};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared application state
pub struct Data {
    pub resolver: PermissionResolver,
    pub permissions: PermissionStore,
    pub settings: SettingsStore,
}
