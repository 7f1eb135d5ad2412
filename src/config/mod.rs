pub mod bot;
pub mod permissions;

pub use bot::BotConfig;
pub use permissions::PermissionsConfig;
