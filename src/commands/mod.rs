pub mod general;
pub mod karma;
pub mod perms;
pub mod settings;

pub use general::{help, ping};
pub use karma::karma;
pub use perms::perms;
pub use settings::{dynamic_prefix, prefix};

use tracing::warn;

use crate::{Context, Error};

/// Permission domain guarding a command, by qualified name
pub fn command_domain(qualified_name: &str) -> Option<&'static str> {
    let domain = match qualified_name {
        "ping" => "sp.etc.ping",
        "help" => "sp.etc.help",
        "prefix" | "prefix show" | "prefix set" | "prefix reset" => "sp.guild.config.prefix",
        "perms" | "perms show" | "perms set" | "perms remove" | "perms check" | "perms overrides" => {
            "sp.guild.config.perms"
        }
        "karma" | "karma show" | "karma leaderboard" => "sp.chat.karma",
        "karma give" => "sp.chat.karma.give",
        _ => return None,
    };
    Some(domain)
}

/// Framework-wide check run before every command.
///
/// Outside guilds there is no role hierarchy; guild-only commands are rejected
/// by the framework before this runs.
pub async fn gate(ctx: Context<'_>) -> Result<bool, Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(true);
    };

    let name = &ctx.command().qualified_name;
    let Some(domain) = command_domain(name) else {
        warn!("Command '{}' has no permission domain, denying", name);
        return Ok(false);
    };

    Ok(ctx.data().resolver.check(guild_id, ctx.author().id, domain).await)
}
