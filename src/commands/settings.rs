use tracing::{info, warn};

use crate::store::GuildSetting;
use crate::{Context, Data, Error};

/// Prefix used where a guild has not set its own
pub const DEFAULT_PREFIX: &str = "sp!";

const MAX_PREFIX_LEN: usize = 10;

/// Prefix lookup for prefix commands, read from the guild's settings
pub async fn dynamic_prefix(ctx: poise::PartialContext<'_, Data, Error>) -> Result<Option<String>, Error> {
    let Some(guild_id) = ctx.guild_id else {
        return Ok(Some(DEFAULT_PREFIX.to_string()));
    };

    match ctx
        .data
        .settings
        .get_or(guild_id, GuildSetting::Prefix.as_str(), DEFAULT_PREFIX)
        .await
    {
        Ok(prefix) => Ok(Some(prefix)),
        Err(e) => {
            warn!("Could not load prefix of guild {}, using default: {}", guild_id, e);
            Ok(Some(DEFAULT_PREFIX.to_string()))
        }
    }
}

fn validate_prefix(prefix: &str) -> Result<(), String> {
    if prefix.is_empty() {
        return Err("The prefix cannot be empty.".to_string());
    }
    if prefix.chars().any(char::is_whitespace) {
        return Err("The prefix cannot contain spaces.".to_string());
    }
    if prefix.chars().count() > MAX_PREFIX_LEN {
        return Err(format!("The prefix can be at most {} characters long.", MAX_PREFIX_LEN));
    }
    Ok(())
}

/// Show or change the command prefix of this server
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    subcommands("show", "set", "reset"),
    subcommand_required
)]
pub async fn prefix(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show the current prefix
#[poise::command(slash_command, prefix_command, guild_only)]
async fn show(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let prefix = ctx
        .data()
        .settings
        .get_or(guild_id, GuildSetting::Prefix.as_str(), DEFAULT_PREFIX)
        .await?;

    ctx.send(poise::CreateReply::default()
        .content(format!("The prefix of this server is `{}`", prefix))
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Change the prefix
#[poise::command(slash_command, prefix_command, guild_only)]
async fn set(
    ctx: Context<'_>,
    #[description = "New prefix, without spaces"] prefix: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    if let Err(reason) = validate_prefix(&prefix) {
        ctx.send(poise::CreateReply::default().content(reason).ephemeral(true))
            .await?;
        return Ok(());
    }

    ctx.data()
        .settings
        .set_guild(guild_id, GuildSetting::Prefix, &prefix)
        .await?;
    info!("Prefix of guild {} set to '{}' by {}", guild_id, prefix, ctx.author().name);

    ctx.send(poise::CreateReply::default()
        .content(format!("Prefix set to `{}`", prefix))
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Go back to the default prefix
#[poise::command(slash_command, prefix_command, guild_only)]
async fn reset(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    ctx.data()
        .settings
        .unset(guild_id, GuildSetting::Prefix.as_str())
        .await?;
    info!("Prefix of guild {} reset by {}", guild_id, ctx.author().name);

    ctx.send(poise::CreateReply::default()
        .content(format!("Prefix reset to `{}`", DEFAULT_PREFIX))
        .ephemeral(true))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_prefix() {
        assert!(validate_prefix("!").is_ok());
        assert!(validate_prefix("sp!").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("a b").is_err());
        assert!(validate_prefix("waytoolongprefix").is_err());
    }
}
