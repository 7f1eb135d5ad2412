use poise::serenity_prelude as serenity;
use tracing::info;

use crate::{Context, Error};

const DEFAULT_LEADERBOARD_SIZE: u32 = 10;
const MAX_LEADERBOARD_SIZE: u32 = 50;

/// Show, give, and rank karma
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    subcommands("show", "give", "leaderboard"),
    subcommand_required
)]
pub async fn karma(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Karma of a member on this server and across all servers
#[poise::command(slash_command, prefix_command, guild_only)]
async fn show(
    ctx: Context<'_>,
    #[description = "Member, yourself when omitted"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let user = user.as_ref().unwrap_or_else(|| ctx.author());

    let settings = &ctx.data().settings;
    let here = settings.karma(guild_id, user.id).await?;
    let total = settings.karma_sum(user.id).await?;

    let embed = serenity::CreateEmbed::new()
        .title(format!("Karma of {}", user.name))
        .field("This server", here.to_string(), true)
        .field("All servers", total.to_string(), true)
        .color(0x3498db);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Give one karma point to a member
#[poise::command(slash_command, prefix_command, guild_only)]
async fn give(ctx: Context<'_>, #[description = "Member to thank"] user: serenity::User) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    if user.id == ctx.author().id || user.bot {
        ctx.send(poise::CreateReply::default()
            .content("You can only give karma to other members.")
            .ephemeral(true))
            .await?;
        return Ok(());
    }

    let settings = &ctx.data().settings;
    settings.add_karma(guild_id, user.id, 1).await?;
    let karma = settings.karma(guild_id, user.id).await?;
    info!("{} gave karma to {} in guild {}", ctx.author().name, user.name, guild_id);

    ctx.say(format!("**{}** now has {} karma.", user.name, karma)).await?;
    Ok(())
}

/// Members with the most karma on this server
#[poise::command(slash_command, prefix_command, guild_only)]
async fn leaderboard(
    ctx: Context<'_>,
    #[description = "Number of entries"]
    #[min = 1]
    #[max = 50]
    limit: Option<u32>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let limit = limit
        .unwrap_or(DEFAULT_LEADERBOARD_SIZE)
        .clamp(1, MAX_LEADERBOARD_SIZE);

    let ranking = ctx
        .data()
        .settings
        .karma_leaderboard(guild_id, limit as usize)
        .await?;
    if ranking.is_empty() {
        ctx.say("Nobody has karma on this server yet.").await?;
        return Ok(());
    }

    let lines: Vec<String> = ranking
        .iter()
        .enumerate()
        .map(|(i, (user_id, karma))| format!("{}. <@{}>: {}", i + 1, user_id, karma))
        .collect();
    let embed = serenity::CreateEmbed::new()
        .title("Karma leaderboard")
        .description(lines.join("\n"))
        .color(0x3498db);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}
