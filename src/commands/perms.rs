use poise::serenity_prelude as serenity;
use tracing::info;

use crate::error::BotError;
use crate::permissions::{PermissionRule, PermissionSet, VerdictSource, CUSTOM_COMMAND_ROOT};
use crate::{Context, Error};

/// Parse user input strictly: whitespace or comma separated rules
fn parse_rules(input: &str) -> Result<Vec<PermissionRule>, BotError> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|entry| !entry.is_empty())
        .map(PermissionRule::parse)
        .collect()
}

/// `existing` with `additions` replacing rules of the same domain and kind
fn apply_rules(existing: &PermissionSet, additions: Vec<PermissionRule>) -> PermissionSet {
    let kept: Vec<PermissionRule> = existing
        .rules()
        .iter()
        .filter(|rule| {
            !additions
                .iter()
                .any(|added| added.domain == rule.domain && added.explicit == rule.explicit)
        })
        .cloned()
        .collect();
    kept.into_iter().chain(additions).collect()
}

fn format_rules(set: &PermissionSet) -> String {
    set.rules()
        .iter()
        .map(|rule| format!("`{}`", rule))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn reply(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(poise::CreateReply::default().content(content).ephemeral(true))
        .await?;
    Ok(())
}

/// Manage role permission rules
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    subcommands("show", "set", "remove", "check", "overrides"),
    subcommand_required
)]
pub async fn perms(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show the rules of a role
#[poise::command(slash_command, prefix_command, guild_only)]
async fn show(ctx: Context<'_>, #[description = "Role to inspect"] role: serenity::Role) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let rules = ctx
        .data()
        .permissions
        .find_role_permissions(guild_id, role.id)
        .await?;

    let content = match rules {
        Some(set) if !set.is_empty() => format!("Rules of **{}**:\n{}", role.name, format_rules(&set)),
        _ => format!("**{}** has no permission rules.", role.name),
    };
    reply(ctx, content).await
}

/// Add rules to a role, e.g. `+sp.chat.* -sp.chat.quote`
#[poise::command(slash_command, prefix_command, guild_only)]
async fn set(
    ctx: Context<'_>,
    #[description = "Role to edit"] role: serenity::Role,
    #[description = "Rules like +sp.chat.* or -sp.chat.quote"]
    #[rest]
    rules: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let additions = match parse_rules(&rules) {
        Ok(additions) if !additions.is_empty() => additions,
        Ok(_) => return reply(ctx, "No rules given.").await,
        Err(e) => return reply(ctx, format!("Invalid rule: {}", e)).await,
    };

    let store = &ctx.data().permissions;
    let existing = store
        .find_role_permissions(guild_id, role.id)
        .await?
        .unwrap_or_default();
    let updated = apply_rules(&existing, additions);
    store.set_role_permissions(guild_id, role.id, &updated).await?;
    info!(
        "Permissions of role {} in guild {} updated by {}: {}",
        role.id,
        guild_id,
        ctx.author().name,
        updated.encode()
    );

    reply(ctx, format!("Rules of **{}** are now:\n{}", role.name, format_rules(&updated))).await
}

/// Remove every rule of a domain from a role
#[poise::command(slash_command, prefix_command, guild_only)]
async fn remove(
    ctx: Context<'_>,
    #[description = "Role to edit"] role: serenity::Role,
    #[description = "Domain, e.g. sp.chat.quote"] domain: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let domain = domain.trim().trim_end_matches(".*").to_string();

    let store = &ctx.data().permissions;
    let Some(mut set) = store.find_role_permissions(guild_id, role.id).await? else {
        return reply(ctx, format!("**{}** has no permission rules.", role.name)).await;
    };
    let removed = set.remove_domain(&domain);
    if removed == 0 {
        return reply(ctx, format!("**{}** has no rule for `{}`.", role.name, domain)).await;
    }

    store.set_role_permissions(guild_id, role.id, &set).await?;
    info!(
        "Removed {} rules for '{}' from role {} in guild {} ({})",
        removed,
        domain,
        role.id,
        guild_id,
        ctx.author().name
    );
    reply(ctx, format!("Removed {} rule(s) for `{}` from **{}**.", removed, domain, role.name)).await
}

/// Explain whether a member may use a command domain
#[poise::command(slash_command, prefix_command, guild_only)]
async fn check(
    ctx: Context<'_>,
    #[description = "Member to check"] user: serenity::User,
    #[description = "Domain, e.g. sp.chat.quote"] domain: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let verdict = match ctx.data().resolver.resolve(guild_id, user.id, domain.trim()).await {
        Ok(verdict) => verdict,
        Err(e) if e.is_evaluation_failure() => {
            return reply(ctx, format!("Could not evaluate `{}` right now: {}", domain, e)).await;
        }
        Err(e) => return reply(ctx, e.to_string()).await,
    };

    let outcome = if verdict.allowed { "allowed" } else { "denied" };
    let reason = match (verdict.source, &verdict.matched_rule) {
        (VerdictSource::OwnerLevel { level, required }, _) => {
            format!("owner level {} meets the required {}", level, required)
        }
        (VerdictSource::GuildOverride, Some(rule)) => format!("server override `{}`", rule),
        (VerdictSource::RoleRule, Some(rule)) => format!("role rule `{}`", rule),
        (VerdictSource::PolicyDefault { level, required }, _) => {
            format!("no matching rule, level {} is below the required {}", level, required)
        }
        (_, None) => "no matching rule".to_string(),
    };
    reply(ctx, format!("**{}** is {} `{}`: {}", user.name, outcome, domain, reason)).await
}

/// Replace this server's custom-command overrides
#[poise::command(slash_command, prefix_command, guild_only)]
async fn overrides(
    ctx: Context<'_>,
    #[description = "Rules under sp.custom, or 'none' to clear"]
    #[rest]
    rules: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let input = if rules.trim().eq_ignore_ascii_case("none") { "" } else { rules.as_str() };
    let parsed = match parse_rules(input) {
        Ok(parsed) => parsed,
        Err(e) => return reply(ctx, format!("Invalid rule: {}", e)).await,
    };
    let policy = ctx.data().resolver.policy();
    if let Some(rule) = parsed.iter().find(|rule| !policy.is_custom_command(&rule.domain)) {
        return reply(
            ctx,
            format!("`{}` is not a custom command domain (must be under `{}`).", rule, CUSTOM_COMMAND_ROOT),
        )
        .await;
    }

    let set = PermissionSet::from_rules(parsed);
    ctx.data().permissions.set_guild_overrides(guild_id, &set).await?;
    info!("Custom command overrides of guild {} set by {}", guild_id, ctx.author().name);

    if set.is_empty() {
        reply(ctx, "Custom command overrides cleared.").await
    } else {
        reply(ctx, format!("Custom command overrides:\n{}", format_rules(&set))).await
    }
}
