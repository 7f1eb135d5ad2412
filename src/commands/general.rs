use futures::future::join_all;
use poise::serenity_prelude as serenity;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::command_domain;
use crate::store::Scope;
use crate::{Context, Error};

/// Gateway heartbeat and one store round trip
#[poise::command(prefix_command, slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    let gateway = ctx.ping().await;

    let started = Instant::now();
    let store = ctx.data().settings.list(Scope::Global).await;
    let store_latency = match store {
        Ok(_) => Some(started.elapsed()),
        Err(e) => {
            warn!("Store round trip failed during ping: {}", e);
            None
        }
    };
    info!("Ping by {}: gateway {:?}, store {:?}", ctx.author().name, gateway, store_latency);

    ctx.send(poise::CreateReply::default()
        .content(format_ping(gateway, store_latency))
        .ephemeral(true))
        .await?;
    Ok(())
}

fn format_ping(gateway: Duration, store: Option<Duration>) -> String {
    let gateway = if gateway.is_zero() {
        "not measured yet".to_string()
    } else {
        format!("{}ms", gateway.as_millis())
    };
    let store = match store {
        Some(latency) => format!("{}ms", latency.as_millis()),
        None => "unreachable".to_string(),
    };
    format!("Pong! Gateway: {}, store: {}", gateway, store)
}

/// Commands with their permission domains, and whether you may use them here
#[poise::command(prefix_command, slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let mut entries = Vec::new();
    for command in &ctx.framework().options().commands {
        if command.subcommands.is_empty() {
            entries.push((command.qualified_name.clone(), command.description.clone()));
        }
        for sub in &command.subcommands {
            entries.push((sub.qualified_name.clone(), sub.description.clone()));
        }
    }

    // One resolution per distinct domain
    let mut access: BTreeMap<&'static str, Option<bool>> = entries
        .iter()
        .filter_map(|(name, _)| command_domain(name))
        .map(|domain| (domain, None))
        .collect();
    if let Some(guild_id) = ctx.guild_id() {
        let resolver = &ctx.data().resolver;
        let domains: Vec<&'static str> = access.keys().copied().collect();
        let verdicts = join_all(
            domains
                .iter()
                .map(|domain| resolver.check(guild_id, ctx.author().id, domain)),
        )
        .await;
        for (domain, allowed) in domains.into_iter().zip(verdicts) {
            access.insert(domain, Some(allowed));
        }
    }

    let lines: Vec<String> = entries
        .iter()
        .map(|(name, description)| {
            let domain = command_domain(name);
            let allowed = domain.and_then(|domain| access.get(domain).copied().flatten());
            help_line(name, description.as_deref(), domain, allowed)
        })
        .collect();

    let footer = if ctx.guild_id().is_some() {
        "✅ allowed here, ⛔ denied here. Access comes from role rules on these domains."
    } else {
        "Run this in a server to see which commands you may use there."
    };
    let embed = serenity::CreateEmbed::new()
        .title("Commands and permission domains")
        .description(lines.join("\n"))
        .footer(serenity::CreateEmbedFooter::new(footer))
        .color(0x3498db);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}

fn help_line(name: &str, description: Option<&str>, domain: Option<&str>, allowed: Option<bool>) -> String {
    let mark = match allowed {
        Some(true) => "✅ ",
        Some(false) => "⛔ ",
        None => "",
    };
    let domain = domain.map(|d| format!(" `{}`", d)).unwrap_or_default();
    match description {
        Some(description) => format!("{}**/{}**{}: {}", mark, name, domain, description),
        None => format!("{}**/{}**{}", mark, name, domain),
    }
}
