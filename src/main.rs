use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info, warn};

use warden::commands::{self, help, karma, perms, ping, prefix};
use warden::config::{BotConfig, PermissionsConfig};
use warden::permissions::{CommandPermissionPolicy, PermissionResolver, SerenityHierarchy};
use warden::store::{PermissionStore, SettingsStore, SqliteBackend, Store};
use warden::{logging, Data};

/// Discord bot with role-hierarchy command permissions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database URL, overrides DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    /// Permissions config file, overrides PERMISSIONS_PATH
    #[arg(long)]
    permissions_config: Option<String>,

    /// Register commands per-guild instead of globally (faster for testing)
    #[arg(long)]
    guild_commands: bool,

    /// Specific guild ID to register commands to (for testing)
    #[arg(long)]
    guild_id: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    logging::init(logging::level_from(std::env::var("LOG_LEVEL").ok().as_deref()));

    let mut config = BotConfig::from_env()?;
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if let Some(path) = args.permissions_config {
        config.permissions_path = path;
    }

    info!("Loading permissions configuration from {}...", config.permissions_path);
    let permissions_config = PermissionsConfig::load_or_default(&config.permissions_path)?;
    let policy = Arc::new(CommandPermissionPolicy::from_config(&permissions_config)?);

    let backend = Arc::new(SqliteBackend::connect(&config.database_url).await?);
    let store = Store::new(backend.clone());
    info!("Using {} store at {}", store.backend_name(), config.database_url);
    let permission_store = PermissionStore::new(store.clone());
    let settings = SettingsStore::new(store);

    let guild_commands = args.guild_commands;
    let target_guild_id = args.guild_id.filter(|id| *id != 0).map(serenity::GuildId::new);
    if guild_commands {
        info!("--guild-commands: Will register commands per-guild (faster for testing)");
    } else {
        info!("Registering commands globally by default (takes up to 1 hour to propagate)");
    }
    if let Some(gid) = target_guild_id {
        info!("--guild-id: Targeting specific guild {}", gid);
    }

    let owner_id = config.owner_id;
    let resolve_timeout = config.resolve_timeout;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![ping(), help(), prefix(), perms(), karma()],
            prefix_options: poise::PrefixFrameworkOptions {
                dynamic_prefix: Some(|ctx| Box::pin(commands::dynamic_prefix(ctx))),
                ..Default::default()
            },
            command_check: Some(|ctx| Box::pin(commands::gate(ctx))),
            pre_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' invoked by {} (ID: {}) in {}",
                        ctx.command().qualified_name,
                        ctx.author().name,
                        ctx.author().id,
                        ctx.guild_id().map(|g| g.to_string()).unwrap_or_else(|| "DM".to_string())
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' completed for {}",
                        ctx.command().qualified_name,
                        ctx.author().name
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!("Error in command '{}': {}", ctx.command().qualified_name, error);
                            let _ = ctx.say(format!("An error occurred: {}", error)).await;
                        }
                        poise::FrameworkError::CommandCheckFailed { error, ctx, .. } => {
                            if let Some(error) = error {
                                error!("Permission check for '{}' failed: {}", ctx.command().qualified_name, error);
                            }
                            let _ = ctx
                                .send(poise::CreateReply::default()
                                    .content("You are not permitted to use this command.")
                                    .ephemeral(true))
                                .await;
                        }
                        poise::FrameworkError::ArgumentParse { error, input, ctx, .. } => {
                            error!("Argument parse error in '{}': {} (input: {:?})", ctx.command().qualified_name, error, input);
                            let _ = ctx.say(format!("Invalid arguments: {}", error)).await;
                        }
                        poise::FrameworkError::GuildOnly { ctx, .. } => {
                            error!("Command '{}' is guild-only, used in DM by {}", ctx.command().qualified_name, ctx.author().name);
                        }
                        other => {
                            error!("Other framework error: {}", other);
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot logged in as: {}", ready.user.name);

                let guilds_to_register: Vec<serenity::GuildId> = match target_guild_id {
                    Some(gid) => vec![gid],
                    None => ready.guilds.iter().map(|g| g.id).collect(),
                };

                if guild_commands {
                    for guild_id in &guilds_to_register {
                        info!("Registering commands to guild: {}", guild_id);
                        if let Err(e) = poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            *guild_id,
                        ).await {
                            error!("Failed to register commands for guild {}: {}", guild_id, e);
                        } else {
                            info!("Successfully registered {} commands for guild {}",
                                  framework.options().commands.len(), guild_id);
                        }
                    }
                } else {
                    info!("Registering commands globally...");
                    if let Err(e) = poise::builtins::register_globally(
                        ctx,
                        &framework.options().commands,
                    ).await {
                        error!("Failed to register commands globally: {}", e);
                    } else {
                        info!("Successfully registered {} commands globally (may take up to 1 hour to propagate)",
                              framework.options().commands.len());
                    }
                }

                if owner_id.is_none() {
                    warn!("OWNER_ID is not set - no member gets the bot owner level");
                }

                let hierarchy = Arc::new(SerenityHierarchy::new(ctx.http.clone()));
                let resolver = PermissionResolver::new(permission_store.clone(), hierarchy, policy)
                    .with_bot_owner(owner_id)
                    .with_timeout(resolve_timeout);

                Ok(Data {
                    resolver,
                    permissions: permission_store,
                    settings,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let mut client = serenity::ClientBuilder::new(&config.token, intents)
        .framework(framework)
        .await?;

    info!("Starting bot...");
    let result = client.start().await;
    backend.close().await;
    if let Err(e) = result {
        error!("Client error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
