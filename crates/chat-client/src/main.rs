//! Bot entry point
//!
//! Run with:
//! ```bash
//! cargo run -p chat-client --bin chat-bot
//! ```
//!
//! Credentials come from `BOT_APP_ID`, `BOT_TOKEN` and `BOT_TOKEN_KIND`;
//! everything else from the `BOT_*` configuration variables.

use anyhow::Context;
use chat_client::{BotClient, BotEvent, EntityEvent};
use chat_common::{try_init_tracing_with_config, ClientConfig, Credentials, TracingConfig};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    if let Err(e) = run().await {
        error!(error = %e, "Bot failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ClientConfig::from_env().context("Failed to load configuration")?;
    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }
    let credentials = Credentials::from_env().context("Failed to load credentials")?;

    info!(
        env = ?config.app.env,
        app_id = %credentials.app_id,
        startup_mode = ?config.cache.startup_mode,
        "Configuration loaded"
    );

    let client = BotClient::new(config);
    client.on(|event| async move { log_event(&event) });

    client
        .login(credentials.app_id, credentials.kind, credentials.token)
        .await
        .context("Login failed")?;
    client.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    client.logout().await?;
    Ok(())
}

fn log_event(event: &BotEvent) {
    match event {
        BotEvent::Ready => info!("Bot ready"),
        BotEvent::ShardReady { shard_id } => info!(shard_id, "Shard ready"),
        BotEvent::ShardResumed { shard_id } => info!(shard_id, "Shard resumed"),
        BotEvent::Reconnecting { shard_id, reason } => {
            warn!(shard_id, reason = %reason, "Shard reconnecting");
        }
        BotEvent::Disconnected { shard_id, error } => match error {
            Some(err) => error!(shard_id, error = %err, "Shard stopped"),
            None => info!(shard_id, "Shard disconnected"),
        },
        BotEvent::LatencyUpdated { shard_id, latency } => {
            tracing::debug!(
                shard_id,
                latency_ms = latency.as_millis() as u64,
                "Heartbeat acknowledged"
            );
        }
        BotEvent::RateLimited(notice) => warn!(
            bucket = %notice.bucket,
            retry_after_ms = notice.retry_after.as_millis() as u64,
            global = notice.global,
            "Rate limited"
        ),
        BotEvent::Entity(EntityEvent::MessageReceived { message, .. }) => info!(
            message_id = %message.id,
            channel_id = %message.channel_id,
            content = %message.content,
            "Message"
        ),
        BotEvent::Entity(EntityEvent::GuildAvailable(guild)) => {
            info!(guild_id = %guild.id, name = %guild.name, "Guild available");
        }
        BotEvent::Entity(other) => tracing::debug!(event = ?other, "Entity event"),
    }
}
