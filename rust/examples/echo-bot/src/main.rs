//! A minimal bot that echoes messages starting with `!echo`.
//!
//! Reads the client key from `OLVID_CLIENT_KEY` (or a `.client_key` file)
//! and the daemon address from `DAEMON_HOSTNAME` / `DAEMON_PORT`.

use olvid::{Command, OlvidBot};
use tracing::{error, info};

#[tokio::main]
async fn main() -> olvid::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let bot = OlvidBot::connect("echo-bot").await?;
    info!(target = bot.server_target(), "echo bot connected");

    let client = bot.client().clone();
    bot.add_command(Command::new("^!echo ", move |message| {
        let client = client.clone();
        async move {
            let reply = message.body.trim_start_matches("!echo ").to_string();
            match client.message_send(message.discussion_id, &reply).await {
                Ok(_) => info!(discussion = message.discussion_id, "echoed"),
                Err(err) => error!(error = %err, "echo failed"),
            }
        }
    })?)?;

    // Runs until the process receives SIGTERM or SIGINT, which stops
    // every running client.
    bot.wait_for_listeners_end().await;
    info!("echo bot stopped");
    Ok(())
}
