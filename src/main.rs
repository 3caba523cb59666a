mod analysis;
mod api;
mod chat;
mod commands;
mod error;
mod pulse;
mod state;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, Level};

use api::ApiClient;
use commands::{Command, Console, Flow};
use pulse::PulseConfig;
use state::{AppState, ChatSettings};
use storage::LocalStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load env
    let _ = dotenv::dotenv();

    let level = dotenv::var("LOG_LEVEL")
        .ok()
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    // Init storage
    let data_dir = PathBuf::from(dotenv::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()));
    let store = Arc::new(LocalStore::new(&data_dir)?);
    info!("Local store initialized at {:?}", data_dir);

    // Init API client
    let api = Arc::new(ApiClient::from_env()?);
    info!(backend = api.base_url(), "API client initialized");

    let state = AppState::new(
        api,
        store,
        PulseConfig::from_env(),
        ChatSettings::from_env(),
    );
    let printer = commands::spawn_printer(state.chat.subscribe(), tokio::io::stdout());

    let mut console = Console::new(tokio::io::stdout());
    console
        .say("Contract desk ready. Type a question, or /help for commands.")
        .await?;
    if let Some(last) = state.chat.snapshot().messages.last() {
        console.say(&last.content).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        // EOF
        let Some(line) = line else { break };

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(usage) => {
                console.say(usage).await?;
                continue;
            }
        };

        match commands::dispatch(&state, &mut console, command).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => {
                error!("Command failed: {:#}", e);
                console.say(format!("Error: {:#}", e)).await?;
            }
        }
    }

    state.dispose().await;
    if let Err(e) = printer.await {
        error!("Chat printer panicked: {}", e);
    }
    Ok(())
}
