use anyhow::Result;
use tokio::io::AsyncWrite;
use tracing::info;

use super::Console;
use crate::chat::notices::SUGGESTED_QUESTIONS;
use crate::chat::ChatMode;
use crate::state::AppState;

/// Show or change the answer style.
pub async fn mode<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
    requested: Option<&str>,
) -> Result<()> {
    let Some(requested) = requested else {
        let current = state.settings.read().await.mode;
        return console
            .say(format!(
                "Mode: {}. Choose one of Professional, ELI5, Negotiator.",
                current
            ))
            .await;
    };

    match requested.parse::<ChatMode>() {
        Ok(mode) => {
            state.settings.write().await.mode = mode;
            info!(%mode, "chat mode changed");
            console.say(format!("Mode set to {}.", mode)).await
        }
        Err(e) => console.say(format!("{:#}", e)).await,
    }
}

/// Current settings and session status.
pub async fn config<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
) -> Result<()> {
    let mode = state.settings.read().await.mode;
    let view = state.pulse.view();
    let contract = match state.board().as_ref() {
        Some(board) => format!(
            "{} flags, {} deviations, score {}",
            board.analysis().risk_flags.len(),
            board.analysis().deviations.len(),
            board.score()
        ),
        None => "none uploaded".to_string(),
    };

    let mut output = format!(
        "Settings\n  mode: {}\n  backend: {}\n  contract: {}\n  live feed: {}\n",
        mode,
        state.api.base_url(),
        contract,
        if view.connected { "connected" } else { "offline" }
    );
    output.push_str("Try asking\n");
    for (label, query) in SUGGESTED_QUESTIONS {
        output.push_str(&format!("  {}: {}\n", label, query));
    }
    console.say(output).await
}
