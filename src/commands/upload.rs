use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncWrite;
use tracing::{info, warn};

use super::Console;
use crate::state::AppState;

/// Send a contract for analysis and make it the current one.
pub async fn upload<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
    path: &str,
) -> Result<()> {
    let path = Path::new(path);
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return console
                .say(format!("Can't read {}: {}", path.display(), e))
                .await
        }
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "contract.pdf".to_string());

    console
        .say(format!("Analyzing {} ({} KB)...", file_name, bytes.len() / 1024))
        .await?;

    let analysis = match state.api.upload(&file_name, bytes).await {
        Ok(analysis) => analysis,
        Err(e) => {
            warn!(file = %file_name, "Upload failed: {}", e);
            return console.say(e.notice()).await;
        }
    };

    let flags = analysis.risk_flags.len();
    let deviations = analysis.deviations.len();
    let completeness = analysis.structure_analysis.completeness_score;
    let score = state
        .accept_analysis(analysis)
        .context("Failed to store analysis")?;
    info!(file = %file_name, flags, deviations, score, "contract analyzed");

    console
        .say(format!(
            "Analyzed {}: {} risk flags, {} deviations, structure {}% complete.\n\
             Risk score: {}/100. Use /flags to review and /redline to fix.",
            file_name, flags, deviations, completeness, score
        ))
        .await
}

/// Download the PDF report for the current analysis.
pub async fn report<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
) -> Result<()> {
    let analysis = state
        .board()
        .as_ref()
        .map(|board| board.analysis().clone());
    let Some(analysis) = analysis else {
        return console
            .say("No contract loaded. Use /upload <path> first.")
            .await;
    };

    match state.api.download_report(&analysis).await {
        Ok(pdf) => {
            let path = state.store.save_report(&pdf)?;
            info!(path = %path.display(), "report saved");
            console
                .say(format!("Report saved to {}", path.display()))
                .await
        }
        Err(e) => console.say(e.notice()).await,
    }
}

/// Drop the contract on the server and locally.
pub async fn purge<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
) -> Result<()> {
    match state.api.purge().await {
        Ok(receipt) => {
            state.forget_analysis()?;
            info!(status = %receipt.status, "session purged");
            let message = if receipt.message.is_empty() {
                "Session data cleared.".to_string()
            } else {
                format!("{}.", receipt.message.trim_end_matches('.'))
            };
            console.say(message).await
        }
        Err(e) => console.say(e.notice()).await,
    }
}
