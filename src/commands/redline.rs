use anyhow::Result;
use tokio::io::AsyncWrite;
use tracing::info;

use super::Console;
use crate::analysis::{Redline, RedlineBoard};
use crate::analysis::types::RiskFlag;
use crate::state::AppState;

const NO_CONTRACT: &str = "No contract loaded. Use /upload <path> first.";

pub async fn score<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
) -> Result<()> {
    let text = state.board().as_ref().map(render_score);
    console.say(text.as_deref().unwrap_or(NO_CONTRACT)).await
}

/// Flags and deviations with their redline state.
pub async fn flags<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
) -> Result<()> {
    let text = state.board().as_ref().map(render_flags);
    console.say(text.as_deref().unwrap_or(NO_CONTRACT)).await
}

/// Apply one or more redlines as a single action.
pub async fn apply<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
    redlines: Vec<Redline>,
) -> Result<()> {
    let text = {
        let mut board = state.board();
        match board.as_mut() {
            Some(board) => {
                let before = board.score();
                let after = board.apply_batch(redlines.iter().copied());
                info!(redlines = redlines.len(), before, after, "redlines applied");
                Some(format!("Risk score {} -> {}", before, after))
            }
            None => None,
        }
    };
    console.say(text.as_deref().unwrap_or(NO_CONTRACT)).await
}

/// Ask the backend to explain flag `index` in plain language.
pub async fn explain<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
    index: usize,
) -> Result<()> {
    let Some(flag) = flag_at(state, console, index).await? else {
        return Ok(());
    };
    let reason = format!("{} ({} {})", flag.title, flag.law, flag.section);

    match state.api.explain_clause(&flag.text, &reason).await {
        Ok(explained) => {
            let highlighted = if explained.highlights_html.is_empty() {
                flag.text.clone()
            } else {
                html2text::from_read(explained.highlights_html.as_bytes(), 100)
                    .unwrap_or_else(|_| flag.text.clone())
            };
            console
                .say(format!(
                    "{}\n\n{}\n\n{}",
                    flag.title,
                    explained.explanation.trim(),
                    highlighted.trim_end()
                ))
                .await
        }
        Err(e) => console.say(e.notice()).await,
    }
}

/// Map flag `index` to the statute that governs it.
pub async fn map<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
    index: usize,
) -> Result<()> {
    let Some(flag) = flag_at(state, console, index).await? else {
        return Ok(());
    };

    match state.api.map_statute(&flag.text).await {
        Ok(mapping) => {
            console
                .say(format!(
                    "{} {}: {} (confidence {:.0}%)\n{}",
                    mapping.act,
                    mapping.section,
                    mapping.title,
                    mapping.confidence * 100.0,
                    mapping.reasoning
                ))
                .await
        }
        Err(e) => console.say(e.notice()).await,
    }
}

// Clone the flag out so no lock is held across the request.
async fn flag_at<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
    index: usize,
) -> Result<Option<RiskFlag>> {
    let lookup = state
        .board()
        .as_ref()
        .map(|board| board.analysis().risk_flags.get(index).cloned());
    match lookup {
        None => {
            console.say(NO_CONTRACT).await?;
            Ok(None)
        }
        Some(None) => {
            console.say(format!("No flag {}. See /flags.", index)).await?;
            Ok(None)
        }
        Some(Some(flag)) => Ok(Some(flag)),
    }
}

fn render_score(board: &RedlineBoard) -> String {
    let resolved = board.flag_resolution().iter().filter(|r| **r).count();
    format!(
        "Risk score: {}/100 (was {} before redlines, {} of {} flags resolved)",
        board.score(),
        board.baseline_score(),
        resolved,
        board.analysis().risk_flags.len()
    )
}

fn render_flags(board: &RedlineBoard) -> String {
    let analysis = board.analysis();
    let resolution = board.flag_resolution();
    let mut output = format!("{}\n\nRisk flags\n", render_score(board));

    if analysis.risk_flags.is_empty() {
        output.push_str("  none\n");
    }
    for (flag, resolved) in analysis.risk_flags.iter().zip(&resolution) {
        output.push_str(&format!(
            "  {} f{} [{:?}] {} ({} {})\n",
            if *resolved { "✓" } else { " " },
            flag.index,
            flag.risk_level,
            flag.title,
            flag.law,
            flag.section
        ));
        if let Some(suggestion) = &flag.redline_suggestion {
            output.push_str(&format!("       redline: {}\n", suggestion));
        }
    }

    if !analysis.deviations.is_empty() {
        output.push_str("\nDeviations from market standard\n");
        for deviation in &analysis.deviations {
            let applied = board.overlay().is_deviation_resolved(deviation.index);
            output.push_str(&format!(
                "  {} d{} [{}] {}: {} (fair: {})\n",
                if applied { "✓" } else { " " },
                deviation.index,
                deviation.severity,
                deviation.category,
                deviation.actual,
                deviation.fair_baseline
            ));
        }
    }

    let structure = &analysis.structure_analysis;
    if !structure.missing_clauses.is_empty() {
        output.push_str(&format!(
            "\nStructure {}% complete. Missing: {}\n",
            structure.completeness_score,
            structure
                .missing_clauses
                .iter()
                .map(|c| c.title.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    output
}
