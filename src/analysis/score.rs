use std::collections::HashSet;

use super::types::{AnalysisResult, RiskFlag};
use super::RedlineOverlay;

/// Upper bound of the risk score.
pub const MAX_SCORE: u32 = 100;

/// Clause ids whose risk has been cleared through an applied deviation redline.
fn redlined_clauses<'a>(analysis: &'a AnalysisResult, overlay: &RedlineOverlay) -> HashSet<&'a str> {
    analysis
        .deviations
        .iter()
        .filter(|d| overlay.is_deviation_resolved(d.index))
        .filter_map(|d| d.clause_reference.as_deref())
        .collect()
}

fn flag_resolved(
    position: usize,
    flag: &RiskFlag,
    overlay: &RedlineOverlay,
    redlined: &HashSet<&str>,
) -> bool {
    overlay.is_flag_resolved(position)
        || flag
            .clause_id
            .as_deref()
            .is_some_and(|id| redlined.contains(id))
}

/// Per-flag resolution, in flag order.
pub fn resolution(analysis: &AnalysisResult, overlay: &RedlineOverlay) -> Vec<bool> {
    let redlined = redlined_clauses(analysis, overlay);
    analysis
        .risk_flags
        .iter()
        .enumerate()
        .map(|(i, flag)| flag_resolved(i, flag, overlay, &redlined))
        .collect()
}

/// Risk score for `analysis` with `overlay` applied.
///
/// Unresolved flags contribute their level's weight; the sum is capped at
/// [`MAX_SCORE`]. Deviations carry no weight of their own.
pub fn risk_score(analysis: &AnalysisResult, overlay: &RedlineOverlay) -> u32 {
    unresolved_weight(analysis, overlay).min(MAX_SCORE)
}

// Saturates instead of overflowing on pathological flag counts.
fn unresolved_weight(analysis: &AnalysisResult, overlay: &RedlineOverlay) -> u32 {
    let redlined = redlined_clauses(analysis, overlay);
    analysis
        .risk_flags
        .iter()
        .enumerate()
        .filter(|(i, flag)| !flag_resolved(*i, flag, overlay, &redlined))
        .map(|(_, flag)| flag.risk_level.weight())
        .fold(0, u32::saturating_add)
}
