pub mod score;
pub mod types;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use types::AnalysisResult;

/// User-applied redline decisions. Only grows until reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedlineOverlay {
    resolved_flags: BTreeSet<usize>,
    resolved_deviations: BTreeSet<usize>,
}

impl RedlineOverlay {
    /// Returns `false` if the flag was already resolved.
    pub fn insert_flag(&mut self, idx: usize) -> bool {
        self.resolved_flags.insert(idx)
    }

    /// Returns `false` if the deviation was already resolved.
    pub fn insert_deviation(&mut self, idx: usize) -> bool {
        self.resolved_deviations.insert(idx)
    }

    pub fn is_flag_resolved(&self, idx: usize) -> bool {
        self.resolved_flags.contains(&idx)
    }

    pub fn is_deviation_resolved(&self, idx: usize) -> bool {
        self.resolved_deviations.contains(&idx)
    }

    pub fn is_empty(&self) -> bool {
        self.resolved_flags.is_empty() && self.resolved_deviations.is_empty()
    }

    fn clear(&mut self) {
        self.resolved_flags.clear();
        self.resolved_deviations.clear();
    }
}

/// A single "apply redline" action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redline {
    Flag(usize),
    Deviation(usize),
}

impl Redline {
    /// Parse `f3` / `d0` shorthand used by the batch command.
    pub fn parse(token: &str) -> Option<Self> {
        let (kind, idx) = token.split_at_checked(1)?;
        let idx = idx.parse().ok()?;
        match kind {
            "f" | "F" => Some(Redline::Flag(idx)),
            "d" | "D" => Some(Redline::Deviation(idx)),
            _ => None,
        }
    }
}

/// Owns the current analysis and its redline overlay, and keeps the derived
/// risk score in step with both.
///
/// Every mutating call recomputes the score before returning, so a stale
/// score can never be read between a mutation and its recomputation.
pub struct RedlineBoard {
    analysis: Arc<AnalysisResult>,
    overlay: RedlineOverlay,
    score: u32,
}

impl RedlineBoard {
    pub fn new(analysis: Arc<AnalysisResult>) -> Self {
        let overlay = RedlineOverlay::default();
        let score = score::risk_score(&analysis, &overlay);
        info!(
            flags = analysis.risk_flags.len(),
            deviations = analysis.deviations.len(),
            score,
            "analysis loaded"
        );
        Self {
            analysis,
            overlay,
            score,
        }
    }

    pub fn analysis(&self) -> &Arc<AnalysisResult> {
        &self.analysis
    }

    pub fn overlay(&self) -> &RedlineOverlay {
        &self.overlay
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    /// Score the contract had before any redline was applied.
    pub fn baseline_score(&self) -> u32 {
        score::risk_score(&self.analysis, &RedlineOverlay::default())
    }

    /// Resolution state of each flag, in flag order.
    pub fn flag_resolution(&self) -> Vec<bool> {
        score::resolution(&self.analysis, &self.overlay)
    }

    /// Mark a flag's redline as applied. Idempotent. Returns the new score.
    pub fn apply_flag(&mut self, idx: usize) -> u32 {
        if self.stage(Redline::Flag(idx)) {
            self.recompute();
        }
        self.score
    }

    /// Mark a deviation's redline as applied. Idempotent. Returns the new score.
    pub fn apply_deviation(&mut self, idx: usize) -> u32 {
        if self.stage(Redline::Deviation(idx)) {
            self.recompute();
        }
        self.score
    }

    /// Apply several redlines as one action; the score is recomputed once,
    /// against the final overlay.
    pub fn apply_batch(&mut self, redlines: impl IntoIterator<Item = Redline>) -> u32 {
        let mut changed = false;
        for redline in redlines {
            changed |= self.stage(redline);
        }
        if changed {
            self.recompute();
        }
        self.score
    }

    /// Drop every applied redline.
    pub fn reset(&mut self) -> u32 {
        self.overlay.clear();
        self.recompute();
        self.score
    }

    /// Swap in a newly analyzed contract. The overlay belongs to the old
    /// result, so it is cleared.
    pub fn replace_analysis(&mut self, analysis: Arc<AnalysisResult>) -> u32 {
        self.analysis = analysis;
        self.reset()
    }

    // Insert without recomputing. Callers recompute before returning.
    fn stage(&mut self, redline: Redline) -> bool {
        match redline {
            Redline::Flag(idx) if idx < self.analysis.risk_flags.len() => {
                self.overlay.insert_flag(idx)
            }
            Redline::Deviation(idx) if idx < self.analysis.deviations.len() => {
                self.overlay.insert_deviation(idx)
            }
            other => {
                warn!(?other, "redline index out of range, ignoring");
                false
            }
        }
    }

    fn recompute(&mut self) {
        let previous = self.score;
        self.score = score::risk_score(&self.analysis, &self.overlay);
        debug!(previous, score = self.score, "risk score recomputed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{Deviation, RiskFlag, RiskLevel};

    fn board() -> RedlineBoard {
        let flag = |level, id: &str| RiskFlag {
            index: 0,
            law: String::new(),
            section: String::new(),
            title: id.to_string(),
            risk_level: level,
            clause_id: Some(id.to_string()),
            text: String::new(),
            explanation: String::new(),
            redline_suggestion: Some("Reduce restriction to 12 months".to_string()),
        };
        let analysis = AnalysisResult {
            risk_flags: vec![
                flag(RiskLevel::High, "c-1"),
                flag(RiskLevel::Medium, "c-2"),
                flag(RiskLevel::Low, "c-3"),
            ],
            deviations: vec![Deviation {
                index: 0,
                category: "Non-Compete Duration".to_string(),
                severity: "High".to_string(),
                actual: "60 months".to_string(),
                fair_baseline: "12 months max".to_string(),
                recommendation: None,
                redline_suggestion: None,
                clause_reference: Some("c-1".to_string()),
            }],
            ..Default::default()
        };
        RedlineBoard::new(Arc::new(analysis.normalized()))
    }

    #[test]
    fn test_apply_flag_recomputes_immediately() {
        let mut board = board();
        assert_eq!(board.score(), 38);
        assert_eq!(board.apply_flag(0), 13);
        assert_eq!(board.score(), 13);
        assert!(board.overlay().is_flag_resolved(0));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut board = board();
        board.apply_flag(1);
        let overlay = board.overlay().clone();
        assert_eq!(board.apply_flag(1), 28);
        assert_eq!(board.overlay(), &overlay);
    }

    #[test]
    fn test_deviation_resolves_linked_flag() {
        let mut board = board();
        assert_eq!(board.apply_deviation(0), 13);
        assert_eq!(board.flag_resolution(), vec![true, false, false]);
        // Already covered through the deviation.
        assert_eq!(board.apply_flag(0), 13);
    }

    #[test]
    fn test_batch_applies_all() {
        let mut board = board();
        let score = board.apply_batch([Redline::Flag(1), Redline::Deviation(0), Redline::Flag(2)]);
        assert_eq!(score, 0);
        assert_eq!(board.baseline_score(), 38);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut board = board();
        assert_eq!(board.apply_flag(9), 38);
        assert_eq!(board.apply_deviation(4), 38);
        assert!(board.overlay().is_empty());
    }

    #[test]
    fn test_reset_clears_overlay() {
        let mut board = board();
        board.apply_batch([Redline::Flag(0), Redline::Flag(1)]);
        assert_eq!(board.reset(), 38);
        assert!(board.overlay().is_empty());
    }

    #[test]
    fn test_replace_analysis_resets_overlay() {
        let mut board = board();
        board.apply_flag(0);
        let score = board.replace_analysis(Arc::new(AnalysisResult::default()));
        assert_eq!(score, 0);
        assert!(board.overlay().is_empty());
    }

    #[test]
    fn test_parse_redline_shorthand() {
        assert_eq!(Redline::parse("f3"), Some(Redline::Flag(3)));
        assert_eq!(Redline::parse("D0"), Some(Redline::Deviation(0)));
        assert_eq!(Redline::parse("x1"), None);
        assert_eq!(Redline::parse("f"), None);
        assert_eq!(Redline::parse(""), None);
    }
}
