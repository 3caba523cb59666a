use serde::{Deserialize, Deserializer, Serialize};

/// Severity attached to a risk flag. Anything the service sends that is not
/// `High` or `Medium` (including a missing value) is treated as `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RiskLevel {
    High,
    Medium,
    #[default]
    #[serde(other)]
    Low,
}

impl RiskLevel {
    /// Score contribution of an unresolved flag at this level.
    pub fn weight(self) -> u32 {
        match self {
            RiskLevel::High => 25,
            RiskLevel::Medium => 10,
            RiskLevel::Low => 3,
        }
    }
}

// `null` shows up for flags the analyzer could not grade.
fn lenient_level<'de, D>(deserializer: D) -> Result<RiskLevel, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RiskLevel>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFlag {
    /// Position in the owning result's flag sequence.
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub law: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_level")]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub clause_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub redline_suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deviation {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub actual: String,
    #[serde(default)]
    pub fair_baseline: String,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub redline_suggestion: Option<String>,
    /// `clause_id` of the flag this deviation can resolve, if any.
    #[serde(default)]
    pub clause_reference: Option<String>,
}

/// Key terms pulled out of the contract text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractSummary {
    #[serde(default)]
    pub fees: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub termination_notice: Option<String>,
    #[serde(default)]
    pub governing_law: Option<String>,
    #[serde(default)]
    pub ip_ownership: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClauseInfo {
    pub title: String,
    #[serde(default)]
    pub eli5: String,
}

/// Structural completeness check against the standard clause checklist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureAnalysis {
    #[serde(default)]
    pub completeness_score: u32,
    #[serde(default)]
    pub present_clauses: Vec<ClauseInfo>,
    #[serde(default)]
    pub missing_clauses: Vec<ClauseInfo>,
}

/// One analyzed contract as returned by the upload endpoint.
///
/// Immutable once accepted; share it behind an `Arc`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub risk_flags: Vec<RiskFlag>,
    #[serde(default)]
    pub deviations: Vec<Deviation>,
    #[serde(default)]
    pub summary: ContractSummary,
    #[serde(default)]
    pub structure_analysis: StructureAnalysis,
    #[serde(default)]
    pub jurisdiction_warnings: serde_json::Value,
    #[serde(default)]
    pub pii_tokenized: bool,
    #[serde(default)]
    pub token_count: usize,
    #[serde(default)]
    pub holistic_narrative: Option<String>,
}

impl AnalysisResult {
    /// Assign positional indices to flags and deviations. The upload endpoint
    /// does not always send them, and the overlay is keyed by position.
    pub fn normalized(mut self) -> Self {
        for (i, flag) in self.risk_flags.iter_mut().enumerate() {
            flag.index = i;
        }
        for (i, dev) in self.deviations.iter_mut().enumerate() {
            dev.index = i;
        }
        self
    }

    /// Text handed to the assistant as background for streamed questions.
    pub fn context_summary(&self) -> String {
        if let Some(narrative) = self.holistic_narrative.as_deref() {
            if !narrative.trim().is_empty() {
                return narrative.to_string();
            }
        }

        let mut lines = Vec::new();
        let terms = [
            ("Fees", &self.summary.fees),
            ("Duration", &self.summary.duration),
            ("Termination notice", &self.summary.termination_notice),
            ("Governing law", &self.summary.governing_law),
            ("IP ownership", &self.summary.ip_ownership),
        ];
        for (label, value) in terms {
            if let Some(v) = value {
                lines.push(format!("{}: {}", label, v));
            }
        }
        for flag in &self.risk_flags {
            lines.push(format!(
                "[{:?}] {} ({} {})",
                flag.risk_level, flag.title, flag.law, flag.section
            ));
        }
        lines.join("\n")
    }
}
