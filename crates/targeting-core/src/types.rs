use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel for "no constraint" on a numeric bound.
pub const UNCONSTRAINED: f64 = -1.0;

/// Normalized filter criteria produced by the criteria resolver.
///
/// Numeric bounds use [`UNCONSTRAINED`] to mean "no constraint"; an empty
/// `industries` list means any industry, not none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub min_revenue: f64,
    pub min_ebitda_margin: f64,
    pub min_growth: f64,
    pub industries: Vec<String>,
    pub custom_sql_conditions: Vec<String>,
    pub max_results: usize,
    pub description: String,
}

impl FilterCriteria {
    pub fn unconstrained() -> Self {
        Self {
            min_revenue: UNCONSTRAINED,
            min_ebitda_margin: UNCONSTRAINED,
            min_growth: UNCONSTRAINED,
            industries: Vec::new(),
            custom_sql_conditions: Vec::new(),
            max_results: 100,
            description: String::new(),
        }
    }

    pub fn has_revenue_bound(&self) -> bool {
        self.min_revenue >= 0.0 && self.min_revenue.is_finite()
    }

    pub fn has_margin_bound(&self) -> bool {
        self.min_ebitda_margin >= 0.0 && self.min_ebitda_margin.is_finite()
    }

    pub fn has_growth_bound(&self) -> bool {
        self.min_growth >= 0.0 && self.min_growth.is_finite()
    }
}

/// Company master data plus key financial aggregates.
///
/// Read-only: sourced from the external store, never mutated by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub org_number: String,
    pub name: String,
    pub industry_code: Option<String>,
    pub revenue: Option<f64>,
    pub ebitda_margin: Option<f64>,
    pub net_margin: Option<f64>,
    pub revenue_cagr_3y: Option<f64>,
    pub employees: Option<i64>,
}

/// Weights for the composite ranking signals.
///
/// Weights are relative; the ranking engine normalizes them to sum to 1
/// before combining components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub revenue: f64,
    pub ebit_margin: f64,
    pub growth: f64,
    pub leverage: f64,
    pub headcount: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            revenue: 30.0,
            ebit_margin: 25.0,
            growth: 25.0,
            leverage: 10.0,
            headcount: 10.0,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.revenue + self.ebit_margin + self.growth + self.leverage + self.headcount
    }

    /// Scale so the weights sum to 1. A zero (or non-finite) sum is treated
    /// as a total of 1, leaving the weights untouched.
    pub fn normalized(&self) -> Self {
        let total = self.sum();
        let divisor = if total > 0.0 && total.is_finite() {
            total
        } else {
            1.0
        };
        Self {
            revenue: self.revenue / divisor,
            ebit_margin: self.ebit_margin / divisor,
            growth: self.growth / divisor,
            leverage: self.leverage / divisor,
            headcount: self.headcount / divisor,
        }
    }
}

/// Per-company normalized signal components, each in [0, 1].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositeScore {
    pub revenue: f64,
    pub growth: f64,
    pub margin: f64,
    /// Net-margin signal, weighted by the `leverage` weight.
    pub stability: f64,
    /// Revenue per employee, weighted by the `headcount` weight.
    pub efficiency: f64,
    /// Weighted sum over normalized weights, in [0, 1].
    pub total: f64,
}

/// One ranked entry of a Stage-1 shortlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlistEntry {
    pub org_number: String,
    pub name: String,
    pub revenue: Option<f64>,
    pub ebitda_margin: Option<f64>,
    pub revenue_cagr_3y: Option<f64>,
    pub employees: Option<i64>,
    pub score: CompositeScore,
}

/// Persisted Stage-1 output: ranked, size-capped, immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shortlist {
    pub name: String,
    pub description: String,
    pub weights: ScoringWeights,
    pub stage_one_size: usize,
    pub companies: Vec<ShortlistEntry>,
    /// Candidate-set size before truncation.
    pub total_companies: usize,
    pub status: String,
    pub generated_at: DateTime<Utc>,
}

/// Deterministic strategy-fit evaluation for a single company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategicFitResult {
    /// Overall fit, integer in [1, 10].
    pub score: i64,
    /// Moat/defensibility, integer in [1, 10].
    pub defensibility: i64,
    pub risk_flags: Vec<String>,
    pub upside_potential: String,
    pub rationale: String,
    pub matched_strategy: String,
}

/// Coarse screening risk flag (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskFlag {
    Low,
    Medium,
    High,
}

impl RiskFlag {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskFlag::Low),
            "medium" => Some(RiskFlag::Medium),
            "high" => Some(RiskFlag::High),
            _ => None,
        }
    }

    pub fn to_label(&self) -> &'static str {
        match self {
            RiskFlag::Low => "Low",
            RiskFlag::Medium => "Medium",
            RiskFlag::High => "High",
        }
    }
}

/// Stage-2 output for one company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub run_id: String,
    pub org_number: String,
    pub company_name: String,
    pub score: f64,
    pub risk: RiskFlag,
    pub summary: String,
    /// Opaque model payload kept for audit.
    pub raw_response: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

/// Letter grade reported by the model service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            "F" => Some(Grade::F),
            _ => None,
        }
    }

    pub fn to_label(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Pursue,
    Monitor,
    Decline,
}

impl Recommendation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pursue" => Some(Recommendation::Pursue),
            "monitor" => Some(Recommendation::Monitor),
            "decline" => Some(Recommendation::Decline),
            _ => None,
        }
    }

    pub fn to_label(&self) -> &'static str {
        match self {
            Recommendation::Pursue => "Pursue",
            Recommendation::Monitor => "Monitor",
            Recommendation::Decline => "Decline",
        }
    }
}

/// Stage-3 output for one company: model analysis merged with the
/// deterministic strategic-fit evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyAnalysisRecord {
    pub run_id: String,
    pub org_number: String,
    pub company_name: String,
    pub summary: String,
    pub recommendation: Recommendation,
    /// Model-reported confidence in [0, 1]. Advisory: never clamped or
    /// altered by the pipeline.
    pub confidence: f64,
    pub financial_grade: Grade,
    pub commercial_grade: Grade,
    pub operational_grade: Grade,
    pub next_steps: Vec<String>,
    /// Deterministic fit flags first, then model-reported risks.
    pub risk_flags: Vec<String>,
    pub fit: StrategicFitResult,
    pub raw_response: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Top-level audit aggregate for one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: String,
    pub created_by: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stage1_count: i64,
    pub stage2_count: i64,
    pub stage3_count: i64,
    pub failure_reason: Option<String>,
}

impl WorkflowRun {
    pub fn new(run_id: String, created_by: String) -> Self {
        Self {
            run_id,
            created_by,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            stage1_count: 0,
            stage2_count: 0,
            stage3_count: 0,
            failure_reason: None,
        }
    }
}

/// A per-item failure inside Stage 2 or Stage 3. Recorded, never fatal to
/// the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    pub stage: u8,
    pub org_number: String,
    pub message: String,
}

/// Company context shipped to the model service with a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyContext {
    pub org_number: String,
    pub name: String,
    /// Selected metrics, keyed by canonical metric name. BTreeMap keeps the
    /// serialized payload deterministic for audit diffs.
    pub metrics: BTreeMap<String, f64>,
    /// Retrieved grounding text, empty when the retrieval service is down.
    #[serde(default)]
    pub context: Option<String>,
}

impl CompanyContext {
    pub fn from_record(record: &CompanyRecord) -> Self {
        let mut metrics = BTreeMap::new();
        if let Some(v) = record.revenue {
            metrics.insert("revenue".to_string(), v);
        }
        if let Some(v) = record.ebitda_margin {
            metrics.insert("ebitda_margin".to_string(), v);
        }
        if let Some(v) = record.net_margin {
            metrics.insert("net_margin".to_string(), v);
        }
        if let Some(v) = record.revenue_cagr_3y {
            metrics.insert("revenue_cagr_3y".to_string(), v);
        }
        if let Some(v) = record.employees {
            metrics.insert("employees".to_string(), v as f64);
        }
        Self {
            org_number: record.org_number.clone(),
            name: record.name.clone(),
            metrics,
            context: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconstrained_criteria_has_no_bounds() {
        let c = FilterCriteria::unconstrained();
        assert!(!c.has_revenue_bound());
        assert!(!c.has_margin_bound());
        assert!(!c.has_growth_bound());
        assert!(c.industries.is_empty());
    }

    #[test]
    fn zero_sum_weights_normalize_to_themselves() {
        let w = ScoringWeights {
            revenue: 0.0,
            ebit_margin: 0.0,
            growth: 0.0,
            leverage: 0.0,
            headcount: 0.0,
        };
        let n = w.normalized();
        assert_eq!(n.sum(), 0.0);
    }

    #[test]
    fn default_weights_normalize_to_one() {
        let n = ScoringWeights::default().normalized();
        assert!((n.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn risk_flag_parse_is_case_insensitive() {
        assert_eq!(RiskFlag::parse("LOW"), Some(RiskFlag::Low));
        assert_eq!(RiskFlag::parse(" medium "), Some(RiskFlag::Medium));
        assert_eq!(RiskFlag::parse("severe"), None);
    }

    #[test]
    fn run_status_round_trips_through_str() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn company_context_skips_missing_metrics() {
        let record = CompanyRecord {
            org_number: "5560001234".to_string(),
            name: "Testbolaget AB".to_string(),
            industry_code: None,
            revenue: Some(80_000_000.0),
            ebitda_margin: None,
            net_margin: None,
            revenue_cagr_3y: Some(0.12),
            employees: Some(45),
        };
        let ctx = CompanyContext::from_record(&record);
        assert_eq!(ctx.metrics.len(), 3);
        assert!(!ctx.metrics.contains_key("ebitda_margin"));
    }
}
