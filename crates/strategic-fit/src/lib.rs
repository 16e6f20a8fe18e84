//! Deterministic strategy-fit scoring.
//!
//! Scores a single company against a named investment strategy using only
//! configuration and the supplied metrics; no external service involved.
//! Identical inputs and configuration always yield identical output.

pub mod config;

pub use config::{InvestmentStrategyConfig, StrategyProfile, CONFIG_PATH_ENV};

use std::collections::HashMap;

use targeting_core::StrategicFitResult;

const NEUTRAL_MIDPOINT: i64 = 5;

/// Value-chain positions that strengthen or weaken defensibility.
const STRONG_POSITIONS: &[&str] = &["brand owner", "oem", "platform", "niche"];
const WEAK_POSITIONS: &[&str] = &["subcontractor", "reseller", "distributor"];

pub struct StrategicFitAnalyzer {
    config: InvestmentStrategyConfig,
}

impl StrategicFitAnalyzer {
    pub fn new(config: InvestmentStrategyConfig) -> Self {
        // A config whose default strategy is missing would make fallback
        // impossible; substitute the built-in default instead of failing.
        let config = if config.strategies.contains_key(&config.default_strategy) {
            config
        } else {
            tracing::warn!(
                "Strategy config default {:?} missing from map, using built-in default",
                config.default_strategy
            );
            InvestmentStrategyConfig::builtin_default()
        };
        Self { config }
    }

    /// Construct with the config file from the environment, falling back to
    /// the built-in default.
    pub fn from_env() -> Self {
        Self::new(InvestmentStrategyConfig::load_or_default())
    }

    pub fn config(&self) -> &InvestmentStrategyConfig {
        &self.config
    }

    /// Score `company_name` against the strategy under `strategy_key`
    /// (default strategy when absent or unknown).
    ///
    /// Score reacts to financial targets, defensibility to qualitative
    /// signals; both start at the neutral midpoint and end clamped to
    /// [1, 10].
    pub fn evaluate(
        &self,
        company_name: &str,
        metrics: &HashMap<String, f64>,
        qualitative: Option<&HashMap<String, String>>,
        strategy_key: Option<&str>,
    ) -> StrategicFitResult {
        let (strategy_name, profile) = self.config.profile_for(strategy_key);

        let mut score = NEUTRAL_MIDPOINT;
        let mut defensibility = NEUTRAL_MIDPOINT;
        let mut rationale: Vec<String> = Vec::new();
        let mut risk_flags: Vec<String> = Vec::new();

        if let Some(&revenue) = metrics.get("revenue") {
            if revenue >= profile.revenue_min && revenue <= profile.revenue_max {
                score += 2;
                rationale.push(format!(
                    "revenue {:.1} MSEK within strategy range",
                    revenue / 1_000_000.0
                ));
            } else if revenue < profile.revenue_min {
                score -= 2;
                risk_flags.push(format!(
                    "revenue {:.1} MSEK below strategy minimum {:.1} MSEK",
                    revenue / 1_000_000.0,
                    profile.revenue_min / 1_000_000.0
                ));
            } else {
                score -= 1;
                risk_flags.push(format!(
                    "revenue {:.1} MSEK above strategy maximum {:.1} MSEK",
                    revenue / 1_000_000.0,
                    profile.revenue_max / 1_000_000.0
                ));
            }
        }

        if let Some(&raw) = metrics.get("ebitda_margin") {
            let margin = normalize_ratio(raw);
            if margin >= profile.ebitda_margin_min {
                score += 2;
                rationale.push(format!(
                    "EBITDA margin {:.1}% meets the {:.1}% target",
                    margin * 100.0,
                    profile.ebitda_margin_min * 100.0
                ));
            } else {
                score -= 2;
                risk_flags.push(format!(
                    "EBITDA margin {:.1}% below the {:.1}% target",
                    margin * 100.0,
                    profile.ebitda_margin_min * 100.0
                ));
            }
        }

        let growth = metrics
            .get("revenue_cagr_3y")
            .or_else(|| metrics.get("growth"))
            .copied();
        if let Some(raw) = growth {
            let growth = normalize_ratio(raw);
            if growth >= profile.growth_min {
                score += 2;
                rationale.push(format!(
                    "3-year growth {:.1}% meets the {:.1}% target",
                    growth * 100.0,
                    profile.growth_min * 100.0
                ));
            } else {
                score -= 2;
                risk_flags.push(format!(
                    "3-year growth {:.1}% below the {:.1}% target",
                    growth * 100.0,
                    profile.growth_min * 100.0
                ));
            }
        }

        if let Some(qualitative) = qualitative {
            if let Some(position) = qualitative.get("value_chain_position") {
                let lowered = position.to_lowercase();
                if STRONG_POSITIONS.iter().any(|p| lowered.contains(p)) {
                    defensibility += 2;
                    rationale.push(format!("strong value-chain position: {position}"));
                } else if WEAK_POSITIONS.iter().any(|p| lowered.contains(p)) {
                    defensibility -= 2;
                    risk_flags.push(format!("weak value-chain position: {position}"));
                }
            }

            let description = qualitative
                .get("products")
                .or_else(|| qualitative.get("description"));
            if let Some(description) = description {
                let lowered = description.to_lowercase();
                if let Some(keyword) = profile
                    .preferred_keywords
                    .iter()
                    .find(|k| lowered.contains(&k.to_lowercase()))
                {
                    defensibility += 2;
                    rationale.push(format!("offering matches strategy keyword {keyword:?}"));
                }
            }
        }

        if rationale.is_empty() && risk_flags.is_empty() {
            rationale.push("no evaluable signals; neutral score".to_string());
        }

        tracing::debug!(
            "Fit for {}: score {} defensibility {} ({})",
            company_name,
            score.clamp(1, 10),
            defensibility.clamp(1, 10),
            strategy_name
        );

        StrategicFitResult {
            score: score.clamp(1, 10),
            defensibility: defensibility.clamp(1, 10),
            risk_flags,
            upside_potential: profile.default_upside,
            rationale: rationale.join("; "),
            matched_strategy: strategy_name,
        }
    }
}

/// Ratio-valued inputs sometimes arrive as whole percentages. Anything with
/// a magnitude above 1.5 is treated as a percentage and scaled to a
/// fraction, so `15` and `0.15` mean the same margin.
fn normalize_ratio(value: f64) -> f64 {
    if value.abs() > 1.5 {
        value / 100.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> StrategicFitAnalyzer {
        StrategicFitAnalyzer::new(InvestmentStrategyConfig::builtin_default())
    }

    fn metrics(revenue: f64, margin: f64, growth: f64) -> HashMap<String, f64> {
        HashMap::from([
            ("revenue".to_string(), revenue),
            ("ebitda_margin".to_string(), margin),
            ("revenue_cagr_3y".to_string(), growth),
        ])
    }

    #[test]
    fn empty_inputs_stay_at_neutral_midpoint() {
        let result = analyzer().evaluate("Tomma AB", &HashMap::new(), None, None);
        assert_eq!(result.score, 5);
        assert_eq!(result.defensibility, 5);
        assert!(result.rationale.contains("neutral"));
    }

    #[test]
    fn score_and_defensibility_always_in_range() {
        let cases = [
            metrics(0.0, -50.0, -50.0),
            metrics(1e12, 80.0, 90.0),
            metrics(f64::MIN_POSITIVE, 0.0, 0.0),
        ];
        for m in cases {
            let result = analyzer().evaluate("X", &m, None, None);
            assert!((1..=10).contains(&result.score));
            assert!((1..=10).contains(&result.defensibility));
        }
    }

    #[test]
    fn percent_and_fraction_inputs_are_equivalent() {
        let a = analyzer().evaluate("A", &metrics(50_000_000.0, 15.0, 10.0), None, None);
        let b = analyzer().evaluate("A", &metrics(50_000_000.0, 0.15, 0.10), None, None);
        assert_eq!(a.score, b.score);
        assert_eq!(a.risk_flags, b.risk_flags);
    }

    #[test]
    fn unknown_strategy_falls_back_without_error() {
        let result = analyzer().evaluate(
            "A",
            &metrics(50_000_000.0, 0.10, 0.05),
            None,
            Some("moonshot_speculation"),
        );
        assert_eq!(result.matched_strategy, "nordic_smb_buyout");
    }

    #[test]
    fn missed_targets_produce_risk_flags_and_lower_score() {
        let result = analyzer().evaluate("A", &metrics(5_000_000.0, 0.01, -0.10), None, None);
        assert_eq!(result.score, 1); // 5 - 2 - 2 - 2, clamped
        assert_eq!(result.risk_flags.len(), 3);
    }

    #[test]
    fn met_targets_raise_score_with_rationale() {
        let result = analyzer().evaluate("A", &metrics(80_000_000.0, 0.12, 0.08), None, None);
        assert_eq!(result.score, 10); // 5 + 2 + 2 + 2, clamped
        assert!(result.risk_flags.is_empty());
        assert!(result.rationale.contains("within strategy range"));
    }

    #[test]
    fn qualitative_signals_move_defensibility_not_score() {
        let qualitative = HashMap::from([
            (
                "value_chain_position".to_string(),
                "Brand owner in fastening systems".to_string(),
            ),
            (
                "products".to_string(),
                "Recurring service contracts for industrial gates".to_string(),
            ),
        ]);
        let base = analyzer().evaluate("A", &metrics(80_000_000.0, 0.12, 0.08), None, None);
        let boosted = analyzer().evaluate(
            "A",
            &metrics(80_000_000.0, 0.12, 0.08),
            Some(&qualitative),
            None,
        );
        assert_eq!(boosted.score, base.score);
        assert_eq!(boosted.defensibility, 9); // 5 + 2 + 2
    }

    #[test]
    fn evaluation_is_deterministic() {
        let m = metrics(80_000_000.0, 0.12, 0.08);
        let a = analyzer().evaluate("A", &m, None, None);
        let b = analyzer().evaluate("A", &m, None, None);
        assert_eq!(a.score, b.score);
        assert_eq!(a.rationale, b.rationale);
        assert_eq!(a.risk_flags, b.risk_flags);
    }
}
