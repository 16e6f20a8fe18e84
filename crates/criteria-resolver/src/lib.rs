//! Turns a loosely worded investment prompt into normalized
//! [`FilterCriteria`].
//!
//! Resolution is deterministic: a controlled industry vocabulary plus a
//! small numeric-phrase grammar. Anything unrecognized degrades to the
//! unconstrained sentinel and the degradation is recorded in the criteria
//! description; the resolver never fails on malformed text.

pub mod vocabulary;

use std::sync::Arc;

use model_client::GroundingProvider;
use targeting_core::{FilterCriteria, UNCONSTRAINED};

/// Explicit structured input that wins over anything parsed from the prompt.
#[derive(Debug, Clone, Default)]
pub struct CriteriaOverrides {
    pub min_revenue: Option<f64>,
    pub min_ebitda_margin: Option<f64>,
    pub min_growth: Option<f64>,
    pub industries: Option<Vec<String>>,
    pub custom_sql_conditions: Option<Vec<String>>,
    pub max_results: Option<usize>,
}

pub struct CriteriaResolver {
    grounding: Option<Arc<dyn GroundingProvider>>,
}

impl Default for CriteriaResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CriteriaResolver {
    pub fn new() -> Self {
        Self { grounding: None }
    }

    /// Attach a grounding provider consulted for extra vocabulary context.
    /// The resolver stays correct when it is absent or unreachable.
    pub fn with_grounding(grounding: Arc<dyn GroundingProvider>) -> Self {
        Self {
            grounding: Some(grounding),
        }
    }

    pub async fn resolve(&self, prompt: &str) -> FilterCriteria {
        self.resolve_with_overrides(prompt, &CriteriaOverrides::default())
            .await
    }

    pub async fn resolve_with_overrides(
        &self,
        prompt: &str,
        overrides: &CriteriaOverrides,
    ) -> FilterCriteria {
        let lowered = prompt.to_lowercase();
        let tokens = tokenize(&lowered);

        let mut criteria = FilterCriteria::unconstrained();
        let mut notes: Vec<String> = Vec::new();

        self.parse_numeric_bounds(&lowered, &tokens, &mut criteria, &mut notes);
        self.parse_industries(&lowered, &mut criteria, &mut notes).await;

        if let Some(n) = parse_result_cap(&tokens) {
            criteria.max_results = n;
            notes.push(format!("limit {n}"));
        }

        if notes.is_empty() {
            notes.push("no constraints recognized; criteria unconstrained".to_string());
        }

        apply_overrides(&mut criteria, overrides, &mut notes);
        criteria.description = notes.join("; ");

        tracing::debug!("Resolved criteria from prompt: {}", criteria.description);
        criteria
    }

    fn parse_numeric_bounds(
        &self,
        lowered: &str,
        tokens: &[String],
        criteria: &mut FilterCriteria,
        notes: &mut Vec<String>,
    ) {
        if lowered.contains("revenue") || lowered.contains("turnover") {
            let idx = keyword_index(tokens, &["revenue", "turnover"]);
            match idx.and_then(|i| parse_amount_near(tokens, i)) {
                Some(amount) => {
                    criteria.min_revenue = amount;
                    notes.push(format!("revenue >= {:.1} MSEK", amount / 1_000_000.0));
                }
                None => {
                    notes.push("revenue phrase unrecognized; left unconstrained".to_string())
                }
            }
        }

        if lowered.contains("margin") {
            let idx = keyword_index(tokens, &["margin"]);
            match idx.and_then(|i| parse_ratio_near(tokens, i)) {
                Some(ratio) => {
                    criteria.min_ebitda_margin = ratio;
                    notes.push(format!("EBITDA margin >= {:.1}%", ratio * 100.0));
                }
                None => notes.push("margin phrase unrecognized; left unconstrained".to_string()),
            }
        }

        if lowered.contains("growth") || lowered.contains("growing") || lowered.contains("cagr") {
            let idx = keyword_index(tokens, &["growth", "growing", "cagr"]);
            match idx.and_then(|i| parse_ratio_near(tokens, i)) {
                Some(ratio) => {
                    criteria.min_growth = ratio;
                    notes.push(format!("growth >= {:.1}%", ratio * 100.0));
                }
                None => notes.push("growth phrase unrecognized; left unconstrained".to_string()),
            }
        }
    }

    async fn parse_industries(
        &self,
        lowered: &str,
        criteria: &mut FilterCriteria,
        notes: &mut Vec<String>,
    ) {
        let mut matched = vocabulary::match_industries(lowered);

        // The grounding service may surface synonyms the prompt itself does
        // not contain. Unavailability yields an empty string, which matches
        // nothing.
        if matched.is_empty() {
            if let Some(grounding) = &self.grounding {
                let context = grounding.context(lowered).await.to_lowercase();
                matched = vocabulary::match_industries(&context);
            }
        }

        for entry in matched {
            for code in entry.codes {
                if !criteria.industries.iter().any(|c| c == code) {
                    criteria.industries.push((*code).to_string());
                }
            }
            notes.push(format!(
                "industry '{}' -> {}",
                entry.keyword,
                entry.codes.join(", ")
            ));
        }
    }
}

fn apply_overrides(
    criteria: &mut FilterCriteria,
    overrides: &CriteriaOverrides,
    notes: &mut Vec<String>,
) {
    if let Some(v) = overrides.min_revenue {
        criteria.min_revenue = if v.is_finite() { v } else { UNCONSTRAINED };
        notes.push("revenue bound overridden".to_string());
    }
    if let Some(v) = overrides.min_ebitda_margin {
        criteria.min_ebitda_margin = if v.is_finite() { v } else { UNCONSTRAINED };
        notes.push("margin bound overridden".to_string());
    }
    if let Some(v) = overrides.min_growth {
        criteria.min_growth = if v.is_finite() { v } else { UNCONSTRAINED };
        notes.push("growth bound overridden".to_string());
    }
    if let Some(industries) = &overrides.industries {
        criteria.industries = industries.clone();
        notes.push("industries overridden".to_string());
    }
    if let Some(conditions) = &overrides.custom_sql_conditions {
        criteria.custom_sql_conditions = conditions.clone();
    }
    if let Some(n) = overrides.max_results {
        criteria.max_results = n.max(1);
    }
}

fn tokenize(lowered: &str) -> Vec<String> {
    lowered
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| ",.;:()\"'".contains(c)).to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn keyword_index(tokens: &[String], keywords: &[&str]) -> Option<usize> {
    tokens
        .iter()
        .position(|t| keywords.iter().any(|k| t.contains(k)))
}

/// Split a token like "50msek" into its numeric prefix and the remainder.
fn split_numeric(token: &str) -> Option<(f64, &str)> {
    let split = token
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.' && *c != '_')
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    if split == 0 {
        return None;
    }
    let number: f64 = token[..split].replace('_', "").parse().ok()?;
    Some((number, &token[split..]))
}

fn unit_multiplier(unit: &str) -> Option<f64> {
    match unit {
        "msek" | "mkr" | "million" | "millions" | "m" | "mn" => Some(1_000_000.0),
        "bsek" | "billion" | "billions" | "bn" | "b" => Some(1_000_000_000.0),
        "ksek" | "k" | "thousand" => Some(1_000.0),
        "sek" | "kr" => Some(1.0),
        _ => None,
    }
}

/// Parse a currency amount within a short window after a keyword.
/// A bare number below one million carries no unit and is treated as
/// ambiguous (unconstrained), not guessed at.
fn parse_amount_near(tokens: &[String], keyword_idx: usize) -> Option<f64> {
    let window = &tokens[keyword_idx + 1..(keyword_idx + 7).min(tokens.len())];
    for (i, token) in window.iter().enumerate() {
        let Some((number, suffix)) = split_numeric(token) else {
            continue;
        };
        if !number.is_finite() {
            return None;
        }
        if let Some(mult) = unit_multiplier(suffix) {
            return Some(number * mult);
        }
        if suffix.is_empty() {
            if let Some(mult) = window.get(i + 1).and_then(|t| unit_multiplier(t)) {
                return Some(number * mult);
            }
            if number >= 1_000_000.0 {
                return Some(number);
            }
        }
        return None;
    }
    None
}

/// Parse a percentage or fraction within a short window after a keyword.
fn parse_ratio_near(tokens: &[String], keyword_idx: usize) -> Option<f64> {
    let window = &tokens[keyword_idx + 1..(keyword_idx + 7).min(tokens.len())];
    for (i, token) in window.iter().enumerate() {
        let Some((number, suffix)) = split_numeric(token) else {
            continue;
        };
        if !number.is_finite() {
            return None;
        }
        let is_percent = suffix == "%"
            || matches!(
                window.get(i + 1).map(|t| t.as_str()),
                Some("%") | Some("percent") | Some("pct")
            );
        if is_percent {
            return Some(number / 100.0);
        }
        if suffix.is_empty() && (0.0..=1.0).contains(&number) {
            return Some(number);
        }
        return None;
    }
    None
}

fn parse_result_cap(tokens: &[String]) -> Option<usize> {
    let idx = keyword_index(tokens, &["top", "limit"])?;
    let next = tokens.get(idx + 1)?;
    let n: usize = next.parse().ok()?;
    if (1..=1000).contains(&n) {
        Some(n)
    } else {
        None
    }
}
