//! Composite ranking over a filtered candidate set.
//!
//! Each financial signal is min-max normalized over the candidate set and
//! the normalized components are combined into one weighted score. The top
//! `stage_one_size` companies form the Stage-1 shortlist.

pub mod store;

pub use store::ShortlistStore;

use chrono::Utc;
use targeting_core::{
    CompanyRecord, CompositeScore, ScoringWeights, Shortlist, ShortlistEntry,
};

/// Guards the min-max denominator; a zero-variance signal is handled
/// explicitly and yields 0 for every company.
pub const NORM_EPSILON: f64 = 1e-9;

/// Min-max normalize one signal over the candidate set. Missing values map
/// to 0, as does every value when the signal has no variance.
fn normalize(values: &[Option<f64>]) -> Vec<f64> {
    let present: Vec<f64> = values
        .iter()
        .flatten()
        .copied()
        .filter(|v| v.is_finite())
        .collect();

    if present.is_empty() {
        return vec![0.0; values.len()];
    }

    let min = present.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = present.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if max - min == 0.0 {
        return vec![0.0; values.len()];
    }

    values
        .iter()
        .map(|v| match v {
            Some(x) if x.is_finite() => (x - min) / (max - min + NORM_EPSILON),
            _ => 0.0,
        })
        .collect()
}

fn efficiency(record: &CompanyRecord) -> Option<f64> {
    match (record.revenue, record.employees) {
        (Some(rev), Some(emp)) if emp > 0 => Some(rev / emp as f64),
        _ => None,
    }
}

pub struct RankingEngine;

impl RankingEngine {
    /// Score and rank the candidate set, truncated to `stage_one_size`.
    ///
    /// Guarantees: output length <= min(stage_one_size, input length), every
    /// composite total in [0, 1], ordering is total descending with a stable
    /// org-number-ascending tie-break.
    pub fn rank(
        companies: &[CompanyRecord],
        weights: &ScoringWeights,
        stage_one_size: usize,
    ) -> Vec<ShortlistEntry> {
        let w = weights.normalized();

        let revenue = normalize(&companies.iter().map(|c| c.revenue).collect::<Vec<_>>());
        let growth = normalize(
            &companies
                .iter()
                .map(|c| c.revenue_cagr_3y)
                .collect::<Vec<_>>(),
        );
        let margin = normalize(&companies.iter().map(|c| c.ebitda_margin).collect::<Vec<_>>());
        let stability = normalize(&companies.iter().map(|c| c.net_margin).collect::<Vec<_>>());
        let eff = normalize(&companies.iter().map(efficiency).collect::<Vec<_>>());

        let mut entries: Vec<ShortlistEntry> = companies
            .iter()
            .enumerate()
            .map(|(i, company)| {
                let score = CompositeScore {
                    revenue: revenue[i],
                    growth: growth[i],
                    margin: margin[i],
                    stability: stability[i],
                    efficiency: eff[i],
                    total: w.revenue * revenue[i]
                        + w.growth * growth[i]
                        + w.ebit_margin * margin[i]
                        + w.leverage * stability[i]
                        + w.headcount * eff[i],
                };
                ShortlistEntry {
                    org_number: company.org_number.clone(),
                    name: company.name.clone(),
                    revenue: company.revenue,
                    ebitda_margin: company.ebitda_margin,
                    revenue_cagr_3y: company.revenue_cagr_3y,
                    employees: company.employees,
                    score,
                }
            })
            .collect();

        entries.sort_by(|a, b| {
            b.score
                .total
                .partial_cmp(&a.score.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.org_number.cmp(&b.org_number))
        });
        entries.truncate(stage_one_size);
        entries
    }

    /// Rank and wrap the result as a persistable [`Shortlist`].
    pub fn build_shortlist(
        name: &str,
        description: &str,
        companies: &[CompanyRecord],
        weights: &ScoringWeights,
        stage_one_size: usize,
    ) -> Shortlist {
        let entries = Self::rank(companies, weights, stage_one_size);
        tracing::info!(
            "Ranked {} candidates, shortlisted {}",
            companies.len(),
            entries.len()
        );
        Shortlist {
            name: name.to_string(),
            description: description.to_string(),
            weights: weights.clone(),
            stage_one_size,
            total_companies: companies.len(),
            companies: entries,
            status: "generated".to_string(),
            generated_at: Utc::now(),
        }
    }
}
