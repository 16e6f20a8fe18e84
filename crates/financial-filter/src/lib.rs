//! Evaluates [`FilterCriteria`] against the company/financials store.
//!
//! Predicates combine conjunctively. Custom SQL fragments are validated
//! against a column/operator allow-list before use; rejected fragments are
//! dropped and reported in the stats record instead of aborting the request.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use targeting_core::{CompanyRecord, FilterCriteria, TargetingError};

const CACHE_TTL_SECS: i64 = 300; // 5 minutes

const ALLOWED_COLUMNS: &[&str] = &[
    "revenue",
    "ebitda_margin",
    "net_margin",
    "revenue_cagr_3y",
    "employees",
    "industry_code",
];

const ALLOWED_OPERATORS: &[&str] = &[
    "=", "!=", "<>", "<", ">", "<=", ">=", "and", "or", "not",
];

/// Descriptive statistics for one filter evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct FilterStats {
    pub total_matches: i64,
    pub will_return: usize,
    pub applied_conditions: Vec<String>,
    pub rejected_conditions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub org_numbers: Vec<String>,
    pub stats: FilterStats,
}

struct CacheEntry {
    data: CompanyRecord,
    cached_at: DateTime<Utc>,
}

enum Bind {
    Number(f64),
    Text(String),
    Int(i64),
}

pub struct FinancialFilter {
    pool: sqlx::AnyPool,
    company_cache: DashMap<String, CacheEntry>,
}

impl FinancialFilter {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self {
            pool,
            company_cache: DashMap::new(),
        }
    }

    /// Run the criteria against the store, returning matching org numbers
    /// (capped at `max_results`) plus per-predicate stats.
    pub async fn filter(&self, criteria: &FilterCriteria) -> Result<FilterOutcome, TargetingError> {
        let mut fragments: Vec<String> = Vec::new();
        let mut binds: Vec<Bind> = Vec::new();
        let mut applied: Vec<String> = Vec::new();
        let mut rejected: Vec<String> = Vec::new();

        if criteria.has_revenue_bound() {
            fragments.push("revenue >= ?".to_string());
            binds.push(Bind::Number(criteria.min_revenue));
            applied.push(format!("revenue >= {}", criteria.min_revenue));
        }
        if criteria.has_margin_bound() {
            fragments.push("ebitda_margin >= ?".to_string());
            binds.push(Bind::Number(criteria.min_ebitda_margin));
            applied.push(format!("ebitda_margin >= {}", criteria.min_ebitda_margin));
        }
        if criteria.has_growth_bound() {
            fragments.push("revenue_cagr_3y >= ?".to_string());
            binds.push(Bind::Number(criteria.min_growth));
            applied.push(format!("revenue_cagr_3y >= {}", criteria.min_growth));
        }

        // Empty industry list means any industry: no predicate at all.
        if !criteria.industries.is_empty() {
            let ors: Vec<&str> = criteria
                .industries
                .iter()
                .map(|_| "industry_code LIKE ?")
                .collect();
            fragments.push(format!("({})", ors.join(" OR ")));
            for code in &criteria.industries {
                binds.push(Bind::Text(format!("{code}%")));
            }
            applied.push(format!("industry_code IN ({})", criteria.industries.join(", ")));
        }

        for condition in &criteria.custom_sql_conditions {
            if validate_condition(condition) {
                fragments.push(format!("({condition})"));
                applied.push(condition.clone());
            } else {
                tracing::warn!("Rejected custom filter condition: {:?}", condition);
                rejected.push(condition.clone());
            }
        }

        let where_clause = if fragments.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", fragments.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM companies{where_clause}");
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        for bind in &binds {
            count_query = match bind {
                Bind::Number(v) => count_query.bind(*v),
                Bind::Text(v) => count_query.bind(v.clone()),
                Bind::Int(v) => count_query.bind(*v),
            };
        }
        let (total_matches,) = count_query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| TargetingError::Database(e.to_string()))?;

        let select_sql = format!(
            "SELECT org_number FROM companies{where_clause} \
             ORDER BY revenue DESC, org_number ASC LIMIT ?"
        );
        binds.push(Bind::Int(criteria.max_results as i64));
        let mut select_query = sqlx::query_as::<_, (String,)>(&select_sql);
        for bind in &binds {
            select_query = match bind {
                Bind::Number(v) => select_query.bind(*v),
                Bind::Text(v) => select_query.bind(v.clone()),
                Bind::Int(v) => select_query.bind(*v),
            };
        }
        let rows = select_query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TargetingError::Database(e.to_string()))?;

        let org_numbers: Vec<String> = rows.into_iter().map(|(o,)| o).collect();

        tracing::info!(
            "Filter matched {} companies ({} returned, {} predicates, {} rejected)",
            total_matches,
            org_numbers.len(),
            applied.len(),
            rejected.len()
        );

        Ok(FilterOutcome {
            stats: FilterStats {
                total_matches,
                will_return: org_numbers.len(),
                applied_conditions: applied,
                rejected_conditions: rejected,
            },
            org_numbers,
        })
    }

    /// Fetch full company records for a set of org numbers, preserving the
    /// input order. Cached with a short TTL; unknown org numbers are skipped.
    pub async fn fetch_companies(
        &self,
        org_numbers: &[String],
    ) -> Result<Vec<CompanyRecord>, TargetingError> {
        let mut found: std::collections::HashMap<String, CompanyRecord> =
            std::collections::HashMap::new();
        let mut missing: Vec<String> = Vec::new();

        for org in org_numbers {
            match self.company_cache.get(org) {
                Some(entry)
                    if (Utc::now() - entry.cached_at).num_seconds() < CACHE_TTL_SECS =>
                {
                    found.insert(org.clone(), entry.data.clone());
                }
                _ => missing.push(org.clone()),
            }
        }

        if !missing.is_empty() {
            let placeholders: Vec<&str> = missing.iter().map(|_| "?").collect();
            let sql = format!(
                "SELECT org_number, name, industry_code, revenue, ebitda_margin, \
                 net_margin, revenue_cagr_3y, employees \
                 FROM companies WHERE org_number IN ({})",
                placeholders.join(", ")
            );
            let mut query = sqlx::query_as::<
                _,
                (
                    String,
                    String,
                    Option<String>,
                    Option<f64>,
                    Option<f64>,
                    Option<f64>,
                    Option<f64>,
                    Option<i64>,
                ),
            >(&sql);
            for org in &missing {
                query = query.bind(org.clone());
            }
            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| TargetingError::Database(e.to_string()))?;

            for row in rows {
                let record = CompanyRecord {
                    org_number: row.0,
                    name: row.1,
                    industry_code: row.2,
                    revenue: row.3,
                    ebitda_margin: row.4,
                    net_margin: row.5,
                    revenue_cagr_3y: row.6,
                    employees: row.7,
                };
                self.company_cache.insert(
                    record.org_number.clone(),
                    CacheEntry {
                        data: record.clone(),
                        cached_at: Utc::now(),
                    },
                );
                found.insert(record.org_number.clone(), record);
            }
        }

        Ok(org_numbers
            .iter()
            .filter_map(|org| found.get(org).map(|r| r.clone()))
            .collect())
    }
}

/// Allow-list validation for free-form predicate fragments. Every token must
/// be a known column, a comparison/boolean operator, or a numeric literal;
/// quoting, statement separators and comments are rejected outright.
pub fn validate_condition(condition: &str) -> bool {
    let lowered = condition.to_lowercase();
    if lowered.is_empty()
        || lowered.contains(';')
        || lowered.contains("--")
        || lowered.contains("/*")
        || lowered.contains('\'')
        || lowered.contains('"')
    {
        return false;
    }

    let spaced = lowered.replace('(', " ").replace(')', " ");
    let mut saw_column = false;
    for token in spaced.split_whitespace() {
        if ALLOWED_COLUMNS.contains(&token) {
            saw_column = true;
        } else if ALLOWED_OPERATORS.contains(&token) {
            continue;
        } else if token.parse::<f64>().is_ok() {
            continue;
        } else {
            return false;
        }
    }
    saw_column
}
