//! Sequences the staged targeting pipeline: filter, rank, screen, deep
//! analysis. One run id and one audit trail per invocation.
//!
//! Stages run strictly in order; per-company model calls inside a stage are
//! dispatched with bounded concurrency and re-sorted deterministically after
//! gathering, so output ordering never depends on call completion order.

pub mod db;

pub use db::RunStore;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::{stream, StreamExt};
use tokio::sync::watch;
use uuid::Uuid;

use financial_filter::{FilterStats, FinancialFilter};
use model_client::{AnalysisItem, GroundingProvider, ModelProvider, ScreeningItem};
use ranking_engine::{RankingEngine, ShortlistStore};
use strategic_fit::StrategicFitAnalyzer;
use targeting_core::{
    CompanyAnalysisRecord, CompanyContext, CompanyRecord, FilterCriteria, ItemFailure,
    RunStatus, ScoringWeights, ScreeningResult, Shortlist, TargetingError, WorkflowRun,
};

/// What a failed per-company call does to a stage's survivor quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementPolicy {
    /// A failure counts against the quota, shrinking the survivor set,
    /// though never below one while healthy results remain.
    Shrink,
    /// The next-ranked candidate takes the failed company's slot.
    Refill,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub shortlist_name: String,
    pub created_by: String,
    pub stage_one_size: usize,
    pub stage_two_size: usize,
    pub stage_three_size: usize,
    pub model_concurrency: usize,
    pub replacement_policy: ReplacementPolicy,
    /// Strategy key for the fit analyzer; `None` uses the configured default.
    pub strategy: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shortlist_name: "acquisition-targets".to_string(),
            created_by: "pipeline".to_string(),
            stage_one_size: 50,
            stage_two_size: 20,
            stage_three_size: 5,
            model_concurrency: 4,
            replacement_policy: ReplacementPolicy::Shrink,
            strategy: None,
        }
    }
}

/// Everything one run produced, for callers that want more than the audit
/// trail. Prior stage outputs are persisted as soon as their stage
/// completes, so a later failure never loses them.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub run: WorkflowRun,
    pub filter_stats: FilterStats,
    pub shortlist: Shortlist,
    pub screening: Vec<ScreeningResult>,
    pub analyses: Vec<CompanyAnalysisRecord>,
    pub item_failures: Vec<ItemFailure>,
}

pub struct TargetingPipeline {
    filter: FinancialFilter,
    shortlist_store: ShortlistStore,
    runs: RunStore,
    fit: StrategicFitAnalyzer,
    model: Arc<dyn ModelProvider>,
    grounding: Option<Arc<dyn GroundingProvider>>,
    cancel: Option<watch::Receiver<bool>>,
    config: PipelineConfig,
}

impl TargetingPipeline {
    pub fn new(
        pool: sqlx::AnyPool,
        fit: StrategicFitAnalyzer,
        model: Arc<dyn ModelProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            filter: FinancialFilter::new(pool.clone()),
            shortlist_store: ShortlistStore::new(pool.clone()),
            runs: RunStore::new(pool),
            fit,
            model,
            grounding: None,
            cancel: None,
            config,
        }
    }

    pub fn with_grounding(mut self, grounding: Arc<dyn GroundingProvider>) -> Self {
        self.grounding = Some(grounding);
        self
    }

    /// Attach a cancellation signal. It is checked at stage boundaries only;
    /// in-flight per-company calls complete or time out first.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn run_store(&self) -> &RunStore {
        &self.runs
    }

    pub fn shortlist_store(&self) -> &ShortlistStore {
        &self.shortlist_store
    }

    pub async fn init_tables(&self) -> Result<(), TargetingError> {
        self.shortlist_store.init_tables().await?;
        self.runs.init_tables().await
    }

    /// Execute one full run. Creates a fresh run id; partial runs are never
    /// resumed in place.
    pub async fn run(
        &self,
        criteria: &FilterCriteria,
        weights: &ScoringWeights,
    ) -> Result<PipelineOutcome, TargetingError> {
        let mut run = WorkflowRun::new(
            Uuid::new_v4().to_string(),
            self.config.created_by.clone(),
        );
        self.runs.create_run(&run).await?;

        run.status = RunStatus::Running;
        self.runs.update_run(&run).await?;
        tracing::info!(
            "Run {} started via {} backend",
            run.run_id,
            self.model.backend_name()
        );

        let mut item_failures: Vec<ItemFailure> = Vec::new();

        // Stage 1: filter + composite ranking.
        let (filter_stats, shortlist, records) =
            self.stage_one(&mut run, criteria, weights).await?;
        self.check_cancelled(&mut run).await?;

        // Stage 2: batched model screening.
        let (survivors, context_map) = self
            .stage_two(&mut run, &shortlist, &records, &mut item_failures)
            .await?;
        self.check_cancelled(&mut run).await?;

        // Stage 3: deep analysis blended with deterministic fit.
        let analyses = self
            .stage_three(&mut run, &survivors, &records, &context_map, &mut item_failures)
            .await?;

        run.status = RunStatus::Completed;
        run.completed_at = Some(Utc::now());
        self.runs.update_run(&run).await?;
        tracing::info!(
            "Run {} completed: {} -> {} -> {}",
            run.run_id,
            run.stage1_count,
            run.stage2_count,
            run.stage3_count
        );

        Ok(PipelineOutcome {
            run,
            filter_stats,
            shortlist,
            screening: survivors,
            analyses,
            item_failures,
        })
    }

    async fn stage_one(
        &self,
        run: &mut WorkflowRun,
        criteria: &FilterCriteria,
        weights: &ScoringWeights,
    ) -> Result<(FilterStats, Shortlist, HashMap<String, CompanyRecord>), TargetingError> {
        let outcome = match self.filter.filter(criteria).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail_run(run, format!("stage 1: {e}")).await;
                return Err(e);
            }
        };

        if outcome.org_numbers.is_empty() {
            let reason = "financial filter matched zero companies".to_string();
            self.fail_run(run, format!("stage 1 exhausted: {reason}")).await;
            return Err(TargetingError::StageExhausted { stage: 1, reason });
        }

        let companies = match self.filter.fetch_companies(&outcome.org_numbers).await {
            Ok(companies) => companies,
            Err(e) => {
                self.fail_run(run, format!("stage 1: {e}")).await;
                return Err(e);
            }
        };

        let shortlist = RankingEngine::build_shortlist(
            &self.config.shortlist_name,
            &criteria.description,
            &companies,
            weights,
            self.config.stage_one_size,
        );

        if shortlist.companies.is_empty() {
            let reason = "ranking produced an empty shortlist".to_string();
            self.fail_run(run, format!("stage 1 exhausted: {reason}")).await;
            return Err(TargetingError::StageExhausted { stage: 1, reason });
        }

        self.shortlist_store.save(&shortlist).await?;
        run.stage1_count = shortlist.companies.len() as i64;
        self.runs.update_run(run).await?;

        let records = companies
            .into_iter()
            .map(|c| (c.org_number.clone(), c))
            .collect();
        Ok((outcome.stats, shortlist, records))
    }

    async fn stage_two(
        &self,
        run: &mut WorkflowRun,
        shortlist: &Shortlist,
        records: &HashMap<String, CompanyRecord>,
        item_failures: &mut Vec<ItemFailure>,
    ) -> Result<(Vec<ScreeningResult>, HashMap<String, CompanyContext>), TargetingError> {
        let mut context_map: HashMap<String, CompanyContext> = HashMap::new();
        for entry in &shortlist.companies {
            let Some(record) = records.get(&entry.org_number) else {
                continue;
            };
            let mut context = CompanyContext::from_record(record);
            if let Some(grounding) = &self.grounding {
                let text = grounding.context(&record.name).await;
                if !text.is_empty() {
                    context.context = Some(text);
                }
            }
            context_map.insert(entry.org_number.clone(), context);
        }
        let contexts: Vec<CompanyContext> = shortlist
            .companies
            .iter()
            .filter_map(|e| context_map.get(&e.org_number).cloned())
            .collect();

        let raw_items = match self.model.screen_batch(&run.run_id, &contexts).await {
            Ok(items) => items,
            Err(e) => {
                self.fail_run(run, format!("stage 2: {e}")).await;
                return Err(e);
            }
        };

        let mut parsed: HashMap<String, ScreeningItem> = HashMap::new();
        for value in &raw_items {
            match ScreeningItem::from_value(value) {
                Ok(item) => {
                    if context_map.contains_key(&item.org_number) {
                        parsed.insert(item.org_number.clone(), item);
                    } else {
                        tracing::warn!(
                            "Screening response for unknown org {:?} ignored",
                            item.org_number
                        );
                    }
                }
                Err((org, e)) => item_failures.push(ItemFailure {
                    stage: 2,
                    org_number: org.unwrap_or_default(),
                    message: e.to_string(),
                }),
            }
        }
        for entry in &shortlist.companies {
            if !parsed.contains_key(&entry.org_number)
                && !item_failures
                    .iter()
                    .any(|f| f.stage == 2 && f.org_number == entry.org_number)
            {
                item_failures.push(ItemFailure {
                    stage: 2,
                    org_number: entry.org_number.clone(),
                    message: "no screening result returned".to_string(),
                });
            }
        }

        let composite: HashMap<&str, f64> = shortlist
            .companies
            .iter()
            .map(|e| (e.org_number.as_str(), e.score.total))
            .collect();

        let mut results: Vec<ScreeningResult> = parsed
            .into_values()
            .map(|item| ScreeningResult {
                run_id: run.run_id.clone(),
                org_number: item.org_number.clone(),
                company_name: records
                    .get(&item.org_number)
                    .map(|r| r.name.clone())
                    .unwrap_or_default(),
                score: item.score,
                risk: item.risk,
                summary: item.summary,
                raw_response: item.raw,
                generated_at: Utc::now(),
            })
            .collect();

        // Deterministic ordering: screening score, then Stage-1 composite,
        // then org number. Never the arrival order of the batch.
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ca = composite.get(a.org_number.as_str()).copied().unwrap_or(0.0);
                    let cb = composite.get(b.org_number.as_str()).copied().unwrap_or(0.0);
                    cb.partial_cmp(&ca).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.org_number.cmp(&b.org_number))
        });

        self.runs.save_screening_results(&results).await?;

        let stage2_failures = item_failures.iter().filter(|f| f.stage == 2).count();
        // Failures shrink the quota but never erase healthy results; the
        // stage fails only when it produced nothing at all.
        let quota = match self.config.replacement_policy {
            ReplacementPolicy::Shrink => {
                let shrunk = self.config.stage_two_size.saturating_sub(stage2_failures);
                if results.is_empty() {
                    0
                } else {
                    shrunk.max(1)
                }
            }
            ReplacementPolicy::Refill => self.config.stage_two_size,
        };
        let survivors: Vec<ScreeningResult> =
            results.iter().take(quota).cloned().collect();

        if survivors.is_empty() {
            let reason = "screening produced no survivors".to_string();
            self.fail_run(run, format!("stage 2 exhausted: {reason}")).await;
            return Err(TargetingError::StageExhausted { stage: 2, reason });
        }

        run.stage2_count = survivors.len() as i64;
        self.runs.update_run(run).await?;
        Ok((survivors, context_map))
    }

    async fn stage_three(
        &self,
        run: &mut WorkflowRun,
        survivors: &[ScreeningResult],
        records: &HashMap<String, CompanyRecord>,
        context_map: &HashMap<String, CompanyContext>,
        item_failures: &mut Vec<ItemFailure>,
    ) -> Result<Vec<CompanyAnalysisRecord>, TargetingError> {
        let gathered: Vec<(String, Result<AnalysisItem, TargetingError>)> =
            stream::iter(survivors.iter().filter_map(|s| {
                let context = context_map.get(&s.org_number)?.clone();
                let model = Arc::clone(&self.model);
                let run_id = run.run_id.clone();
                let org = s.org_number.clone();
                Some(async move {
                    let result = match model.deep_analyze(&run_id, &context).await {
                        Ok(value) => AnalysisItem::from_value(&value),
                        Err(e) => Err(e),
                    };
                    (org, result)
                })
            }))
            .buffer_unordered(self.config.model_concurrency.max(1))
            .collect()
            .await;

        let mut merged: Vec<CompanyAnalysisRecord> = Vec::new();
        for (org, result) in gathered {
            let item = match result {
                Ok(item) if item.org_number == org => item,
                Ok(item) => {
                    item_failures.push(ItemFailure {
                        stage: 3,
                        org_number: org,
                        message: format!(
                            "analysis returned for mismatched org {:?}",
                            item.org_number
                        ),
                    });
                    continue;
                }
                Err(e) => {
                    item_failures.push(ItemFailure {
                        stage: 3,
                        org_number: org,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let Some(record) = records.get(&org) else {
                continue;
            };
            let metrics = metrics_map(record);
            let fit = self.fit.evaluate(
                &record.name,
                &metrics,
                None,
                self.config.strategy.as_deref(),
            );

            // Deterministic fit flags first, model-reported risks appended.
            let mut risk_flags = fit.risk_flags.clone();
            risk_flags.extend(item.risks.iter().cloned());

            merged.push(CompanyAnalysisRecord {
                run_id: run.run_id.clone(),
                org_number: org,
                company_name: record.name.clone(),
                summary: item.summary,
                recommendation: item.recommendation,
                confidence: item.confidence,
                financial_grade: item.financial_grade,
                commercial_grade: item.commercial_grade,
                operational_grade: item.operational_grade,
                next_steps: item.next_steps,
                risk_flags,
                fit,
                raw_response: item.raw,
                generated_at: Utc::now(),
            });
        }

        let screening_score: HashMap<&str, f64> = survivors
            .iter()
            .map(|s| (s.org_number.as_str(), s.score))
            .collect();
        merged.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let sa = screening_score
                        .get(a.org_number.as_str())
                        .copied()
                        .unwrap_or(0.0);
                    let sb = screening_score
                        .get(b.org_number.as_str())
                        .copied()
                        .unwrap_or(0.0);
                    sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.org_number.cmp(&b.org_number))
        });

        self.runs.save_analysis_records(&merged).await?;

        let stage3_failures = item_failures.iter().filter(|f| f.stage == 3).count();
        // Same floor as screening: failures shrink the quota but never
        // erase healthy records.
        let quota = match self.config.replacement_policy {
            ReplacementPolicy::Shrink => {
                let shrunk = self.config.stage_three_size.saturating_sub(stage3_failures);
                if merged.is_empty() {
                    0
                } else {
                    shrunk.max(1)
                }
            }
            ReplacementPolicy::Refill => self.config.stage_three_size,
        };
        merged.truncate(quota);

        if merged.is_empty() {
            let reason = "deep analysis produced no records".to_string();
            self.fail_run(run, format!("stage 3 exhausted: {reason}")).await;
            return Err(TargetingError::StageExhausted { stage: 3, reason });
        }

        run.stage3_count = merged.len() as i64;
        self.runs.update_run(run).await?;
        Ok(merged)
    }

    async fn check_cancelled(&self, run: &mut WorkflowRun) -> Result<(), TargetingError> {
        let cancelled = self
            .cancel
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false);
        if cancelled {
            self.fail_run(run, "run cancelled between stages".to_string())
                .await;
            return Err(TargetingError::Cancelled);
        }
        Ok(())
    }

    async fn fail_run(&self, run: &mut WorkflowRun, reason: String) {
        run.status = RunStatus::Failed;
        run.completed_at = Some(Utc::now());
        run.failure_reason = Some(reason.clone());
        if let Err(e) = self.runs.update_run(run).await {
            tracing::error!("Could not persist failed run {}: {}", run.run_id, e);
        }
        tracing::error!("Run {} failed: {}", run.run_id, reason);
    }
}

fn metrics_map(record: &CompanyRecord) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
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
    metrics
}

#[cfg(test)]
mod tests;
