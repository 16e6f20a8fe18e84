use super::*;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;

use strategic_fit::InvestmentStrategyConfig;
use targeting_core::{FilterCriteria, RunStatus, ScoringWeights};

/// Scripted model backend. Returns screening items in reverse input order so
/// tests catch any dependence on batch arrival order.
#[derive(Default)]
struct FakeModel {
    screening_scores: HashMap<String, f64>,
    screening_errors: HashSet<String>,
    analysis_confidence: HashMap<String, f64>,
    analysis_errors: HashSet<String>,
}

#[async_trait]
impl ModelProvider for FakeModel {
    async fn screen_batch(
        &self,
        _run_id: &str,
        companies: &[CompanyContext],
    ) -> Result<Vec<Value>, TargetingError> {
        let mut items: Vec<Value> = companies
            .iter()
            .map(|c| {
                if self.screening_errors.contains(&c.org_number) {
                    json!({ "org_number": c.org_number, "error": "screening timed out" })
                } else {
                    let score = self
                        .screening_scores
                        .get(&c.org_number)
                        .copied()
                        .unwrap_or(5.0);
                    json!({
                        "org_number": c.org_number,
                        "score": score,
                        "risk": "Low",
                        "summary": format!("screened {}", c.name),
                    })
                }
            })
            .collect();
        items.reverse();
        Ok(items)
    }

    async fn deep_analyze(
        &self,
        _run_id: &str,
        company: &CompanyContext,
    ) -> Result<Value, TargetingError> {
        if self.analysis_errors.contains(&company.org_number) {
            return Err(TargetingError::ModelService("analysis failed".to_string()));
        }
        let confidence = self
            .analysis_confidence
            .get(&company.org_number)
            .copied()
            .unwrap_or(0.5);
        Ok(json!({
            "org_number": company.org_number,
            "summary": format!("analyzed {}", company.name),
            "recommendation": "Pursue",
            "confidence": confidence,
            "financial_grade": "B",
            "commercial_grade": "B",
            "operational_grade": "C",
            "next_steps": ["Request detailed ledger"],
            "risks": ["Key-person dependency"],
        }))
    }

    fn backend_name(&self) -> &'static str {
        "fake"
    }
}

async fn test_pool() -> sqlx::AnyPool {
    sqlx::any::install_default_drivers();
    // One connection: an in-memory sqlite database is private to the
    // connection that opened it.
    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE companies (
            org_number TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            industry_code TEXT,
            revenue REAL,
            ebitda_margin REAL,
            net_margin REAL,
            revenue_cagr_3y REAL,
            employees INTEGER
        )",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool
}

async fn insert_company(pool: &sqlx::AnyPool, org: &str, revenue: f64) {
    sqlx::query(
        "INSERT INTO companies (org_number, name, industry_code, revenue, \
         ebitda_margin, net_margin, revenue_cagr_3y, employees) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(org)
    .bind(format!("Company {org}"))
    .bind("62010")
    .bind(revenue)
    .bind(0.10)
    .bind(0.06)
    .bind(0.08)
    .bind(40_i64)
    .execute(pool)
    .await
    .unwrap();
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        shortlist_name: "test-targets".to_string(),
        created_by: "tests".to_string(),
        stage_one_size: 10,
        stage_two_size: 3,
        stage_three_size: 2,
        model_concurrency: 2,
        replacement_policy: ReplacementPolicy::Shrink,
        strategy: None,
    }
}

async fn build_pipeline(
    pool: sqlx::AnyPool,
    model: FakeModel,
    config: PipelineConfig,
) -> TargetingPipeline {
    let fit = StrategicFitAnalyzer::new(InvestmentStrategyConfig::builtin_default());
    let pipeline = TargetingPipeline::new(pool, fit, Arc::new(model), config);
    pipeline.init_tables().await.unwrap();
    pipeline
}

fn criteria_over(min_revenue: f64) -> FilterCriteria {
    let mut criteria = FilterCriteria::unconstrained();
    criteria.min_revenue = min_revenue;
    criteria.description = "test criteria".to_string();
    criteria
}

async fn only_run_id(pool: &sqlx::AnyPool) -> String {
    let row: (String,) = sqlx::query_as("SELECT run_id FROM workflow_runs")
        .fetch_one(pool)
        .await
        .unwrap();
    row.0
}

#[tokio::test]
async fn full_run_completes_with_monotone_stage_counts() {
    let pool = test_pool().await;
    for (i, org) in ["11", "12", "13", "14", "15", "16"].iter().enumerate() {
        insert_company(&pool, org, 60_000_000.0 + i as f64 * 10_000_000.0).await;
    }

    let mut model = FakeModel::default();
    for (org, score) in [("11", 9.0), ("12", 8.0), ("13", 7.0), ("14", 6.0)] {
        model.screening_scores.insert(org.to_string(), score);
    }
    model.analysis_confidence.insert("11".to_string(), 0.6);
    model.analysis_confidence.insert("12".to_string(), 0.9);
    model.analysis_confidence.insert("13".to_string(), 0.3);

    let pipeline = build_pipeline(pool, model, test_config()).await;
    let outcome = pipeline
        .run(&criteria_over(50_000_000.0), &ScoringWeights::default())
        .await
        .unwrap();

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.run.stage1_count, 6);
    assert_eq!(outcome.run.stage2_count, 3);
    assert_eq!(outcome.run.stage3_count, 2);
    assert!(outcome.run.completed_at.is_some());
    assert!(outcome.item_failures.is_empty());

    // Survivors by screening score, not batch arrival order.
    let survivors: Vec<&str> = outcome
        .screening
        .iter()
        .map(|s| s.org_number.as_str())
        .collect();
    assert_eq!(survivors, vec!["11", "12", "13"]);

    // Final output by model confidence.
    let finalists: Vec<&str> = outcome
        .analyses
        .iter()
        .map(|a| a.org_number.as_str())
        .collect();
    assert_eq!(finalists, vec!["12", "11"]);

    let persisted = pipeline
        .run_store()
        .get_run(&outcome.run.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.status, RunStatus::Completed);
    assert_eq!(persisted.stage3_count, 2);
}

#[tokio::test]
async fn fit_flags_precede_model_risks_in_final_records() {
    let pool = test_pool().await;
    // Below the built-in strategy's 20 MSEK revenue floor, so the fit
    // analyzer contributes at least one flag of its own.
    insert_company(&pool, "21", 10_000_000.0).await;

    let mut config = test_config();
    config.stage_two_size = 1;
    config.stage_three_size = 1;
    let pipeline = build_pipeline(pool, FakeModel::default(), config).await;

    let outcome = pipeline
        .run(&criteria_over(1_000_000.0), &ScoringWeights::default())
        .await
        .unwrap();

    let record = &outcome.analyses[0];
    assert!(record.risk_flags.len() >= 2);
    assert!(record.risk_flags[0].contains("below strategy minimum"));
    assert_eq!(
        record.risk_flags.last().map(String::as_str),
        Some("Key-person dependency")
    );
    assert_eq!(record.fit.matched_strategy, "nordic_smb_buyout");
}

#[tokio::test]
async fn empty_filter_result_fails_the_run_at_stage_one() {
    let pool = test_pool().await;
    insert_company(&pool, "31", 5_000_000.0).await;

    let pipeline = build_pipeline(pool.clone(), FakeModel::default(), test_config()).await;
    let err = pipeline
        .run(&criteria_over(50_000_000.0), &ScoringWeights::default())
        .await
        .unwrap_err();

    match err {
        TargetingError::StageExhausted { stage, .. } => assert_eq!(stage, 1),
        other => panic!("unexpected error: {other}"),
    }

    let run_id = only_run_id(&pool).await;
    let run = pipeline.run_store().get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.failure_reason.unwrap().contains("stage 1"));
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn screening_item_failures_shrink_the_survivor_quota() {
    let pool = test_pool().await;
    for org in ["41", "42", "43", "44"] {
        insert_company(&pool, org, 80_000_000.0).await;
    }

    let mut model = FakeModel::default();
    model.screening_errors.insert("44".to_string());

    let pipeline = build_pipeline(pool, model, test_config()).await;
    let outcome = pipeline
        .run(&criteria_over(50_000_000.0), &ScoringWeights::default())
        .await
        .unwrap();

    // Quota 3 minus one failed item leaves two survivors.
    assert_eq!(outcome.screening.len(), 2);
    assert_eq!(outcome.run.stage2_count, 2);
    let failure = outcome
        .item_failures
        .iter()
        .find(|f| f.stage == 2)
        .unwrap();
    assert_eq!(failure.org_number, "44");
}

#[tokio::test]
async fn refill_policy_keeps_the_quota_full() {
    let pool = test_pool().await;
    for org in ["51", "52", "53", "54"] {
        insert_company(&pool, org, 80_000_000.0).await;
    }

    let mut model = FakeModel::default();
    model.screening_errors.insert("54".to_string());

    let mut config = test_config();
    config.replacement_policy = ReplacementPolicy::Refill;
    let pipeline = build_pipeline(pool, model, config).await;
    let outcome = pipeline
        .run(&criteria_over(50_000_000.0), &ScoringWeights::default())
        .await
        .unwrap();

    // Three healthy candidates remain, so the quota stays filled.
    assert_eq!(outcome.screening.len(), 3);
    assert_eq!(outcome.item_failures.len(), 1);
}

#[tokio::test]
async fn screening_failures_never_erase_healthy_survivors() {
    let pool = test_pool().await;
    for i in 1..=10 {
        insert_company(&pool, &format!("9{i:02}"), 60_000_000.0 + i as f64 * 1_000_000.0).await;
    }

    // Four failures against a quota of three would shrink it to zero, but
    // six healthy results remain, so one survivor must come through.
    let mut model = FakeModel::default();
    for org in ["907", "908", "909", "910"] {
        model.screening_errors.insert(org.to_string());
    }

    let pipeline = build_pipeline(pool, model, test_config()).await;
    let outcome = pipeline
        .run(&criteria_over(50_000_000.0), &ScoringWeights::default())
        .await
        .unwrap();

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.screening.len(), 1);
    // Equal screening scores fall back to the composite ranking, so the
    // highest-revenue healthy company takes the slot.
    assert_eq!(outcome.screening[0].org_number, "906");
    assert_eq!(
        outcome.item_failures.iter().filter(|f| f.stage == 2).count(),
        4
    );
}

#[tokio::test]
async fn analysis_failures_never_erase_healthy_records() {
    let pool = test_pool().await;
    for org in ["86", "87", "88"] {
        insert_company(&pool, org, 80_000_000.0).await;
    }

    // Two failures against a quota of two; the one healthy record stays.
    let mut model = FakeModel::default();
    model.analysis_errors.insert("86".to_string());
    model.analysis_errors.insert("87".to_string());

    let pipeline = build_pipeline(pool, model, test_config()).await;
    let outcome = pipeline
        .run(&criteria_over(50_000_000.0), &ScoringWeights::default())
        .await
        .unwrap();

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.analyses.len(), 1);
    assert_eq!(outcome.analyses[0].org_number, "88");
    assert_eq!(outcome.run.stage3_count, 1);
}

#[tokio::test]
async fn stage_three_total_failure_preserves_screening_rows() {
    let pool = test_pool().await;
    for org in ["61", "62", "63"] {
        insert_company(&pool, org, 80_000_000.0).await;
    }

    let mut model = FakeModel::default();
    for org in ["61", "62", "63"] {
        model.analysis_errors.insert(org.to_string());
    }

    let pipeline = build_pipeline(pool.clone(), model, test_config()).await;
    let err = pipeline
        .run(&criteria_over(50_000_000.0), &ScoringWeights::default())
        .await
        .unwrap_err();

    match err {
        TargetingError::StageExhausted { stage, .. } => assert_eq!(stage, 3),
        other => panic!("unexpected error: {other}"),
    }

    // Stage-2 output was persisted before stage 3 ran and survives the
    // failure untouched.
    let run_id = only_run_id(&pool).await;
    let screening = pipeline
        .run_store()
        .get_screening_results(&run_id)
        .await
        .unwrap();
    assert_eq!(screening.len(), 3);

    let run = pipeline.run_store().get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.stage2_count, 3);
    assert_eq!(run.stage3_count, 0);
}

#[tokio::test]
async fn cancellation_between_stages_fails_the_run() {
    let pool = test_pool().await;
    insert_company(&pool, "71", 80_000_000.0).await;

    let (_tx, rx) = watch::channel(true);
    let pipeline = build_pipeline(pool.clone(), FakeModel::default(), test_config())
        .await
        .with_cancellation(rx);

    let err = pipeline
        .run(&criteria_over(50_000_000.0), &ScoringWeights::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TargetingError::Cancelled));

    // Checked after stage 1, so the shortlist exists but screening never ran.
    let run_id = only_run_id(&pool).await;
    let run = pipeline.run_store().get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.stage1_count, 1);
    assert_eq!(run.stage2_count, 0);
    assert!(run.failure_reason.unwrap().contains("cancelled"));

    let screening = pipeline
        .run_store()
        .get_screening_results(&run_id)
        .await
        .unwrap();
    assert!(screening.is_empty());
}

#[tokio::test]
async fn repeated_audit_inserts_do_not_duplicate_rows() {
    let pool = test_pool().await;
    let store = RunStore::new(pool);
    store.init_tables().await.unwrap();

    let result = ScreeningResult {
        run_id: "run-1".to_string(),
        org_number: "81".to_string(),
        company_name: "Company 81".to_string(),
        score: 7.0,
        risk: targeting_core::RiskFlag::Low,
        summary: "ok".to_string(),
        raw_response: json!({"org_number": "81"}),
        generated_at: Utc::now(),
    };
    store.save_screening_results(&[result.clone()]).await.unwrap();
    store.save_screening_results(&[result]).await.unwrap();

    let rows = store.get_screening_results("run-1").await.unwrap();
    assert_eq!(rows.len(), 1);
}
