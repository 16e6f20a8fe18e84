use chrono::{DateTime, Utc};
use targeting_core::{
    CompanyAnalysisRecord, Grade, Recommendation, RiskFlag, RunStatus, ScreeningResult,
    StrategicFitResult, TargetingError, WorkflowRun,
};

/// Persists run audit rows and per-stage model outputs.
///
/// Screening and analysis rows are keyed by (run_id, org_number) and
/// inserted with conflict-ignore, so retrying a batch under the same run id
/// never duplicates audit rows.
pub struct RunStore {
    pool: sqlx::AnyPool,
}

fn db_err(e: impl std::fmt::Display) -> TargetingError {
    TargetingError::Database(e.to_string())
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, TargetingError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TargetingError::InvalidResponse(format!("{column} column: {e}")))
}

impl RunStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> Result<(), TargetingError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workflow_runs (
                run_id TEXT PRIMARY KEY,
                created_by TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                stage1_count INTEGER NOT NULL,
                stage2_count INTEGER NOT NULL,
                stage3_count INTEGER NOT NULL,
                failure_reason TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS screening_results (
                run_id TEXT NOT NULL,
                org_number TEXT NOT NULL,
                company_name TEXT NOT NULL,
                score REAL NOT NULL,
                risk TEXT NOT NULL,
                summary TEXT NOT NULL,
                raw_json TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                PRIMARY KEY (run_id, org_number)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS company_analyses (
                run_id TEXT NOT NULL,
                org_number TEXT NOT NULL,
                company_name TEXT NOT NULL,
                summary TEXT NOT NULL,
                recommendation TEXT NOT NULL,
                confidence REAL NOT NULL,
                financial_grade TEXT NOT NULL,
                commercial_grade TEXT NOT NULL,
                operational_grade TEXT NOT NULL,
                next_steps_json TEXT NOT NULL,
                risk_flags_json TEXT NOT NULL,
                fit_json TEXT NOT NULL,
                raw_json TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                PRIMARY KEY (run_id, org_number)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    pub async fn create_run(&self, run: &WorkflowRun) -> Result<(), TargetingError> {
        sqlx::query(
            "INSERT INTO workflow_runs (run_id, created_by, status, started_at, completed_at, \
             stage1_count, stage2_count, stage3_count, failure_reason) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.run_id)
        .bind(&run.created_by)
        .bind(run.status.as_str())
        .bind(run.started_at.to_rfc3339())
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .bind(run.stage1_count)
        .bind(run.stage2_count)
        .bind(run.stage3_count)
        .bind(&run.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Update the live run row. Historical (terminal) runs are never touched
    /// again; the orchestrator creates a fresh run per invocation.
    pub async fn update_run(&self, run: &WorkflowRun) -> Result<(), TargetingError> {
        sqlx::query(
            "UPDATE workflow_runs SET status = ?, completed_at = ?, stage1_count = ?, \
             stage2_count = ?, stage3_count = ?, failure_reason = ? WHERE run_id = ?",
        )
        .bind(run.status.as_str())
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .bind(run.stage1_count)
        .bind(run.stage2_count)
        .bind(run.stage3_count)
        .bind(&run.failure_reason)
        .bind(&run.run_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<WorkflowRun>, TargetingError> {
        let row: Option<(
            String,
            String,
            String,
            String,
            Option<String>,
            i64,
            i64,
            i64,
            Option<String>,
        )> = sqlx::query_as(
            "SELECT run_id, created_by, status, started_at, completed_at, stage1_count, \
             stage2_count, stage3_count, failure_reason FROM workflow_runs WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status = RunStatus::parse(&row.2).ok_or_else(|| {
            TargetingError::InvalidResponse(format!("unknown run status {:?}", row.2))
        })?;

        Ok(Some(WorkflowRun {
            run_id: row.0,
            created_by: row.1,
            status,
            started_at: parse_timestamp(&row.3, "started_at")?,
            completed_at: row
                .4
                .as_deref()
                .map(|t| parse_timestamp(t, "completed_at"))
                .transpose()?,
            stage1_count: row.5,
            stage2_count: row.6,
            stage3_count: row.7,
            failure_reason: row.8,
        }))
    }

    /// Most recent runs first, for inspection tooling.
    pub async fn list_runs(&self, limit: i64) -> Result<Vec<WorkflowRun>, TargetingError> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT run_id FROM workflow_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut runs = Vec::with_capacity(ids.len());
        for (run_id,) in ids {
            if let Some(run) = self.get_run(&run_id).await? {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    pub async fn save_screening_results(
        &self,
        results: &[ScreeningResult],
    ) -> Result<(), TargetingError> {
        for result in results {
            sqlx::query(
                "INSERT INTO screening_results (run_id, org_number, company_name, score, risk, \
                 summary, raw_json, generated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (run_id, org_number) DO NOTHING",
            )
            .bind(&result.run_id)
            .bind(&result.org_number)
            .bind(&result.company_name)
            .bind(result.score)
            .bind(result.risk.to_label())
            .bind(&result.summary)
            .bind(result.raw_response.to_string())
            .bind(result.generated_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    pub async fn get_screening_results(
        &self,
        run_id: &str,
    ) -> Result<Vec<ScreeningResult>, TargetingError> {
        let rows: Vec<(String, String, String, f64, String, String, String, String)> =
            sqlx::query_as(
                "SELECT run_id, org_number, company_name, score, risk, summary, raw_json, \
                 generated_at FROM screening_results WHERE run_id = ? \
                 ORDER BY score DESC, org_number ASC",
            )
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let risk = RiskFlag::parse(&row.4).ok_or_else(|| {
                    TargetingError::InvalidResponse(format!("unknown risk flag {:?}", row.4))
                })?;
                Ok(ScreeningResult {
                    run_id: row.0,
                    org_number: row.1,
                    company_name: row.2,
                    score: row.3,
                    risk,
                    summary: row.5,
                    raw_response: serde_json::from_str(&row.6)
                        .unwrap_or(serde_json::Value::Null),
                    generated_at: parse_timestamp(&row.7, "generated_at")?,
                })
            })
            .collect()
    }

    pub async fn save_analysis_records(
        &self,
        records: &[CompanyAnalysisRecord],
    ) -> Result<(), TargetingError> {
        for record in records {
            let next_steps = serde_json::to_string(&record.next_steps).map_err(db_err)?;
            let risk_flags = serde_json::to_string(&record.risk_flags).map_err(db_err)?;
            let fit = serde_json::to_string(&record.fit).map_err(db_err)?;

            sqlx::query(
                "INSERT INTO company_analyses (run_id, org_number, company_name, summary, \
                 recommendation, confidence, financial_grade, commercial_grade, \
                 operational_grade, next_steps_json, risk_flags_json, fit_json, raw_json, \
                 generated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (run_id, org_number) DO NOTHING",
            )
            .bind(&record.run_id)
            .bind(&record.org_number)
            .bind(&record.company_name)
            .bind(&record.summary)
            .bind(record.recommendation.to_label())
            .bind(record.confidence)
            .bind(record.financial_grade.to_label())
            .bind(record.commercial_grade.to_label())
            .bind(record.operational_grade.to_label())
            .bind(&next_steps)
            .bind(&risk_flags)
            .bind(&fit)
            .bind(record.raw_response.to_string())
            .bind(record.generated_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    pub async fn get_analysis_records(
        &self,
        run_id: &str,
    ) -> Result<Vec<CompanyAnalysisRecord>, TargetingError> {
        type Row = (
            String,
            String,
            String,
            String,
            String,
            f64,
            String,
            String,
            String,
            String,
            String,
            String,
            String,
            String,
        );
        let rows: Vec<Row> = sqlx::query_as(
            "SELECT run_id, org_number, company_name, summary, recommendation, confidence, \
             financial_grade, commercial_grade, operational_grade, next_steps_json, \
             risk_flags_json, fit_json, raw_json, generated_at \
             FROM company_analyses WHERE run_id = ? \
             ORDER BY confidence DESC, org_number ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let recommendation = Recommendation::parse(&row.4).ok_or_else(|| {
                    TargetingError::InvalidResponse(format!(
                        "unknown recommendation {:?}",
                        row.4
                    ))
                })?;
                let grade = |raw: &str| {
                    Grade::parse(raw).ok_or_else(|| {
                        TargetingError::InvalidResponse(format!("unknown grade {raw:?}"))
                    })
                };
                let next_steps: Vec<String> =
                    serde_json::from_str(&row.9).map_err(db_err)?;
                let risk_flags: Vec<String> =
                    serde_json::from_str(&row.10).map_err(db_err)?;
                let fit: StrategicFitResult = serde_json::from_str(&row.11).map_err(db_err)?;

                Ok(CompanyAnalysisRecord {
                    run_id: row.0,
                    org_number: row.1,
                    company_name: row.2,
                    summary: row.3,
                    recommendation,
                    confidence: row.5,
                    financial_grade: grade(&row.6)?,
                    commercial_grade: grade(&row.7)?,
                    operational_grade: grade(&row.8)?,
                    next_steps,
                    risk_flags,
                    fit,
                    raw_response: serde_json::from_str(&row.12)
                        .unwrap_or(serde_json::Value::Null),
                    generated_at: parse_timestamp(&row.13, "generated_at")?,
                })
            })
            .collect()
    }
}
