use chrono::{DateTime, Utc};
use targeting_core::{ScoringWeights, Shortlist, ShortlistEntry, TargetingError};

/// Persists shortlists with their originating parameters so a ranking is
/// reproducible later. Append-only: a new run writes a new row and
/// supersedes the old one, historical rows are never updated.
pub struct ShortlistStore {
    pool: sqlx::AnyPool,
}

impl ShortlistStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> Result<(), TargetingError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS shortlists (
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                weights_json TEXT NOT NULL,
                stage_one_size INTEGER NOT NULL,
                companies_json TEXT NOT NULL,
                total_companies INTEGER NOT NULL,
                status TEXT NOT NULL,
                generated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TargetingError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn save(&self, shortlist: &Shortlist) -> Result<(), TargetingError> {
        let weights_json = serde_json::to_string(&shortlist.weights)
            .map_err(|e| TargetingError::Database(e.to_string()))?;
        let companies_json = serde_json::to_string(&shortlist.companies)
            .map_err(|e| TargetingError::Database(e.to_string()))?;

        sqlx::query(
            "INSERT INTO shortlists (name, description, weights_json, stage_one_size, \
             companies_json, total_companies, status, generated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&shortlist.name)
        .bind(&shortlist.description)
        .bind(&weights_json)
        .bind(shortlist.stage_one_size as i64)
        .bind(&companies_json)
        .bind(shortlist.total_companies as i64)
        .bind(&shortlist.status)
        .bind(shortlist.generated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| TargetingError::Database(e.to_string()))?;

        tracing::info!(
            "Persisted shortlist {:?} with {} companies",
            shortlist.name,
            shortlist.companies.len()
        );
        Ok(())
    }

    /// The most recently generated shortlist under `name`, if any.
    pub async fn load_latest(&self, name: &str) -> Result<Option<Shortlist>, TargetingError> {
        let row: Option<(String, String, String, i64, String, i64, String, String)> =
            sqlx::query_as(
                "SELECT name, description, weights_json, stage_one_size, companies_json, \
                 total_companies, status, generated_at \
                 FROM shortlists WHERE name = ? ORDER BY generated_at DESC LIMIT 1",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TargetingError::Database(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let weights: ScoringWeights = serde_json::from_str(&row.2)
            .map_err(|e| TargetingError::InvalidResponse(format!("weights column: {e}")))?;
        let companies: Vec<ShortlistEntry> = serde_json::from_str(&row.4)
            .map_err(|e| TargetingError::InvalidResponse(format!("companies column: {e}")))?;
        let generated_at = DateTime::parse_from_rfc3339(&row.7)
            .map_err(|e| TargetingError::InvalidResponse(format!("generated_at column: {e}")))?
            .with_timezone(&Utc);

        Ok(Some(Shortlist {
            name: row.0,
            description: row.1,
            weights,
            stage_one_size: row.3 as usize,
            companies,
            total_companies: row.5 as usize,
            status: row.6,
            generated_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RankingEngine;
    use targeting_core::CompanyRecord;

    async fn store() -> ShortlistStore {
        sqlx::any::install_default_drivers();
        // One connection: an in-memory sqlite database is private to the
        // connection that opened it.
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = ShortlistStore::new(pool);
        store.init_tables().await.unwrap();
        store
    }

    fn companies() -> Vec<CompanyRecord> {
        (1..=4)
            .map(|i| CompanyRecord {
                org_number: format!("55600000{i}"),
                name: format!("Bolag {i} AB"),
                industry_code: Some("62010".to_string()),
                revenue: Some(i as f64 * 10_000_000.0),
                ebitda_margin: Some(0.02 * i as f64),
                net_margin: Some(0.01 * i as f64),
                revenue_cagr_3y: Some(0.03 * i as f64),
                employees: Some(10 * i),
            })
            .collect()
    }

    #[tokio::test]
    async fn round_trips_weights_size_and_order() {
        let store = store().await;
        let weights = ScoringWeights {
            revenue: 40.0,
            ebit_margin: 20.0,
            growth: 20.0,
            leverage: 10.0,
            headcount: 10.0,
        };
        let shortlist =
            RankingEngine::build_shortlist("q3-screen", "test run", &companies(), &weights, 3);
        store.save(&shortlist).await.unwrap();

        let loaded = store.load_latest("q3-screen").await.unwrap().unwrap();
        assert_eq!(loaded.weights, weights);
        assert_eq!(loaded.stage_one_size, 3);
        assert_eq!(loaded.total_companies, 4);
        let saved_order: Vec<&str> = shortlist
            .companies
            .iter()
            .map(|e| e.org_number.as_str())
            .collect();
        let loaded_order: Vec<&str> = loaded
            .companies
            .iter()
            .map(|e| e.org_number.as_str())
            .collect();
        assert_eq!(saved_order, loaded_order);
    }

    #[tokio::test]
    async fn newer_shortlist_supersedes_without_overwrite() {
        let store = store().await;
        let weights = ScoringWeights::default();
        let mut first =
            RankingEngine::build_shortlist("rolling", "first", &companies(), &weights, 2);
        first.generated_at = Utc::now() - chrono::Duration::minutes(5);
        store.save(&first).await.unwrap();

        let second = RankingEngine::build_shortlist("rolling", "second", &companies(), &weights, 2);
        store.save(&second).await.unwrap();

        let latest = store.load_latest("rolling").await.unwrap().unwrap();
        assert_eq!(latest.description, "second");
    }

    #[tokio::test]
    async fn missing_name_returns_none() {
        let store = store().await;
        assert!(store.load_latest("nope").await.unwrap().is_none());
    }
}
