pub mod analysis;
pub mod provider;
pub mod retrieval;
pub mod screening;

pub use analysis::AnalysisItem;
pub use provider::ModelProvider;
pub use retrieval::{GroundingProvider, RetrievalClient};
pub use screening::ScreeningItem;

use std::time::Duration;

use serde::Serialize;
use targeting_core::{CompanyContext, TargetingError};

/// Configuration for the external model and retrieval services.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_service_url: String,
    pub retrieval_service_url: String,
    pub timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_service_url: std::env::var("MODEL_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8010".to_string()),
            retrieval_service_url: std::env::var("RETRIEVAL_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8011".to_string()),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ScreeningRequest<'a> {
    run_id: &'a str,
    companies: &'a [CompanyContext],
}

#[derive(Debug, Clone, Serialize)]
struct AnalysisRequest<'a> {
    run_id: &'a str,
    company: &'a CompanyContext,
}

/// HTTP client for the external language-model service.
///
/// The contract is narrow: one batched screening endpoint and one
/// per-company deep-analysis endpoint, both keyed by the run id so
/// batch-level retries stay idempotent on the audit side.
#[derive(Clone)]
pub struct ModelServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl ModelServiceClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, TargetingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TargetingError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    /// One batched screening call for a whole run. Returns the raw
    /// per-company payloads; callers parse each item individually so one
    /// malformed entry never poisons the batch.
    pub async fn screen_batch(
        &self,
        run_id: &str,
        companies: &[CompanyContext],
    ) -> Result<Vec<serde_json::Value>, TargetingError> {
        let request = ScreeningRequest { run_id, companies };

        let response = self
            .client
            .post(format!("{}/v1/screening", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| TargetingError::ModelService(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TargetingError::ModelService(format!(
                "screening returned status {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TargetingError::InvalidResponse(e.to_string()))?;

        match body.get("results").and_then(|r| r.as_array()) {
            Some(items) => Ok(items.clone()),
            None => Err(TargetingError::InvalidResponse(
                "screening response missing `results` array".to_string(),
            )),
        }
    }

    /// Structured deep analysis for one company.
    pub async fn deep_analyze(
        &self,
        run_id: &str,
        company: &CompanyContext,
    ) -> Result<serde_json::Value, TargetingError> {
        let request = AnalysisRequest { run_id, company };

        let response = self
            .client
            .post(format!("{}/v1/analysis", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| TargetingError::ModelService(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TargetingError::ModelService(format!(
                "analysis returned status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| TargetingError::InvalidResponse(e.to_string()))
    }
}
