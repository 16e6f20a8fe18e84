use async_trait::async_trait;
use serde_json::Value;
use targeting_core::{CompanyContext, TargetingError};

use crate::ModelServiceClient;

/// Backend-agnostic interface for the external model service.
///
/// Implemented by the HTTP client here and by in-process fakes in tests.
/// Both methods return raw payloads; per-item parsing and failure handling
/// stay with the caller.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// One batched coarse-screening request for a whole run.
    async fn screen_batch(
        &self,
        run_id: &str,
        companies: &[CompanyContext],
    ) -> Result<Vec<Value>, TargetingError>;

    /// Structured deep analysis for a single company.
    async fn deep_analyze(
        &self,
        run_id: &str,
        company: &CompanyContext,
    ) -> Result<Value, TargetingError>;

    fn backend_name(&self) -> &'static str;
}

#[async_trait]
impl ModelProvider for ModelServiceClient {
    async fn screen_batch(
        &self,
        run_id: &str,
        companies: &[CompanyContext],
    ) -> Result<Vec<Value>, TargetingError> {
        ModelServiceClient::screen_batch(self, run_id, companies).await
    }

    async fn deep_analyze(
        &self,
        run_id: &str,
        company: &CompanyContext,
    ) -> Result<Value, TargetingError> {
        ModelServiceClient::deep_analyze(self, run_id, company).await
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
