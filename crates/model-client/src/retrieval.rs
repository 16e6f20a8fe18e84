use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use targeting_core::TargetingError;

const CACHE_TTL_SECS: i64 = 300; // 5 minutes

/// Supplies grounding text for model prompts.
///
/// Contract: never fails. Unavailability degrades to an empty string so the
/// pipeline stays correct without the retrieval service.
#[async_trait]
pub trait GroundingProvider: Send + Sync {
    async fn context(&self, query: &str) -> String;
}

struct CacheEntry {
    text: String,
    cached_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct RetrievalRequest<'a> {
    query: &'a str,
    max_snippets: usize,
}

/// HTTP client for the vector-retrieval service, with a short TTL cache so
/// repeated lookups for the same company or vocabulary term stay cheap.
pub struct RetrievalClient {
    client: reqwest::Client,
    base_url: String,
    max_snippets: usize,
    cache: DashMap<String, CacheEntry>,
}

impl RetrievalClient {
    pub fn new(
        base_url: String,
        timeout: Duration,
        max_snippets: usize,
    ) -> Result<Self, TargetingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TargetingError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            max_snippets,
            cache: DashMap::new(),
        })
    }

    async fn fetch(&self, query: &str) -> Result<String, reqwest::Error> {
        let request = RetrievalRequest {
            query,
            max_snippets: self.max_snippets,
        };

        let response = self
            .client
            .post(format!("{}/v1/retrieve", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        let snippets: Vec<&str> = body
            .get("snippets")
            .and_then(|s| s.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        Ok(snippets.join("\n"))
    }
}

#[async_trait]
impl GroundingProvider for RetrievalClient {
    async fn context(&self, query: &str) -> String {
        if let Some(entry) = self.cache.get(query) {
            let age = (Utc::now() - entry.cached_at).num_seconds();
            if age < CACHE_TTL_SECS {
                return entry.text.clone();
            }
        }

        match self.fetch(query).await {
            Ok(text) => {
                self.cache.insert(
                    query.to_string(),
                    CacheEntry {
                        text: text.clone(),
                        cached_at: Utc::now(),
                    },
                );
                text
            }
            Err(e) => {
                tracing::warn!("Retrieval service unavailable for {:?}: {}", query, e);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_applies_the_configured_timeout() {
        let client = RetrievalClient::new(
            "http://localhost:8011".to_string(),
            Duration::from_secs(5),
            3,
        );
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn unreachable_service_degrades_to_empty_context() {
        let client = RetrievalClient::new(
            "http://127.0.0.1:9".to_string(),
            Duration::from_secs(1),
            3,
        )
        .unwrap();
        assert_eq!(client.context("Bolag AB").await, "");
    }
}
