use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;

use model_client::ModelConfig;
use pipeline_orchestrator::{PipelineConfig, ReplacementPolicy};
use targeting_core::ScoringWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Pipeline sizes
    pub stage_one_size: usize,       // 50
    pub stage_two_size: usize,       // 20
    pub stage_three_size: usize,     // 5
    pub model_concurrency: usize,    // 4
    pub refill_failed_slots: bool,   // false = failures shrink the quota

    // Scoring weights (relative, normalized at ranking time)
    pub weight_revenue: f64,         // 30
    pub weight_ebit_margin: f64,     // 25
    pub weight_growth: f64,          // 25
    pub weight_leverage: f64,        // 10
    pub weight_headcount: f64,       // 10

    // Strategy selection
    pub strategy: Option<String>,

    // Run identity
    pub shortlist_name: String,
    pub created_by: String,

    // External services
    pub model_service_url: String,   // http://localhost:8010
    pub retrieval_service_url: Option<String>,
    pub model_timeout_seconds: u64,  // 30

    // Database
    pub database_url: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let service_defaults = ModelConfig::default();
        let config = Self {
            stage_one_size: env::var("STAGE_ONE_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            stage_two_size: env::var("STAGE_TWO_SIZE")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            stage_three_size: env::var("STAGE_THREE_SIZE")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            model_concurrency: env::var("MODEL_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,
            refill_failed_slots: env::var("REFILL_FAILED_SLOTS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,

            weight_revenue: env::var("WEIGHT_REVENUE")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            weight_ebit_margin: env::var("WEIGHT_EBIT_MARGIN")
                .unwrap_or_else(|_| "25".to_string())
                .parse()?,
            weight_growth: env::var("WEIGHT_GROWTH")
                .unwrap_or_else(|_| "25".to_string())
                .parse()?,
            weight_leverage: env::var("WEIGHT_LEVERAGE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            weight_headcount: env::var("WEIGHT_HEADCOUNT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            strategy: env::var("TARGET_STRATEGY").ok(),

            shortlist_name: env::var("SHORTLIST_NAME")
                .unwrap_or_else(|_| "acquisition-targets".to_string()),
            created_by: env::var("CREATED_BY")
                .unwrap_or_else(|_| "targeting-agent".to_string()),

            model_service_url: service_defaults.model_service_url,
            retrieval_service_url: env::var("RETRIEVAL_SERVICE_URL").ok(),
            model_timeout_seconds: match env::var("MODEL_TIMEOUT_SECONDS") {
                Ok(v) => v.parse()?,
                Err(_) => service_defaults.timeout.as_secs(),
            },

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:targeting.db".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.stage_one_size == 0 || self.stage_two_size == 0 || self.stage_three_size == 0 {
            bail!("stage sizes must all be at least 1");
        }
        if self.stage_three_size > self.stage_two_size
            || self.stage_two_size > self.stage_one_size
        {
            bail!(
                "stage sizes must narrow: {} >= {} >= {} required",
                self.stage_one_size,
                self.stage_two_size,
                self.stage_three_size
            );
        }
        if self.model_concurrency == 0 {
            bail!("MODEL_CONCURRENCY must be at least 1");
        }
        if self.model_timeout_seconds == 0 {
            bail!("MODEL_TIMEOUT_SECONDS must be at least 1");
        }
        let weights = [
            self.weight_revenue,
            self.weight_ebit_margin,
            self.weight_growth,
            self.weight_leverage,
            self.weight_headcount,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            bail!("scoring weights must be finite and non-negative");
        }
        Ok(())
    }

    pub fn scoring_weights(&self) -> ScoringWeights {
        ScoringWeights {
            revenue: self.weight_revenue,
            ebit_margin: self.weight_ebit_margin,
            growth: self.weight_growth,
            leverage: self.weight_leverage,
            headcount: self.weight_headcount,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            shortlist_name: self.shortlist_name.clone(),
            created_by: self.created_by.clone(),
            stage_one_size: self.stage_one_size,
            stage_two_size: self.stage_two_size,
            stage_three_size: self.stage_three_size,
            model_concurrency: self.model_concurrency,
            replacement_policy: if self.refill_failed_slots {
                ReplacementPolicy::Refill
            } else {
                ReplacementPolicy::Shrink
            },
            strategy: self.strategy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AgentConfig {
        AgentConfig {
            stage_one_size: 50,
            stage_two_size: 20,
            stage_three_size: 5,
            model_concurrency: 4,
            refill_failed_slots: false,
            weight_revenue: 30.0,
            weight_ebit_margin: 25.0,
            weight_growth: 25.0,
            weight_leverage: 10.0,
            weight_headcount: 10.0,
            strategy: None,
            shortlist_name: "t".to_string(),
            created_by: "t".to_string(),
            model_service_url: "http://localhost:8010".to_string(),
            retrieval_service_url: None,
            model_timeout_seconds: 30,
            database_url: "sqlite::memory:".to_string(),
        }
    }

    #[test]
    fn narrowing_sizes_pass_validation() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn widening_sizes_fail_fast() {
        let mut config = base();
        config.stage_two_size = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_stage_size_fails_fast() {
        let mut config = base();
        config.stage_three_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_weight_fails_fast() {
        let mut config = base();
        config.weight_growth = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn shrink_is_the_default_replacement_policy() {
        assert_eq!(
            base().pipeline_config().replacement_policy,
            ReplacementPolicy::Shrink
        );
    }
}
