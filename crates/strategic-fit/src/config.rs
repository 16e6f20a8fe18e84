use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use targeting_core::TargetingError;

pub const CONFIG_PATH_ENV: &str = "STRATEGY_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "strategies.json";

/// Threshold and preference parameters for one named investment strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyProfile {
    pub revenue_min: f64,
    pub revenue_max: f64,
    pub ebitda_margin_min: f64,
    pub growth_min: f64,
    #[serde(default)]
    pub preferred_keywords: Vec<String>,
    #[serde(default)]
    pub default_upside: String,
}

/// Externally loaded strategy configuration. Loaded once at analyzer
/// construction; any load failure falls back to the built-in default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentStrategyConfig {
    pub default_strategy: String,
    pub strategies: HashMap<String, StrategyProfile>,
}

impl InvestmentStrategyConfig {
    /// Safe built-in fallback used when no config file is available.
    pub fn builtin_default() -> Self {
        let (default_name, default_profile) = Self::builtin_default_profile();
        let mut strategies = HashMap::new();
        strategies.insert(default_name.clone(), default_profile);
        strategies.insert(
            "growth_equity".to_string(),
            StrategyProfile {
                revenue_min: 50_000_000.0,
                revenue_max: 2_000_000_000.0,
                ebitda_margin_min: 0.0,
                growth_min: 0.15,
                preferred_keywords: vec!["saas".to_string(), "subscription".to_string()],
                default_upside: "Scale through commercial acceleration".to_string(),
            },
        );
        Self {
            default_strategy: default_name,
            strategies,
        }
    }

    fn builtin_default_profile() -> (String, StrategyProfile) {
        (
            "nordic_smb_buyout".to_string(),
            StrategyProfile {
                revenue_min: 20_000_000.0,
                revenue_max: 500_000_000.0,
                ebitda_margin_min: 0.05,
                growth_min: 0.03,
                preferred_keywords: vec![
                    "niche".to_string(),
                    "recurring".to_string(),
                    "software".to_string(),
                    "service contracts".to_string(),
                ],
                default_upside: "Consolidation platform in a fragmented market".to_string(),
            },
        )
    }

    pub fn load(path: &Path) -> Result<Self, TargetingError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TargetingError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| TargetingError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `STRATEGY_CONFIG_PATH` (default `strategies.json`), falling
    /// back to the built-in default on any failure. Config errors are logged
    /// and never surfaced to the caller.
    pub fn load_or_default() -> Self {
        let path = std::env::var(CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        match Self::load(Path::new(&path)) {
            Ok(config) => {
                tracing::info!(
                    "Loaded {} strategies from {}",
                    config.strategies.len(),
                    path
                );
                config
            }
            Err(e) => {
                tracing::warn!("Strategy config unavailable ({e}), using built-in default");
                Self::builtin_default()
            }
        }
    }

    fn validate(&self) -> Result<(), TargetingError> {
        if !self.strategies.contains_key(&self.default_strategy) {
            return Err(TargetingError::Config(format!(
                "default strategy {:?} not present in strategies map",
                self.default_strategy
            )));
        }
        for (name, profile) in &self.strategies {
            if profile.revenue_min > profile.revenue_max {
                return Err(TargetingError::Config(format!(
                    "strategy {name:?}: revenue_min exceeds revenue_max"
                )));
            }
        }
        Ok(())
    }

    /// The profile for `key`, or the default profile with a warning when the
    /// key is unknown. Never fails: a config whose default strategy is
    /// missing from the map falls back to the built-in default profile.
    pub fn profile_for(&self, key: Option<&str>) -> (String, StrategyProfile) {
        if let Some(key) = key {
            if let Some((name, profile)) = self.strategies.get_key_value(key) {
                return (name.clone(), profile.clone());
            }
            tracing::warn!(
                "Unknown strategy {:?}, falling back to default {:?}",
                key,
                self.default_strategy
            );
        }
        if let Some(profile) = self.strategies.get(&self.default_strategy) {
            return (self.default_strategy.clone(), profile.clone());
        }
        tracing::warn!(
            "Default strategy {:?} missing from map, using the built-in profile",
            self.default_strategy
        );
        Self::builtin_default_profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_default_is_internally_consistent() {
        let config = InvestmentStrategyConfig::builtin_default();
        assert!(config.validate().is_ok());
        assert!(config.strategies.contains_key(&config.default_strategy));
    }

    #[test]
    fn unknown_key_falls_back_to_default() {
        let config = InvestmentStrategyConfig::builtin_default();
        let (name, _) = config.profile_for(Some("does_not_exist"));
        assert_eq!(name, "nordic_smb_buyout");
    }

    #[test]
    fn known_key_is_used_directly() {
        let config = InvestmentStrategyConfig::builtin_default();
        let (name, profile) = config.profile_for(Some("growth_equity"));
        assert_eq!(name, "growth_equity");
        assert_eq!(profile.growth_min, 0.15);
    }

    #[test]
    fn missing_default_strategy_falls_back_to_builtin_profile() {
        let config = InvestmentStrategyConfig {
            default_strategy: "gone".to_string(),
            strategies: HashMap::new(),
        };
        let (name, profile) = config.profile_for(None);
        assert_eq!(name, "nordic_smb_buyout");
        assert_eq!(profile.revenue_min, 20_000_000.0);
    }

    #[test]
    fn inverted_revenue_bounds_fail_validation() {
        let mut config = InvestmentStrategyConfig::builtin_default();
        config
            .strategies
            .get_mut("growth_equity")
            .unwrap()
            .revenue_min = 1e12;
        assert!(config.validate().is_err());
    }
}
