use serde_json::Value;
use targeting_core::{RiskFlag, TargetingError};

/// Parsed per-company screening payload.
#[derive(Debug, Clone)]
pub struct ScreeningItem {
    pub org_number: String,
    pub score: f64,
    pub risk: RiskFlag,
    pub summary: String,
    /// The untouched payload, kept for the audit row.
    pub raw: Value,
}

impl ScreeningItem {
    /// Parse one entry of the batched screening response.
    ///
    /// An explicit `error` field, a missing org number, or an out-of-contract
    /// score/risk all yield an error carrying whatever org number could be
    /// recovered, so the caller can record a per-item failure.
    pub fn from_value(value: &Value) -> Result<Self, (Option<String>, TargetingError)> {
        let org_number = value
            .get("org_number")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        if let Some(msg) = value.get("error").and_then(|v| v.as_str()) {
            return Err((
                org_number,
                TargetingError::ModelService(msg.to_string()),
            ));
        }

        let org_number = match org_number {
            Some(o) if !o.is_empty() => o,
            _ => {
                return Err((
                    None,
                    TargetingError::InvalidResponse(
                        "screening item missing org_number".to_string(),
                    ),
                ))
            }
        };

        let score = match value.get("score").and_then(|v| v.as_f64()) {
            Some(s) if s.is_finite() => s,
            _ => {
                return Err((
                    Some(org_number),
                    TargetingError::InvalidResponse(
                        "screening item missing numeric score".to_string(),
                    ),
                ))
            }
        };

        let risk = match value
            .get("risk")
            .and_then(|v| v.as_str())
            .and_then(RiskFlag::parse)
        {
            Some(r) => r,
            None => {
                return Err((
                    Some(org_number),
                    TargetingError::InvalidResponse(
                        "screening item risk outside Low|Medium|High".to_string(),
                    ),
                ))
            }
        };

        let summary = value
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        Ok(Self {
            org_number,
            score,
            risk,
            summary,
            raw: value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_well_formed_item() {
        let v = json!({
            "org_number": "5560001234",
            "score": 7.5,
            "risk": "Medium",
            "summary": "Stable niche manufacturer"
        });
        let item = ScreeningItem::from_value(&v).unwrap();
        assert_eq!(item.org_number, "5560001234");
        assert_eq!(item.risk, RiskFlag::Medium);
        assert_eq!(item.raw, v);
    }

    #[test]
    fn explicit_error_field_becomes_item_failure() {
        let v = json!({ "org_number": "5560001234", "error": "context too long" });
        let err = ScreeningItem::from_value(&v).unwrap_err();
        assert_eq!(err.0.as_deref(), Some("5560001234"));
    }

    #[test]
    fn unknown_risk_is_rejected() {
        let v = json!({ "org_number": "1", "score": 5.0, "risk": "Severe" });
        assert!(ScreeningItem::from_value(&v).is_err());
    }

    #[test]
    fn missing_org_number_is_rejected() {
        let v = json!({ "score": 5.0, "risk": "Low" });
        let err = ScreeningItem::from_value(&v).unwrap_err();
        assert!(err.0.is_none());
    }
}
