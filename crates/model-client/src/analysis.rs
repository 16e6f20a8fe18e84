use serde_json::Value;
use targeting_core::{Grade, Recommendation, TargetingError};

/// Parsed deep-analysis payload for one company.
///
/// Confidence and grades are advisory model output and are passed through
/// exactly as reported; out-of-contract values are rejected at parse time
/// rather than clamped.
#[derive(Debug, Clone)]
pub struct AnalysisItem {
    pub org_number: String,
    pub summary: String,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub financial_grade: Grade,
    pub commercial_grade: Grade,
    pub operational_grade: Grade,
    pub next_steps: Vec<String>,
    pub risks: Vec<String>,
    pub raw: Value,
}

impl AnalysisItem {
    pub fn from_value(value: &Value) -> Result<Self, TargetingError> {
        if let Some(msg) = value.get("error").and_then(|v| v.as_str()) {
            return Err(TargetingError::ModelService(msg.to_string()));
        }

        let org_number = value
            .get("org_number")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                TargetingError::InvalidResponse("analysis missing org_number".to_string())
            })?
            .to_string();

        let summary = value
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let recommendation = value
            .get("recommendation")
            .and_then(|v| v.as_str())
            .and_then(Recommendation::parse)
            .ok_or_else(|| {
                TargetingError::InvalidResponse(
                    "analysis recommendation outside Pursue|Monitor|Decline".to_string(),
                )
            })?;

        let confidence = value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .filter(|c| c.is_finite() && (0.0..=1.0).contains(c))
            .ok_or_else(|| {
                TargetingError::InvalidResponse(
                    "analysis confidence missing or outside [0, 1]".to_string(),
                )
            })?;

        let grade = |key: &str| -> Result<Grade, TargetingError> {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(Grade::parse)
                .ok_or_else(|| {
                    TargetingError::InvalidResponse(format!("analysis {key} not a letter grade"))
                })
        };

        let string_list = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(|s| s.to_string())
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(Self {
            org_number,
            summary,
            recommendation,
            confidence,
            financial_grade: grade("financial_grade")?,
            commercial_grade: grade("commercial_grade")?,
            operational_grade: grade("operational_grade")?,
            next_steps: string_list("next_steps"),
            risks: string_list("risks"),
            raw: value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "org_number": "5569871234",
            "summary": "Founder-led software company with sticky contracts",
            "recommendation": "Pursue",
            "confidence": 0.82,
            "financial_grade": "B",
            "commercial_grade": "A",
            "operational_grade": "C",
            "next_steps": ["Request detailed ledger", "Meet management"],
            "risks": ["Key-person dependency"]
        })
    }

    #[test]
    fn parses_full_payload() {
        let item = AnalysisItem::from_value(&payload()).unwrap();
        assert_eq!(item.recommendation, Recommendation::Pursue);
        assert_eq!(item.confidence, 0.82);
        assert_eq!(item.commercial_grade, Grade::A);
        assert_eq!(item.next_steps.len(), 2);
    }

    #[test]
    fn confidence_above_one_is_rejected_not_clamped() {
        let mut v = payload();
        v["confidence"] = json!(1.4);
        assert!(AnalysisItem::from_value(&v).is_err());
    }

    #[test]
    fn unknown_grade_is_rejected() {
        let mut v = payload();
        v["financial_grade"] = json!("E");
        assert!(AnalysisItem::from_value(&v).is_err());
    }

    #[test]
    fn missing_lists_default_to_empty() {
        let mut v = payload();
        v.as_object_mut().unwrap().remove("next_steps");
        v.as_object_mut().unwrap().remove("risks");
        let item = AnalysisItem::from_value(&v).unwrap();
        assert!(item.next_steps.is_empty());
        assert!(item.risks.is_empty());
    }
}
