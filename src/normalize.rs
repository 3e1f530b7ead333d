//! Boundary adapter for inbound records.
//!
//! The remote service and its older variants disagree on field names
//! (snake_case vs camelCase) and on which fields are present at all. Every
//! inbound record is decoded into a partial `RawTransaction` and normalized
//! exactly once here; the rest of the crate only sees `TransactionEvent`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::models::{
    ContributionDirection, Explanation, FeatureContribution, ModelScores, StreamStats,
    TransactionEvent,
};

/// Score above which an unlabelled remote record counts as fraud
pub const REMOTE_FRAUD_THRESHOLD: f64 = 0.5;

/// Partial inbound transaction, every field optional
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawTransaction {
    #[serde(default, alias = "transactionId", alias = "transaction_id")]
    pub id: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default, alias = "riskScore", alias = "score")]
    pub risk_score: Option<Value>,
    #[serde(default, alias = "isFraud")]
    pub is_fraud: Option<Value>,
    #[serde(default, alias = "groundTruth")]
    pub ground_truth: Option<Value>,
    #[serde(default, alias = "xgboostScore", alias = "modelScoreA")]
    pub xgboost_score: Option<Value>,
    #[serde(default, alias = "isolationForestScore", alias = "modelScoreB")]
    pub isolation_forest_score: Option<Value>,
    #[serde(default, alias = "ruleBasedScore", alias = "modelScoreC")]
    pub rule_based_score: Option<Value>,
    #[serde(default)]
    pub features: Option<Vec<Value>>,
    #[serde(default, alias = "featureCount")]
    pub feature_count: Option<Value>,
    #[serde(default)]
    pub stats: Option<RawStreamStats>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawStreamStats {
    #[serde(default, alias = "totalProcessed", alias = "transactions_processed")]
    pub total_processed: Option<Value>,
    #[serde(default, alias = "totalFraud", alias = "fraud_count")]
    pub total_fraud: Option<Value>,
}

/// Where a record came from; drives id prefixes and the `is_fraud` default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Stream,
    Injected,
    Demo,
}

impl Origin {
    fn id_prefix(&self) -> &'static str {
        match self {
            Origin::Stream => "REMOTE",
            Origin::Injected => "FRAUD",
            Origin::Demo => "DEMO",
        }
    }
}

/// A canonical event plus any authoritative counters that rode along with it
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFrame {
    pub event: TransactionEvent,
    pub stats: Option<StreamStats>,
}

/// Decode one text frame from the stream.
pub fn parse_frame(text: &str, origin: Origin, seq: u64) -> CoreResult<NormalizedFrame> {
    let value: Value = serde_json::from_str(text)?;
    normalize_value(value, origin, seq)
}

/// Normalize an already-decoded JSON value.
pub fn normalize_value(value: Value, origin: Origin, seq: u64) -> CoreResult<NormalizedFrame> {
    if !value.is_object() {
        return Err(CoreError::protocol("expected a JSON object"));
    }
    let raw: RawTransaction = serde_json::from_value(value)?;
    if raw.id.is_none() && raw.risk_score.is_none() {
        return Err(CoreError::protocol(
            "record carries neither an id nor a risk score",
        ));
    }
    Ok(normalize(raw, origin, seq))
}

/// Fill every missing or non-finite field with its default.
pub fn normalize(raw: RawTransaction, origin: Origin, seq: u64) -> NormalizedFrame {
    let id = raw
        .id
        .as_ref()
        .and_then(value_to_id)
        .unwrap_or_else(|| format!("{}-{}", origin.id_prefix(), seq));

    let timestamp = raw
        .timestamp
        .as_ref()
        .and_then(value_to_timestamp)
        .unwrap_or_else(Utc::now);

    let risk_score = raw.risk_score.as_ref().and_then(value_to_f64).unwrap_or(0.0);
    let amount = raw.amount.as_ref().and_then(value_to_f64).unwrap_or(0.0);

    let is_fraud = raw
        .is_fraud
        .as_ref()
        .and_then(value_to_bool)
        .unwrap_or(match origin {
            Origin::Injected => true,
            _ => risk_score > REMOTE_FRAUD_THRESHOLD,
        });

    let score_or = |v: &Option<Value>| v.as_ref().and_then(value_to_f64).unwrap_or(risk_score);
    let scores = ModelScores::new(
        score_or(&raw.xgboost_score),
        score_or(&raw.isolation_forest_score),
        score_or(&raw.rule_based_score),
    );

    let features: Vec<f64> = raw
        .features
        .unwrap_or_default()
        .iter()
        .map(|v| value_to_f64(v).unwrap_or(0.0))
        .collect();

    let mut event = TransactionEvent::new(id, timestamp, amount, risk_score, is_fraud)
        .with_model_scores(scores)
        .with_features(features);

    if let Some(count) = raw.feature_count.as_ref().and_then(value_to_f64) {
        if count >= 0.0 {
            event = event.with_feature_count(count as usize);
        }
    }
    if let Some(truth) = raw.ground_truth.as_ref().and_then(value_to_bool) {
        event = event.with_ground_truth(truth);
    }

    let stats = raw.stats.map(|s| StreamStats {
        total_processed: s.total_processed.as_ref().and_then(value_to_u64).unwrap_or(0),
        total_fraud: s.total_fraud.as_ref().and_then(value_to_u64).unwrap_or(0),
    });

    NormalizedFrame { event, stats }
}

// =============================================================================
// EXPLANATIONS
// =============================================================================

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawExplanation {
    #[serde(default, alias = "baseValue")]
    pub base_value: Option<f64>,
    #[serde(default)]
    pub prediction: Option<f64>,
    #[serde(default, alias = "topFeatures", alias = "features")]
    pub top_features: Vec<RawContribution>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawContribution {
    #[serde(default, alias = "name")]
    pub feature: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default, alias = "shap")]
    pub contribution: Option<f64>,
    #[serde(default)]
    pub direction: Option<String>,
}

pub fn normalize_explanation(raw: RawExplanation) -> Explanation {
    let top_features = raw
        .top_features
        .into_iter()
        .enumerate()
        .map(|(idx, c)| {
            let contribution = finite_or(c.contribution, 0.0);
            let direction = match c.direction.as_deref() {
                Some("increase") | Some("positive") => ContributionDirection::Increase,
                Some("decrease") | Some("negative") => ContributionDirection::Decrease,
                _ => ContributionDirection::from_contribution(contribution),
            };
            FeatureContribution {
                feature: c.feature.unwrap_or_else(|| format!("feature_{}", idx)),
                value: finite_or(c.value, 0.0),
                contribution,
                direction,
            }
        })
        .collect();

    Explanation {
        base_value: finite_or(raw.base_value, 0.0),
        prediction: finite_or(raw.prediction, 0.0),
        top_features,
    }
}

// =============================================================================
// VALUE COERCION
// =============================================================================

fn finite_or(v: Option<f64>, default: f64) -> f64 {
    v.filter(|x| x.is_finite()).unwrap_or(default)
}

fn value_to_f64(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn value_to_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|x| x.is_finite() && *x >= 0.0)
                .map(|x| x as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|x| x != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn value_to_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            // Naive ISO-8601 without offset, treated as UTC
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if !raw.is_finite() || raw < 0.0 {
                return None;
            }
            // Heuristic: anything past 1e12 is already milliseconds
            let millis = if raw >= 1e12 { raw } else { raw * 1000.0 };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;

    #[test]
    fn test_snake_case_stream_frame() {
        let json = r#"{
            "id": "TXN-42",
            "timestamp": "2024-03-01T12:30:00.123456",
            "amount": 149.62,
            "features": [0.1, -1.2, 0.3],
            "risk_score": 0.82,
            "risk_level": "low",
            "is_fraud": true,
            "xgboost_score": 0.9,
            "isolation_forest_score": 0.7,
            "rule_based_score": 0.5,
            "ground_truth": true,
            "feature_count": 29,
            "stats": {"total_processed": 120, "total_fraud": 3}
        }"#;

        let frame = parse_frame(json, Origin::Stream, 0).unwrap();
        let event = &frame.event;
        assert_eq!(event.id(), "TXN-42");
        assert_eq!(event.amount(), 149.62);
        // Declared level on the wire is ignored; it is re-derived.
        assert_eq!(event.risk_level(), RiskLevel::High);
        assert!(event.is_fraud());
        assert_eq!(event.ground_truth(), Some(true));
        assert_eq!(event.model_scores().isolation_forest, 0.7);
        assert_eq!(event.features().len(), 3);
        assert_eq!(event.feature_count(), 29);
        assert_eq!(
            frame.stats,
            Some(StreamStats {
                total_processed: 120,
                total_fraud: 3
            })
        );
    }

    #[test]
    fn test_camel_case_record_with_defaults() {
        let json = r#"{"transactionId": 7, "riskScore": "0.45", "isFraud": 0}"#;
        let frame = parse_frame(json, Origin::Demo, 3).unwrap();
        assert_eq!(frame.event.id(), "7");
        assert_eq!(frame.event.risk_score(), 0.45);
        assert_eq!(frame.event.risk_level(), RiskLevel::Medium);
        assert!(!frame.event.is_fraud());
        assert_eq!(frame.event.amount(), 0.0);
        // Missing sub-scores fall back to the ensemble score
        assert_eq!(frame.event.model_scores().xgboost, 0.45);
        assert!(frame.stats.is_none());
    }

    #[test]
    fn test_missing_id_gets_origin_prefix() {
        let json = r#"{"risk_score": 0.91}"#;
        let frame = parse_frame(json, Origin::Stream, 17).unwrap();
        assert_eq!(frame.event.id(), "REMOTE-17");
        assert!(frame.event.is_fraud());
    }

    #[test]
    fn test_injected_defaults_to_fraud() {
        let json = r#"{"id": "FRAUD-9", "risk_score": 0.3}"#;
        let frame = parse_frame(json, Origin::Injected, 0).unwrap();
        assert!(frame.event.is_fraud());
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(matches!(
            parse_frame("not json", Origin::Stream, 0),
            Err(CoreError::Protocol(_))
        ));
        assert!(matches!(
            parse_frame("[1,2,3]", Origin::Stream, 0),
            Err(CoreError::Protocol(_))
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"heartbeat"}"#, Origin::Stream, 0),
            Err(CoreError::Protocol(_))
        ));
    }

    #[test]
    fn test_epoch_timestamps() {
        let secs = value_to_timestamp(&serde_json::json!(1_700_000_000)).unwrap();
        let millis = value_to_timestamp(&serde_json::json!(1_700_000_000_000u64)).unwrap();
        assert_eq!(secs, millis);
    }

    #[test]
    fn test_explanation_uses_shap_alias() {
        let raw: RawExplanation = serde_json::from_str(
            r#"{
                "transaction_id": "TXN-1",
                "prediction": 0.93,
                "base_value": 0.0017,
                "top_features": [
                    {"feature": "V14", "value": -9.2, "shap": 2.4, "abs_shap": 2.4},
                    {"feature": "V4", "value": 1.1, "shap": -0.6, "abs_shap": 0.6}
                ]
            }"#,
        )
        .unwrap();
        let explanation = normalize_explanation(raw);
        assert_eq!(explanation.top_features.len(), 2);
        assert_eq!(explanation.top_features[0].contribution, 2.4);
        assert_eq!(
            explanation.top_features[0].direction,
            ContributionDirection::Increase
        );
        assert_eq!(
            explanation.top_features[1].direction,
            ContributionDirection::Decrease
        );
    }
}
