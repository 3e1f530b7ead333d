use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk bucket derived from a transaction's overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const MEDIUM_THRESHOLD: f64 = 0.4;
    pub const HIGH_THRESHOLD: f64 = 0.7;

    pub fn from_score(score: f64) -> Self {
        if score >= Self::HIGH_THRESHOLD {
            RiskLevel::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three per-model opinions backing the ensemble score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelScores {
    pub xgboost: f64,
    pub isolation_forest: f64,
    pub rule_based: f64,
}

impl ModelScores {
    pub fn new(xgboost: f64, isolation_forest: f64, rule_based: f64) -> Self {
        Self {
            xgboost: clamp_unit(xgboost),
            isolation_forest: clamp_unit(isolation_forest),
            rule_based: clamp_unit(rule_based),
        }
    }

    /// All three models agreeing on one score.
    pub fn uniform(score: f64) -> Self {
        Self::new(score, score, score)
    }
}

/// One streamed or synthesized risk assessment.
///
/// Fields are private so `risk_level` can only ever be derived from
/// `risk_score`; the `with_*` builders are meant for construction time only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionEvent {
    id: String,
    timestamp: DateTime<Utc>,
    amount: f64,
    risk_score: f64,
    risk_level: RiskLevel,
    is_fraud: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ground_truth: Option<bool>,
    model_scores: ModelScores,
    features: Vec<f64>,
    feature_count: usize,
}

impl TransactionEvent {
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        amount: f64,
        risk_score: f64,
        is_fraud: bool,
    ) -> Self {
        let risk_score = clamp_unit(risk_score);
        Self {
            id: id.into(),
            timestamp,
            amount: round_cents(amount.max(0.0)),
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            is_fraud,
            ground_truth: None,
            model_scores: ModelScores::uniform(risk_score),
            features: Vec::new(),
            feature_count: 0,
        }
    }

    pub fn with_model_scores(mut self, scores: ModelScores) -> Self {
        self.model_scores = scores;
        self
    }

    pub fn with_features(mut self, features: Vec<f64>) -> Self {
        self.feature_count = features.len();
        self.features = features;
        self
    }

    /// Override the declared feature count (the wire may report the model's
    /// dimensionality even when the vector was truncated).
    pub fn with_feature_count(mut self, feature_count: usize) -> Self {
        self.feature_count = feature_count;
        self
    }

    pub fn with_ground_truth(mut self, ground_truth: bool) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn risk_score(&self) -> f64 {
        self.risk_score
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn is_fraud(&self) -> bool {
        self.is_fraud
    }

    pub fn ground_truth(&self) -> Option<bool> {
        self.ground_truth
    }

    pub fn model_scores(&self) -> ModelScores {
        self.model_scores
    }

    pub fn features(&self) -> &[f64] {
        &self.features
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }
}

/// Connectivity of the active event source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Descriptive metadata about the dataset backing the remote service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    #[serde(default)]
    pub total_transactions: u64,
    #[serde(default)]
    pub fraud_count: u64,
    #[serde(default)]
    pub legit_count: u64,
    #[serde(default)]
    pub fraud_percentage: f64,
    #[serde(default)]
    pub features: usize,
    #[serde(default)]
    pub feature_names: Vec<String>,
}

/// Authoritative running totals attached to remote frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub total_fraud: u64,
}

/// Aggregate counters and mode flags for one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub is_running: bool,
    pub speed: f64,
    pub fraud_rate: f64,
    pub transactions_processed: u64,
    pub fraud_count: u64,
    pub models_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_stats: Option<DatasetStats>,
}

impl SessionStats {
    pub fn new(speed: f64, fraud_rate: f64, models_ready: bool) -> Self {
        Self {
            is_running: false,
            speed,
            fraud_rate,
            transactions_processed: 0,
            fraud_count: 0,
            models_ready,
            dataset_stats: None,
        }
    }
}

/// Sign of a feature's push on the prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionDirection {
    Increase,
    Decrease,
}

impl ContributionDirection {
    pub fn from_contribution(contribution: f64) -> Self {
        if contribution >= 0.0 {
            ContributionDirection::Increase
        } else {
            ContributionDirection::Decrease
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
    pub contribution: f64,
    pub direction: ContributionDirection,
}

/// SHAP-style breakdown of one event's score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub base_value: f64,
    pub prediction: f64,
    pub top_features: Vec<FeatureContribution>,
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub(crate) fn round_cents(value: f64) -> f64 {
    if value.is_finite() {
        (value * 100.0).round() / 100.0
    } else {
        0.0
    }
}
