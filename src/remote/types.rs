//! Wire types for the remote scoring service (snake_case JSON).

use serde::{Deserialize, Serialize};

use crate::models::DatasetStats;

/// `GET /status`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteStatus {
    #[serde(default, alias = "isRunning")]
    pub is_running: bool,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default, alias = "fraudRate")]
    pub fraud_rate: Option<f64>,
    #[serde(default, alias = "transactionsProcessed")]
    pub transactions_processed: u64,
    #[serde(default, alias = "fraudCount")]
    pub fraud_count: u64,
    #[serde(default, alias = "modelsReady")]
    pub models_ready: bool,
    #[serde(default, alias = "datasetStats")]
    pub dataset_stats: Option<DatasetStats>,
}

/// Acknowledgement body of the control endpoints
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,
}

/// `POST /control/config` body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatorConfig {
    pub speed: f64,
    pub fraud_rate: f64,
    pub inject_fraud: bool,
    pub use_demo_mode: bool,
}

/// `GET /health`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub models_ready: bool,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}
