//! Session configuration
//!
//! Computed once when a session is constructed and passed by value into every
//! component. Nothing downstream reads the environment.

use std::time::Duration;

pub const DEFAULT_SPEED: f64 = 1.0;
pub const DEFAULT_FRAUD_RATE: f64 = 0.02;
pub const DEFAULT_BUFFER_CAPACITY: usize = 200;
pub const DEFAULT_FEATURE_COUNT: usize = 30;
/// Endpoint assumed outside production when none is configured
pub const DEV_API_BASE: &str = "http://localhost:8000";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the remote scoring service, e.g. `http://localhost:8000`
    pub api_base: Option<String>,
    /// Explicit stream URL; derived from `api_base` when absent
    pub ws_url: Option<String>,
    /// Skip the remote service entirely
    pub force_demo: bool,
    /// Production deployment flag (no endpoint in production means demo)
    pub production: bool,

    // Simulation parameters
    pub speed: f64,
    pub fraud_rate: f64,
    pub buffer_capacity: usize,
    pub feature_count: usize,
    pub seed: Option<u64>,

    // Remote service
    pub status_poll_ms: u64,
    pub request_timeout_ms: u64,

    // Reconnect
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            ws_url: None,
            force_demo: false,
            production: false,

            speed: DEFAULT_SPEED,
            fraud_rate: DEFAULT_FRAUD_RATE,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            feature_count: DEFAULT_FEATURE_COUNT,
            seed: None,

            status_poll_ms: 5_000,
            request_timeout_ms: 10_000,

            // 1s, 2s, 4s, 8s, 10s then give up
            backoff_base_ms: 1_000,
            backoff_max_ms: 10_000,
            max_reconnect_attempts: 5,
        }
    }
}

impl SessionConfig {
    /// Load from environment with defaults
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        config.api_base = env_string("FRAUDGUARD_API_BASE");
        config.ws_url = env_string("FRAUDGUARD_WS_URL");
        if let Some(v) = env_string("FRAUDGUARD_FORCE_DEMO") {
            config.force_demo = parse_flag(&v);
        }
        if let Some(v) = env_string("FRAUDGUARD_PRODUCTION") {
            config.production = parse_flag(&v);
        }
        if let Ok(v) = std::env::var("FRAUDGUARD_SPEED") {
            config.speed = v
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s > 0.0)
                .unwrap_or(config.speed);
        }
        if let Ok(v) = std::env::var("FRAUDGUARD_FRAUD_RATE") {
            config.fraud_rate = v
                .parse::<f64>()
                .ok()
                .filter(|r| (0.0..=1.0).contains(r))
                .unwrap_or(config.fraud_rate);
        }
        if let Ok(v) = std::env::var("FRAUDGUARD_BUFFER_CAPACITY") {
            config.buffer_capacity = v
                .parse::<usize>()
                .ok()
                .filter(|&c| c > 0)
                .unwrap_or(config.buffer_capacity);
        }
        if let Ok(v) = std::env::var("FRAUDGUARD_FEATURE_COUNT") {
            config.feature_count = v.parse().unwrap_or(config.feature_count);
        }
        if let Ok(v) = std::env::var("FRAUDGUARD_STATUS_POLL_MS") {
            config.status_poll_ms = v.parse().unwrap_or(config.status_poll_ms);
        }
        if let Ok(v) = std::env::var("FRAUDGUARD_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = v.parse().unwrap_or(config.request_timeout_ms);
        }
        if let Ok(v) = std::env::var("FRAUDGUARD_SEED") {
            config.seed = v.parse().ok();
        }

        config
    }

    /// Remote base URL in effect: the configured one, else the local
    /// development service when not in production.
    pub fn effective_api_base(&self) -> Option<String> {
        match &self.api_base {
            Some(base) => Some(base.clone()),
            None if !self.production => Some(DEV_API_BASE.to_string()),
            None => None,
        }
    }

    /// Stream endpoint: explicit `ws_url`, else the effective API base with
    /// the scheme swapped to ws/wss and `/ws/stream` appended.
    pub fn stream_url(&self) -> Option<String> {
        if let Some(url) = &self.ws_url {
            return Some(url.clone());
        }
        let api_base = self.effective_api_base()?;
        let base = api_base.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        Some(format!("{}/ws/stream", ws_base))
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms.max(100))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim(), "1" | "true" | "TRUE" | "on" | "ON" | "yes")
}
