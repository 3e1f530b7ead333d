//! In-memory stand-ins for the remote service and the socket transport.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use fraudguard_stream::config::SessionConfig;
use fraudguard_stream::error::{CoreError, CoreResult};
use fraudguard_stream::normalize::RawExplanation;
use fraudguard_stream::remote::{Ack, Health, RemoteApi, RemoteStatus, SimulatorConfig};
use fraudguard_stream::stream::{StreamConnection, StreamFrame, StreamTransport};
use fraudguard_stream::SessionController;

// =============================================================================
// REMOTE
// =============================================================================

pub struct FakeRemote {
    calls: Mutex<Vec<String>>,
    pub status: Mutex<RemoteStatus>,
    pub fail_status: AtomicBool,
    pub fail_control: AtomicBool,
    start_gate: Mutex<Option<Arc<Notify>>>,
    pub start_entered: Notify,
    pub inject_body: Mutex<Value>,
    pub demo_rows: Mutex<Vec<Value>>,
    pub configs: Mutex<Vec<SimulatorConfig>>,
}

impl FakeRemote {
    pub fn healthy() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            status: Mutex::new(RemoteStatus {
                models_ready: true,
                fraud_rate: Some(0.02),
                speed: Some(1.0),
                ..RemoteStatus::default()
            }),
            fail_status: AtomicBool::new(false),
            fail_control: AtomicBool::new(false),
            start_gate: Mutex::new(None),
            start_entered: Notify::new(),
            inject_body: Mutex::new(json!({
                "id": "FRAUD-REMOTE-1",
                "amount": 2450.0,
                "risk_score": 0.93,
                "xgboost_score": 0.95,
                "isolation_forest_score": 0.88,
                "rule_based_score": 0.61,
                "features": [0.1, -0.4, 2.2],
                "stats": {"total_processed": 57, "total_fraud": 4}
            })),
            demo_rows: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        let remote = Self::healthy();
        remote.fail_status.store(true, Ordering::SeqCst);
        remote
    }

    /// Hold every `start()` until the returned handle is notified.
    pub fn gate_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().push(call.to_string());
    }

    fn control(&self, endpoint: &str) -> CoreResult<Ack> {
        if self.fail_control.load(Ordering::SeqCst) {
            return Err(CoreError::RemoteStatus {
                endpoint: endpoint.to_string(),
                status: 503,
                body: "simulator unavailable".to_string(),
            });
        }
        Ok(Ack {
            message: Some("ok".to_string()),
        })
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn status(&self) -> CoreResult<RemoteStatus> {
        self.record("status");
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(CoreError::transport("connection refused"));
        }
        Ok(self.status.lock().clone())
    }

    async fn start(&self) -> CoreResult<Ack> {
        self.record("start");
        let gate = self.start_gate.lock().clone();
        self.start_entered.notify_one();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.control("POST /control/start")
    }

    async fn stop(&self) -> CoreResult<Ack> {
        self.record("stop");
        self.control("POST /control/stop")
    }

    async fn configure(&self, config: &SimulatorConfig) -> CoreResult<Ack> {
        self.record("config");
        self.configs.lock().push(config.clone());
        self.control("POST /control/config")
    }

    async fn inject_fraud(&self) -> CoreResult<Value> {
        self.record("inject");
        self.control("POST /inject-fraud")?;
        Ok(self.inject_body.lock().clone())
    }

    async fn reset(&self) -> CoreResult<Ack> {
        self.record("reset");
        let ack = self.control("POST /control/reset")?;
        let mut status = self.status.lock();
        status.transactions_processed = 0;
        status.fraud_count = 0;
        Ok(ack)
    }

    async fn demo_data(&self, limit: usize) -> CoreResult<Vec<Value>> {
        self.record("demo");
        Ok(self.demo_rows.lock().iter().take(limit).cloned().collect())
    }

    async fn explain(&self, features: &[f64]) -> CoreResult<RawExplanation> {
        self.record("explain");
        let body = json!({
            "base_value": 0.17,
            "prediction": 0.91,
            "top_features": features.iter().enumerate().take(5).map(|(i, v)| json!({
                "feature": format!("V{}", i + 1),
                "value": v,
                "shap": v * 0.5,
            })).collect::<Vec<_>>(),
        });
        serde_json::from_value(body).map_err(CoreError::from)
    }

    async fn health(&self) -> CoreResult<Health> {
        self.record("health");
        Ok(Health {
            status: "healthy".to_string(),
            timestamp: None,
            models_ready: true,
        })
    }

    async fn feature_importance(&self) -> CoreResult<BTreeMap<String, f64>> {
        self.record("features");
        Ok([("V14".to_string(), 0.31), ("V4".to_string(), 0.12)]
            .into_iter()
            .collect())
    }

    async fn metrics(&self) -> CoreResult<Value> {
        self.record("metrics");
        Ok(json!({"xgboost": {"auc": 0.97}, "ensemble": {"auc": 0.98}}))
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

#[derive(Clone)]
enum Script {
    /// Every open fails
    Fail,
    /// Every open succeeds and the peer closes at once
    CloseImmediately,
    /// Each connection replays these frames, then idles
    Frames(Vec<String>),
    /// The first connection reads from a test-controlled channel
    Channel,
}

pub struct FakeTransport {
    script: Script,
    channel: Mutex<Option<mpsc::UnboundedReceiver<StreamFrame>>>,
    opens: Mutex<Vec<Instant>>,
    closes: Arc<AtomicUsize>,
}

impl FakeTransport {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            channel: Mutex::new(None),
            opens: Mutex::new(Vec::new()),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self::with_script(Script::Fail)
    }

    pub fn closing() -> Self {
        Self::with_script(Script::CloseImmediately)
    }

    pub fn scripted(frames: &[&str]) -> Self {
        Self::with_script(Script::Frames(
            frames.iter().map(|f| f.to_string()).collect(),
        ))
    }

    pub fn channel() -> (Self, mpsc::UnboundedSender<StreamFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self::with_script(Script::Channel);
        *transport.channel.lock() = Some(rx);
        (transport, tx)
    }

    pub fn opens(&self) -> usize {
        self.opens.lock().len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTransport for FakeTransport {
    async fn open(&self, _url: &str) -> Result<Box<dyn StreamConnection>> {
        self.opens.lock().push(Instant::now());

        let conn = match &self.script {
            Script::Fail => return Err(anyhow!("connection refused")),
            Script::CloseImmediately => FakeConnection {
                frames: VecDeque::new(),
                rx: None,
                close_immediately: true,
                closes: self.closes.clone(),
            },
            Script::Frames(frames) => FakeConnection {
                frames: frames.iter().cloned().collect(),
                rx: None,
                close_immediately: false,
                closes: self.closes.clone(),
            },
            Script::Channel => FakeConnection {
                frames: VecDeque::new(),
                rx: self.channel.lock().take(),
                close_immediately: false,
                closes: self.closes.clone(),
            },
        };
        Ok(Box::new(conn))
    }
}

struct FakeConnection {
    frames: VecDeque<String>,
    rx: Option<mpsc::UnboundedReceiver<StreamFrame>>,
    close_immediately: bool,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl StreamConnection for FakeConnection {
    async fn recv(&mut self) -> Option<StreamFrame> {
        if self.close_immediately {
            return None;
        }
        if let Some(text) = self.frames.pop_front() {
            return Some(StreamFrame::Text(text));
        }
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

pub fn live_config() -> SessionConfig {
    SessionConfig {
        api_base: Some("http://scoring.test:8000".to_string()),
        seed: Some(17),
        ..SessionConfig::default()
    }
}

pub fn local_config() -> SessionConfig {
    SessionConfig {
        force_demo: true,
        seed: Some(17),
        ..SessionConfig::default()
    }
}

pub fn live_controller(
    remote: &Arc<FakeRemote>,
    transport: &Arc<FakeTransport>,
) -> SessionController {
    SessionController::with_parts(
        live_config(),
        Some(remote.clone() as Arc<dyn RemoteApi>),
        transport.clone() as Arc<dyn StreamTransport>,
    )
}

pub fn local_controller() -> SessionController {
    SessionController::with_parts(
        local_config(),
        None,
        Arc::new(FakeTransport::failing()) as Arc<dyn StreamTransport>,
    )
}

pub fn frame(id: &str, score: f64, fraud: bool) -> String {
    json!({
        "id": id,
        "timestamp": "2024-05-01T12:00:00Z",
        "amount": 125.5,
        "risk_score": score,
        "is_fraud": fraud,
    })
    .to_string()
}
