//! Session controller (control surface)
//!
//! Operator verbs over one session. Every verb runs under a single async
//! control lock, so a stop or reset issued while a start is waiting on the
//! remote service runs after it and has the last word.
//!
//! Remote failures never escape a verb: they become the session's
//! `last_error`. Only argument validation is returned to the caller.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::explain::LocalExplainer;
use super::filter::FilterState;
use super::generator::{EventSynth, LocalGenerator, DEMO_FRAUD_RATE};
use super::mode::{LocalReason, ModeSelector, SessionMode};
use super::store::{CounterUpdate, SessionSnapshot, SessionStore, StoreEvent};
use crate::config::{SessionConfig, DEFAULT_SPEED};
use crate::error::{CoreError, CoreResult};
use crate::models::{ConnectionStatus, Explanation, SessionStats, TransactionEvent};
use crate::normalize::{normalize_explanation, normalize_value, Origin};
use crate::remote::{Health, HttpRemoteClient, RemoteApi, SimulatorConfig};
use crate::stream::{
    ConnectionManager, MetricsSummary, ReconnectPolicy, StreamTransport, WsTransport,
};

/// Largest demo backfill accepted in one call
pub const MAX_DEMO_LIMIT: usize = 1_000;

pub struct SessionController {
    config: SessionConfig,
    mode: Arc<ModeSelector>,
    store: Arc<SessionStore>,
    generator: LocalGenerator,
    explainer: LocalExplainer,
    remote: Option<Arc<dyn RemoteApi>>,
    connection: Option<ConnectionManager>,
    control: Mutex<()>,
    poller: parking_lot::Mutex<Option<JoinHandle<()>>>,
    remote_seq: AtomicU64,
    closed: AtomicBool,
}

impl SessionController {
    /// Build a controller wired to the real HTTP client and WebSocket
    /// transport.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let mode = ModeSelector::decide(&config);
        let remote: Option<Arc<dyn RemoteApi>> = match config.effective_api_base() {
            Some(base) if mode.is_live() => Some(Arc::new(HttpRemoteClient::new(
                base,
                config.request_timeout(),
            )?)),
            _ => None,
        };
        Ok(Self::assemble(config, mode, remote, Arc::new(WsTransport::new())))
    }

    /// Build a controller around caller-supplied remote and transport
    /// implementations.
    pub fn with_parts(
        config: SessionConfig,
        remote: Option<Arc<dyn RemoteApi>>,
        transport: Arc<dyn StreamTransport>,
    ) -> Self {
        let mode = ModeSelector::decide(&config);
        Self::assemble(config, mode, remote, transport)
    }

    fn assemble(
        config: SessionConfig,
        mode: ModeSelector,
        remote: Option<Arc<dyn RemoteApi>>,
        transport: Arc<dyn StreamTransport>,
    ) -> Self {
        if remote.is_none() {
            mode.fail_over(LocalReason::NoEndpoint);
        }

        let speed = if config.speed.is_finite() && config.speed > 0.0 {
            config.speed
        } else {
            warn!(speed = config.speed, "invalid configured speed, using default");
            DEFAULT_SPEED
        };
        let stats = SessionStats::new(
            speed,
            config.fraud_rate,
            mode.mode() == SessionMode::LocalSimulation,
        );
        let store = Arc::new(SessionStore::new(
            config.buffer_capacity,
            stats,
            mode.mode(),
        ));
        store.set_mode(mode.mode(), mode.reason());

        let connection = match (&remote, config.stream_url()) {
            (Some(_), Some(url)) if mode.is_live() => Some(ConnectionManager::new(
                url,
                ReconnectPolicy::from_config(&config),
                transport,
                store.clone(),
            )),
            _ => None,
        };

        let generator = LocalGenerator::new(
            store.clone(),
            EventSynth::new(config.seed, config.fraud_rate, config.feature_count),
        );

        info!(
            mode = %mode.mode(),
            reason = ?mode.reason(),
            stream = ?connection.as_ref().map(|c| c.url().to_string()),
            "session created"
        );

        Self {
            explainer: LocalExplainer::new(config.feature_count),
            config,
            mode: Arc::new(mode),
            store,
            generator,
            remote,
            connection,
            control: Mutex::new(()),
            poller: parking_lot::Mutex::new(None),
            remote_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // READ SIDE
    // =========================================================================

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mode(&self) -> SessionMode {
        self.mode.mode()
    }

    pub fn local_reason(&self) -> Option<LocalReason> {
        self.mode.reason()
    }

    pub fn store(&self) -> Arc<SessionStore> {
        self.store.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot()
    }

    pub fn stats(&self) -> SessionStats {
        self.store.stats()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.store.status()
    }

    pub fn filtered(&self, filter: &FilterState) -> Vec<TransactionEvent> {
        self.store.filtered(filter)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn connection_metrics(&self) -> Option<MetricsSummary> {
        self.connection.as_ref().map(|c| c.metrics().summary())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn next_remote_seq(&self) -> u64 {
        self.remote_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    // =========================================================================
    // MODE RESOLUTION
    // =========================================================================

    /// Run the first status probe if it has not happened yet, then start the
    /// status poller while live. Returns the mode in effect.
    pub async fn initialize(&self) -> SessionMode {
        let _guard = self.control.lock().await;
        self.resolve_mode().await;
        self.mode.mode()
    }

    async fn resolve_mode(&self) {
        if !self.mode.needs_probe() || !self.mode.mark_probed() {
            return;
        }
        let remote = match &self.remote {
            Some(r) => r.clone(),
            None => return,
        };

        let generation = self.store.reset_generation();
        match remote.status().await {
            Ok(status) => {
                info!(
                    models_ready = status.models_ready,
                    remote_running = status.is_running,
                    "✅ Remote scoring service reachable"
                );
                self.store.apply_remote_status(&status, generation);
                self.start_poller(remote);
            }
            Err(e) => {
                info!(error = %e, "Remote scoring service unreachable, running in local simulation mode");
                if self.mode.fail_over(LocalReason::Unreachable) {
                    self.store
                        .set_mode(SessionMode::LocalSimulation, Some(LocalReason::Unreachable));
                }
            }
        }
    }

    fn start_poller(&self, remote: Arc<dyn RemoteApi>) {
        let mut poller = self.poller.lock();
        if poller.is_some() || self.is_closed() {
            return;
        }

        let mode = self.mode.clone();
        let store = self.store.clone();
        let period = self.config.status_poll_interval();

        *poller = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !mode.is_live() {
                    break;
                }
                let generation = store.reset_generation();
                match remote.status().await {
                    Ok(status) => store.apply_remote_status(&status, generation),
                    Err(e) => warn!(error = %e, "status poll failed"),
                }
            }
        }));
    }

    // =========================================================================
    // CONTROL VERBS
    // =========================================================================

    pub async fn start(&self) {
        let _guard = self.control.lock().await;
        self.resolve_mode().await;
        self.start_locked().await;
    }

    async fn start_locked(&self) {
        if self.is_closed() {
            return;
        }

        if !self.mode.is_live() {
            self.generator.start(self.store.stats().speed);
            self.store.clear_error();
            return;
        }

        let remote = match &self.remote {
            Some(r) => r.clone(),
            None => return,
        };

        // Optimistic; rolled back if the service refuses
        self.store.set_running(true);
        match remote.start().await {
            Ok(_) => {
                self.store.clear_error();
                if let Some(conn) = &self.connection {
                    conn.connect();
                }
                info!("▶️ Live session started");
            }
            Err(e) => {
                warn!(error = %e, "remote start failed");
                self.store.set_running(false);
                self.store.set_error(format!("Failed to start simulator: {}", e));
            }
        }
    }

    pub async fn stop(&self) {
        let _guard = self.control.lock().await;
        self.resolve_mode().await;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) {
        if !self.mode.is_live() {
            self.generator.stop();
            self.store.set_status(ConnectionStatus::Disconnected);
            return;
        }

        self.halt_live_stream();
        if let Some(remote) = &self.remote {
            match remote.stop().await {
                Ok(_) => self.store.clear_error(),
                Err(e) => {
                    warn!(error = %e, "remote stop failed");
                    self.store.set_error(format!("Failed to stop simulator: {}", e));
                }
            }
        }
    }

    /// Tear the live socket down and mark the session stopped locally.
    fn halt_live_stream(&self) {
        match &self.connection {
            Some(conn) => conn.disconnect(),
            None => self.store.set_status(ConnectionStatus::Disconnected),
        }
        self.store.set_running(false);
    }

    /// Stop if running, start otherwise. Decided under the control lock.
    pub async fn toggle(&self) {
        let _guard = self.control.lock().await;
        self.resolve_mode().await;
        if self.store.stats().is_running {
            self.stop_locked().await;
        } else {
            self.start_locked().await;
        }
    }

    pub async fn update_speed(&self, speed: f64) -> CoreResult<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(CoreError::validation(format!(
                "speed must be a positive number, got {}",
                speed
            )));
        }

        let _guard = self.control.lock().await;
        self.resolve_mode().await;
        self.store.set_speed(speed);

        if !self.mode.is_live() {
            if self.generator.restart(speed) {
                debug!(speed, "generator restarted at new speed");
            }
            return Ok(());
        }

        if let Some(remote) = &self.remote {
            let body = SimulatorConfig {
                speed,
                fraud_rate: self.store.stats().fraud_rate,
                inject_fraud: false,
                use_demo_mode: false,
            };
            match remote.configure(&body).await {
                Ok(_) => self.store.clear_error(),
                Err(e) => {
                    warn!(error = %e, speed, "remote speed update failed");
                    self.store.set_error(format!("Failed to update speed: {}", e));
                }
            }
        }
        Ok(())
    }

    /// Put one fraudulent event at the head of the buffer. The session is
    /// left stopped. Returns the injected event, or `None` if the remote
    /// service failed (see `last_error`).
    pub async fn inject_fraud(&self) -> Option<TransactionEvent> {
        let _guard = self.control.lock().await;
        self.resolve_mode().await;

        if !self.mode.is_live() {
            self.generator.stop();
            self.store.set_status(ConnectionStatus::Disconnected);
            let event = self.generator.synthesize(true);
            self.store
                .prepend_injected(event.clone(), CounterUpdate::Increment);
            self.store.clear_error();
            info!(id = %event.id(), score = event.risk_score(), "🚨 Fraud injected");
            return Some(event);
        }

        self.halt_live_stream();
        let remote = self.remote.as_ref()?.clone();

        let value = match remote.inject_fraud().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "remote fraud injection failed");
                self.store.set_error(format!("Failed to inject fraud: {}", e));
                return None;
            }
        };

        match normalize_value(value, Origin::Injected, self.next_remote_seq()) {
            Ok(frame) => {
                let counters = frame
                    .stats
                    .map(CounterUpdate::Authoritative)
                    .unwrap_or(CounterUpdate::Increment);
                let event = frame.event;
                self.store.prepend_injected(event.clone(), counters);
                self.store.clear_error();
                info!(id = %event.id(), score = event.risk_score(), "🚨 Fraud injected");
                Some(event)
            }
            Err(e) => {
                warn!(error = %e, "injected record rejected");
                self.store.set_error(format!("Failed to inject fraud: {}", e));
                None
            }
        }
    }

    /// Stop the active source and permanently drop every non-fraud event.
    pub async fn show_fraud_only(&self) -> usize {
        let _guard = self.control.lock().await;
        self.resolve_mode().await;
        self.stop_locked().await;
        let removed = self.store.retain_fraud();
        info!(removed, remaining = self.store.len(), "fraud-only view applied");
        removed
    }

    /// Stop everything and zero the session. In live mode the remote
    /// service is reset as well; the local reset stands even if that fails.
    pub async fn reset_simulator(&self) {
        let _guard = self.control.lock().await;
        self.resolve_mode().await;

        if self.mode.is_live() {
            if let Some(conn) = &self.connection {
                conn.disconnect();
            }
        } else {
            self.generator.stop();
        }
        let generation = self.store.reset();

        if self.mode.is_live() {
            if let Some(remote) = &self.remote {
                match remote.reset().await {
                    Ok(_) => {
                        self.store.acknowledge_remote_reset(generation);
                        self.store.clear_error();
                    }
                    Err(e) => {
                        warn!(error = %e, "remote reset failed");
                        self.store.set_error(format!("Failed to reset simulator: {}", e));
                    }
                }
            }
        } else {
            self.store.clear_error();
        }
        info!("🔄 Session reset");
    }

    /// Empty the buffer; counters and running state are untouched.
    pub fn clear_transactions(&self) {
        self.store.clear_events();
    }

    // =========================================================================
    // DEMO DATA / EXPLANATIONS
    // =========================================================================

    /// Backfill the buffer with up to `limit` historical records. The first
    /// record ends up at the head. Counters are not changed.
    pub async fn load_demo_data(&self, limit: usize) -> CoreResult<usize> {
        if limit == 0 || limit > MAX_DEMO_LIMIT {
            return Err(CoreError::validation(format!(
                "demo limit must be between 1 and {}, got {}",
                MAX_DEMO_LIMIT, limit
            )));
        }

        let _guard = self.control.lock().await;
        self.resolve_mode().await;

        let events = if self.mode.is_live() {
            let remote = match &self.remote {
                Some(r) => r.clone(),
                None => return Ok(0),
            };
            let rows = remote.demo_data(limit).await.map_err(|e| {
                self.store.set_error(format!("Failed to load demo data: {}", e));
                e
            })?;

            rows.into_iter()
                .filter_map(|row| match normalize_value(row, Origin::Demo, self.next_remote_seq()) {
                    Ok(frame) => Some(frame.event),
                    Err(e) => {
                        warn!(error = %e, "skipping malformed demo record");
                        None
                    }
                })
                .collect()
        } else {
            self.generator.synthesize_batch(limit, DEMO_FRAUD_RATE)
        };

        let loaded = self.store.insert_batch(events, CounterUpdate::None);
        self.store.clear_error();
        info!(loaded, "📥 Demo data loaded");
        Ok(loaded)
    }

    /// Per-feature breakdown of one event's score.
    pub async fn explain(&self, event: &TransactionEvent) -> CoreResult<Explanation> {
        if event.features().is_empty() {
            return Err(CoreError::validation(format!(
                "event {} carries no features",
                event.id()
            )));
        }

        match &self.remote {
            Some(remote) if self.mode.is_live() => {
                let raw = remote.explain(event.features()).await?;
                let mut explanation = normalize_explanation(raw);
                if explanation.prediction == 0.0 {
                    explanation.prediction = event.risk_score();
                }
                Ok(explanation)
            }
            _ => Ok(self.explainer.explain(event)),
        }
    }

    pub async fn health(&self) -> CoreResult<Health> {
        match &self.remote {
            Some(remote) if self.mode.is_live() => remote.health().await,
            _ => Ok(Health {
                status: "healthy".to_string(),
                timestamp: Some(Utc::now().to_rfc3339()),
                models_ready: true,
            }),
        }
    }

    pub async fn feature_importance(&self) -> CoreResult<BTreeMap<String, f64>> {
        match &self.remote {
            Some(remote) if self.mode.is_live() => remote.feature_importance().await,
            _ => Ok(self.explainer.importance()),
        }
    }

    /// Remote model metrics in Live Mode; local session counters otherwise.
    pub async fn model_metrics(&self) -> CoreResult<Value> {
        match &self.remote {
            Some(remote) if self.mode.is_live() => remote.metrics().await,
            _ => Ok(json!({
                "mode": self.mode.mode(),
                "session": self.store.stats(),
            })),
        }
    }

    // =========================================================================
    // TEARDOWN
    // =========================================================================

    /// Cancel every timer, socket and poll task. Later verbs are no-ops for
    /// starting sources.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.generator.stop();
        if let Some(conn) = &self.connection {
            conn.disconnect();
        }
        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
        }
        self.store.set_status(ConnectionStatus::Disconnected);
        info!("Session shut down");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
