//! Live stream connection manager
//!
//! Owns at most one socket worker. The worker drives a [`LinkMachine`]: it
//! opens the socket, pumps frames through the normalization adapter into the
//! store, and on close waits out the backoff delay before reopening, until the
//! retry budget is spent.
//!
//! Every store write is tagged with the live source epoch claimed in
//! `connect()`. Once `disconnect()` releases it (or another source claims the
//! store) anything the worker still produces is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::{LinkAction, LinkEvent, LinkMachine, ReconnectPolicy};
use super::transport::{StreamFrame, StreamTransport};
use crate::models::ConnectionStatus;
use crate::normalize::{parse_frame, Origin};
use crate::session::store::{EventSource, SessionStore};

// =============================================================================
// METRICS
// =============================================================================

#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    pub connections_attempted: AtomicU64,
    pub connections_succeeded: AtomicU64,
    pub reconnects_scheduled: AtomicU64,
    pub give_ups: AtomicU64,
    pub frames_accepted: AtomicU64,
    pub frames_rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSummary {
    pub connections_attempted: u64,
    pub connections_succeeded: u64,
    pub reconnects_scheduled: u64,
    pub give_ups: u64,
    pub frames_accepted: u64,
    pub frames_rejected: u64,
}

impl ConnectionMetrics {
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            connections_attempted: self.connections_attempted.load(Ordering::Relaxed),
            connections_succeeded: self.connections_succeeded.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            give_ups: self.give_ups.load(Ordering::Relaxed),
            frames_accepted: self.frames_accepted.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// =============================================================================
// MANAGER
// =============================================================================

struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    epoch: u64,
}

pub struct ConnectionManager {
    url: String,
    policy: ReconnectPolicy,
    transport: Arc<dyn StreamTransport>,
    store: Arc<SessionStore>,
    metrics: Arc<ConnectionMetrics>,
    worker: Mutex<Option<Worker>>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        transport: Arc<dyn StreamTransport>,
        store: Arc<SessionStore>,
    ) -> Self {
        Self {
            url: url.into(),
            policy,
            transport,
            store,
            metrics: Arc::new(ConnectionMetrics::default()),
            worker: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        self.metrics.clone()
    }

    /// True while a worker is connecting, connected or waiting to reconnect.
    pub fn is_active(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    /// Start a worker unless one is already alive. Returns true if a new
    /// worker was spawned.
    pub fn connect(&self) -> bool {
        let mut worker = self.worker.lock();
        if let Some(w) = worker.as_ref() {
            if !w.handle.is_finished() {
                debug!("connect ignored, worker already active");
                return false;
            }
        }

        let epoch = self.store.claim_source(EventSource::Live);
        self.store
            .set_source_status(epoch, ConnectionStatus::Connecting);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = WorkerCtx {
            url: self.url.clone(),
            policy: self.policy,
            transport: self.transport.clone(),
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            epoch,
        };
        let handle = tokio::spawn(run_worker(ctx, shutdown_rx));

        *worker = Some(Worker {
            handle,
            shutdown: shutdown_tx,
            epoch,
        });
        true
    }

    /// Cancel any pending reconnect, close the socket and force
    /// `Disconnected`. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let taken = self.worker.lock().take();
        if let Some(w) = taken {
            let _ = w.shutdown.send(true);
            self.store.release_source(w.epoch);
            info!(url = %self.url, "🔌 Live stream disconnected");
        }
        self.store.set_status(ConnectionStatus::Disconnected);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(w) = self.worker.lock().take() {
            let _ = w.shutdown.send(true);
            w.handle.abort();
        }
    }
}

// =============================================================================
// WORKER
// =============================================================================

struct WorkerCtx {
    url: String,
    policy: ReconnectPolicy,
    transport: Arc<dyn StreamTransport>,
    store: Arc<SessionStore>,
    metrics: Arc<ConnectionMetrics>,
    epoch: u64,
}

async fn run_worker(ctx: WorkerCtx, mut shutdown: watch::Receiver<bool>) {
    let mut machine = LinkMachine::new(ctx.policy);
    let mut action = machine.handle(LinkEvent::ConnectRequested);
    let mut seq: u64 = 0;

    loop {
        match action {
            LinkAction::Open => {
                ctx.store
                    .set_source_status(ctx.epoch, ConnectionStatus::Connecting);
                bump(&ctx.metrics.connections_attempted);
                info!(url = %ctx.url, "🔌 Connecting to live stream");

                let opened = tokio::select! {
                    res = ctx.transport.open(&ctx.url) => res,
                    _ = shutdown.changed() => return,
                };

                match opened {
                    Ok(mut conn) => {
                        machine.handle(LinkEvent::Opened);
                        bump(&ctx.metrics.connections_succeeded);
                        if !ctx
                            .store
                            .set_source_status(ctx.epoch, ConnectionStatus::Connected)
                        {
                            conn.close().await;
                            return;
                        }
                        info!(url = %ctx.url, "✅ Live stream connected");

                        loop {
                            let frame = tokio::select! {
                                f = conn.recv() => f,
                                _ = shutdown.changed() => {
                                    conn.close().await;
                                    return;
                                }
                            };

                            match frame {
                                Some(StreamFrame::Text(text)) => {
                                    seq += 1;
                                    match parse_frame(&text, Origin::Stream, seq) {
                                        Ok(frame) => {
                                            if !ctx.store.ingest(ctx.epoch, frame.event, frame.stats)
                                            {
                                                debug!(epoch = ctx.epoch, "live claim lost, closing");
                                                conn.close().await;
                                                return;
                                            }
                                            bump(&ctx.metrics.frames_accepted);
                                        }
                                        Err(e) => {
                                            bump(&ctx.metrics.frames_rejected);
                                            warn!(error = %e, "discarding malformed frame");
                                        }
                                    }
                                }
                                Some(StreamFrame::Error(e)) => {
                                    warn!(error = %e, "live stream error");
                                    machine.handle(LinkEvent::Error);
                                    break;
                                }
                                None => {
                                    debug!("live stream closed");
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(url = %ctx.url, error = %e, "live stream open failed");
                        machine.handle(LinkEvent::Error);
                    }
                }

                ctx.store
                    .set_source_status(ctx.epoch, ConnectionStatus::Disconnected);
                let should_run = !*shutdown.borrow() && ctx.store.is_current(ctx.epoch);
                action = machine.handle(LinkEvent::Closed { should_run });
            }
            LinkAction::ScheduleReconnect { attempt, delay } => {
                bump(&ctx.metrics.reconnects_scheduled);
                info!(
                    attempt,
                    max_attempts = ctx.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "reconnect_scheduled"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return,
                }
                action = machine.handle(LinkEvent::BackoffElapsed);
            }
            LinkAction::GiveUp => {
                bump(&ctx.metrics.give_ups);
                ctx.store.set_source_running(ctx.epoch, false);
                warn!(
                    attempts = machine.attempts(),
                    url = %ctx.url,
                    "❌ Live stream retries exhausted"
                );
                return;
            }
            LinkAction::None | LinkAction::Teardown => return,
        }
    }
}
