//! Session State Store
//!
//! Single source of truth for the event buffer, counters, running flag,
//! connection status and last error. Every operation runs inside one write
//! lock, so a timer tick and a socket frame can interleave in any order
//! without leaving half-applied updates behind.
//!
//! Producers (generator, socket worker) must hold a source claim. Claims are
//! epoch-stamped: claiming again, releasing, or resetting invalidates the old
//! epoch, and writes tagged with a stale epoch are dropped.

use std::collections::VecDeque;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use super::filter::FilterState;
use super::mode::{LocalReason, SessionMode};
use crate::models::{ConnectionStatus, SessionStats, StreamStats, TransactionEvent};
use crate::remote::RemoteStatus;

/// Which producer is allowed to write events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Live,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceClaim {
    pub source: EventSource,
    pub epoch: u64,
}

/// How an inserted event moves the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUpdate {
    /// Demo backfill: buffer only
    None,
    /// +1 processed, +1 fraud if the event is fraudulent
    Increment,
    /// Totals reported by the remote service
    Authoritative(StreamStats),
}

/// Change notification for consumers
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    EventAdded {
        id: String,
        is_fraud: bool,
        event: Box<TransactionEvent>,
    },
    StatsChanged,
    StatusChanged(ConnectionStatus),
    ModeChanged(SessionMode),
    EventsCleared,
    Reset,
    Error(String),
}

impl StoreEvent {
    fn added(event: &TransactionEvent) -> Self {
        StoreEvent::EventAdded {
            id: event.id().to_string(),
            is_fraud: event.is_fraud(),
            event: Box::new(event.clone()),
        }
    }
}

/// Read-only copy of the whole store
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub mode: SessionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_reason: Option<LocalReason>,
    pub status: ConnectionStatus,
    pub stats: SessionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub events: Vec<TransactionEvent>,
}

struct Inner {
    events: VecDeque<TransactionEvent>,
    capacity: usize,
    stats: SessionStats,
    status: ConnectionStatus,
    last_error: Option<String>,
    mode: SessionMode,
    local_reason: Option<LocalReason>,
    claim: Option<SourceClaim>,
    next_epoch: u64,
    reset_generation: u64,
    /// False from a local reset until the remote service acknowledges one
    remote_counts_trusted: bool,
}

impl Inner {
    fn claim_is_current(&self, epoch: u64) -> bool {
        matches!(self.claim, Some(c) if c.epoch == epoch)
    }

    fn push_head(&mut self, event: TransactionEvent, counters: CounterUpdate) {
        let is_fraud = event.is_fraud();
        self.events.push_front(event);
        self.events.truncate(self.capacity);

        match counters {
            CounterUpdate::None => {}
            CounterUpdate::Authoritative(remote) if self.remote_counts_trusted => {
                self.fold_remote_counts(remote.total_processed, remote.total_fraud);
            }
            // Untrusted remote totals count like a local increment
            CounterUpdate::Increment | CounterUpdate::Authoritative(_) => {
                self.stats.transactions_processed += 1;
                if is_fraud {
                    self.stats.fraud_count += 1;
                }
            }
        }
    }

    /// Remote totals never move the local counters backwards.
    fn fold_remote_counts(&mut self, processed: u64, fraud: u64) {
        self.stats.transactions_processed = self.stats.transactions_processed.max(processed);
        self.stats.fraud_count = self.stats.fraud_count.max(fraud);
        self.enforce_counter_order();
    }

    fn enforce_counter_order(&mut self) {
        if self.stats.fraud_count > self.stats.transactions_processed {
            self.stats.fraud_count = self.stats.transactions_processed;
        }
    }
}

pub struct SessionStore {
    inner: RwLock<Inner>,
    updates: broadcast::Sender<StoreEvent>,
}

impl SessionStore {
    pub fn new(capacity: usize, stats: SessionStats, mode: SessionMode) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            inner: RwLock::new(Inner {
                events: VecDeque::with_capacity(capacity.max(1)),
                capacity: capacity.max(1),
                stats,
                status: ConnectionStatus::Disconnected,
                last_error: None,
                mode,
                local_reason: None,
                claim: None,
                next_epoch: 0,
                reset_generation: 0,
                remote_counts_trusted: true,
            }),
            updates,
        }
    }

    /// Subscribe to change notifications. Lagging receivers skip ahead;
    /// `snapshot()` is always authoritative.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.updates.subscribe()
    }

    fn notify(&self, event: StoreEvent) {
        let _ = self.updates.send(event);
    }

    // =========================================================================
    // SOURCE CLAIMS
    // =========================================================================

    /// Make `source` the only producer allowed to write. Any previous claim
    /// is invalidated.
    pub fn claim_source(&self, source: EventSource) -> u64 {
        let mut inner = self.inner.write();
        inner.next_epoch += 1;
        let epoch = inner.next_epoch;
        if let Some(prev) = inner.claim {
            debug!(prev = ?prev.source, next = ?source, "source claim superseded");
        }
        inner.claim = Some(SourceClaim { source, epoch });
        epoch
    }

    /// Drop the claim if `epoch` still holds it.
    pub fn release_source(&self, epoch: u64) -> bool {
        let mut inner = self.inner.write();
        if inner.claim_is_current(epoch) {
            inner.claim = None;
            true
        } else {
            false
        }
    }

    pub fn active_claim(&self) -> Option<SourceClaim> {
        self.inner.read().claim
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.inner.read().claim_is_current(epoch)
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Append one produced event. Returns false (and changes nothing) when
    /// `epoch` no longer holds the source claim.
    pub fn ingest(&self, epoch: u64, event: TransactionEvent, stats: Option<StreamStats>) -> bool {
        let added = StoreEvent::added(&event);
        {
            let mut inner = self.inner.write();
            if !inner.claim_is_current(epoch) {
                return false;
            }
            let counters = match stats {
                Some(s) => CounterUpdate::Authoritative(s),
                None => CounterUpdate::Increment,
            };
            inner.push_head(event, counters);
        }
        self.notify(added);
        true
    }

    /// Insert an injected event at the head regardless of source claims.
    pub fn prepend_injected(&self, event: TransactionEvent, counters: CounterUpdate) {
        let added = StoreEvent::added(&event);
        self.inner.write().push_head(event, counters);
        self.notify(added);
    }

    /// Insert a batch so that `events[0]` ends up at the head.
    pub fn insert_batch(&self, events: Vec<TransactionEvent>, counters: CounterUpdate) -> usize {
        let count = events.len();
        {
            let mut inner = self.inner.write();
            for event in events.into_iter().rev() {
                inner.push_head(event, counters);
            }
        }
        if count > 0 {
            self.notify(StoreEvent::StatsChanged);
        }
        count
    }

    pub fn clear_events(&self) {
        self.inner.write().events.clear();
        self.notify(StoreEvent::EventsCleared);
    }

    /// Permanently drop every non-fraud event. Returns how many were removed.
    pub fn retain_fraud(&self) -> usize {
        let removed = {
            let mut inner = self.inner.write();
            let before = inner.events.len();
            inner.events.retain(|e| e.is_fraud());
            before - inner.events.len()
        };
        self.notify(StoreEvent::EventsCleared);
        removed
    }

    pub fn events(&self) -> Vec<TransactionEvent> {
        self.inner.read().events.iter().cloned().collect()
    }

    pub fn head(&self) -> Option<TransactionEvent> {
        self.inner.read().events.front().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }

    /// Read-time projection; the buffer itself is untouched.
    pub fn filtered(&self, filter: &FilterState) -> Vec<TransactionEvent> {
        filter.apply(self.inner.read().events.iter())
    }

    // =========================================================================
    // STATS / STATUS
    // =========================================================================

    pub fn stats(&self) -> SessionStats {
        self.inner.read().stats.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.read().status
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        let changed = {
            let mut inner = self.inner.write();
            let changed = inner.status != status;
            inner.status = status;
            changed
        };
        if changed {
            self.notify(StoreEvent::StatusChanged(status));
        }
    }

    /// Status update from a producer; ignored when its claim is stale.
    pub fn set_source_status(&self, epoch: u64, status: ConnectionStatus) -> bool {
        let changed = {
            let mut inner = self.inner.write();
            if !inner.claim_is_current(epoch) {
                return false;
            }
            let changed = inner.status != status;
            inner.status = status;
            changed
        };
        if changed {
            self.notify(StoreEvent::StatusChanged(status));
        }
        true
    }

    pub fn set_running(&self, running: bool) {
        self.inner.write().stats.is_running = running;
        self.notify(StoreEvent::StatsChanged);
    }

    /// Running-flag update from a producer; ignored when its claim is stale.
    pub fn set_source_running(&self, epoch: u64, running: bool) -> bool {
        {
            let mut inner = self.inner.write();
            if !inner.claim_is_current(epoch) {
                return false;
            }
            inner.stats.is_running = running;
        }
        self.notify(StoreEvent::StatsChanged);
        true
    }

    pub fn set_speed(&self, speed: f64) {
        self.inner.write().stats.speed = speed;
        self.notify(StoreEvent::StatsChanged);
    }

    /// Fold a `GET /status` answer in: readiness, dataset metadata, fraud
    /// rate, and the remote counters (never moving local ones backwards).
    ///
    /// `generation` is the reset generation observed before the request was
    /// sent. Counters are skipped if a reset happened since, or if the last
    /// reset was never acknowledged by the remote service.
    pub fn apply_remote_status(&self, status: &RemoteStatus, generation: u64) {
        {
            let mut inner = self.inner.write();
            inner.stats.models_ready = status.models_ready;
            if status.dataset_stats.is_some() {
                inner.stats.dataset_stats = status.dataset_stats.clone();
            }
            if let Some(rate) = status.fraud_rate.filter(|r| (0.0..=1.0).contains(r)) {
                inner.stats.fraud_rate = rate;
            }
            if inner.reset_generation == generation && inner.remote_counts_trusted {
                inner.fold_remote_counts(status.transactions_processed, status.fraud_count);
            } else {
                debug!(generation, current = inner.reset_generation, "remote counters skipped");
            }
        }
        self.notify(StoreEvent::StatsChanged);
    }

    pub fn mode(&self) -> SessionMode {
        self.inner.read().mode
    }

    pub fn set_mode(&self, mode: SessionMode, reason: Option<LocalReason>) {
        {
            let mut inner = self.inner.write();
            inner.mode = mode;
            inner.local_reason = reason;
            if mode == SessionMode::LocalSimulation {
                inner.stats.models_ready = true;
                inner.stats.dataset_stats = None;
            }
        }
        self.notify(StoreEvent::ModeChanged(mode));
    }

    // =========================================================================
    // ERRORS
    // =========================================================================

    pub fn last_error(&self) -> Option<String> {
        self.inner.read().last_error.clone()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.inner.write().last_error = Some(message.clone());
        self.notify(StoreEvent::Error(message));
    }

    pub fn clear_error(&self) {
        self.inner.write().last_error = None;
    }

    // =========================================================================
    // RESET
    // =========================================================================

    /// Empty buffer, zero counters, not running, disconnected, no producer.
    /// The last error and mode are left alone. Returns the new reset
    /// generation; remote counters stay ignored until
    /// `acknowledge_remote_reset` is called with it.
    pub fn reset(&self) -> u64 {
        let generation = {
            let mut inner = self.inner.write();
            inner.events.clear();
            inner.stats.transactions_processed = 0;
            inner.stats.fraud_count = 0;
            inner.stats.is_running = false;
            inner.status = ConnectionStatus::Disconnected;
            inner.claim = None;
            inner.reset_generation += 1;
            inner.remote_counts_trusted = false;
            inner.reset_generation
        };
        self.notify(StoreEvent::Reset);
        generation
    }

    pub fn reset_generation(&self) -> u64 {
        self.inner.read().reset_generation
    }

    /// The remote service zeroed its counters too; trust them again unless
    /// a newer reset has happened meanwhile.
    pub fn acknowledge_remote_reset(&self, generation: u64) {
        let mut inner = self.inner.write();
        if inner.reset_generation == generation {
            inner.remote_counts_trusted = true;
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.read();
        SessionSnapshot {
            mode: inner.mode,
            local_reason: inner.local_reason,
            status: inner.status,
            stats: inner.stats.clone(),
            last_error: inner.last_error.clone(),
            events: inner.events.iter().cloned().collect(),
        }
    }
}
