//! Local event generator
//!
//! Stands in for the remote stream when the session runs in local simulation
//! mode. One tick produces one synthetic transaction; ticks start one period
//! after `start()`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::store::{EventSource, SessionStore};
use crate::models::{ConnectionStatus, ModelScores, TransactionEvent};

/// Shortest tick period regardless of speed
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(100);

/// Fraud share used for generated demo backfills
pub const DEMO_FRAUD_RATE: f64 = 0.3;

/// Tick period for a speed multiplier (events per second at speed 1.0 is 1).
pub fn period_for(speed: f64) -> Duration {
    if !speed.is_finite() || speed <= 0.0 {
        return Duration::from_secs(1);
    }
    Duration::from_secs_f64(1.0 / speed).max(MIN_TICK_PERIOD)
}

// =============================================================================
// SYNTHESIS
// =============================================================================

/// Deterministic (when seeded) source of plausible transactions
pub struct EventSynth {
    rng: ChaCha8Rng,
    counter: u64,
    fraud_rate: f64,
    feature_count: usize,
}

impl EventSynth {
    pub fn new(seed: Option<u64>, fraud_rate: f64, feature_count: usize) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            rng,
            counter: 0,
            fraud_rate: fraud_rate.clamp(0.0, 1.0),
            feature_count,
        }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn fraud_rate(&self) -> f64 {
        self.fraud_rate
    }

    pub fn set_fraud_rate(&mut self, rate: f64) {
        if (0.0..=1.0).contains(&rate) {
            self.fraud_rate = rate;
        }
    }

    /// Next event at the configured fraud rate; `force` makes it fraudulent.
    pub fn next_event(&mut self, force: bool) -> TransactionEvent {
        let rate = self.fraud_rate;
        self.next_with_rate(rate, force)
    }

    pub fn next_with_rate(&mut self, fraud_rate: f64, force: bool) -> TransactionEvent {
        self.counter += 1;
        let is_fraud = force || self.rng.gen_bool(fraud_rate.clamp(0.0, 1.0));

        let (score, amount) = if is_fraud {
            (
                self.rng.gen_range(0.7..=1.0),
                self.rng.gen_range(500.0..5000.0),
            )
        } else {
            (self.rng.gen_range(0.0..0.4), self.rng.gen_range(10.0..510.0))
        };

        let scores = ModelScores::new(
            score * self.rng.gen_range(0.7..=1.0),
            score * self.rng.gen_range(0.5..=1.0),
            score * self.rng.gen_range(0.3..=0.7),
        );

        let features: Vec<f64> = (0..self.feature_count)
            .map(|_| self.rng.gen_range(-1.0..=1.0))
            .collect();

        let prefix = if force { "INJECT" } else { "LOCAL" };
        let now = Utc::now();
        let id = format!("{}-{}-{}", prefix, self.counter, now.timestamp_millis());

        TransactionEvent::new(id, now, amount, score, is_fraud)
            .with_model_scores(scores)
            .with_features(features)
            .with_ground_truth(is_fraud)
    }
}

// =============================================================================
// TIMER
// =============================================================================

struct Ticker {
    handle: JoinHandle<()>,
    epoch: u64,
}

pub struct LocalGenerator {
    store: Arc<SessionStore>,
    synth: Arc<Mutex<EventSynth>>,
    ticker: Mutex<Option<Ticker>>,
}

impl LocalGenerator {
    pub fn new(store: Arc<SessionStore>, synth: EventSynth) -> Self {
        Self {
            store,
            synth: Arc::new(Mutex::new(synth)),
            ticker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Begin ticking at `speed`. Returns false if already running.
    pub fn start(&self, speed: f64) -> bool {
        let mut ticker = self.ticker.lock();
        if let Some(t) = ticker.as_ref() {
            if !t.handle.is_finished() {
                return false;
            }
        }

        let epoch = self.store.claim_source(EventSource::Local);
        self.store.set_source_status(epoch, ConnectionStatus::Connected);
        self.store.set_running(true);

        let period = period_for(speed);
        let store = self.store.clone();
        let synth = self.synth.clone();

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let event = synth.lock().next_event(false);
                if !store.ingest(epoch, event, None) {
                    debug!(epoch, "generator claim lost, stopping ticks");
                    break;
                }
            }
        });

        info!(speed, period_ms = period.as_millis() as u64, "▶️ Local generator started");
        *ticker = Some(Ticker { handle, epoch });
        true
    }

    /// Cancel the timer and release the source. Status is left to the
    /// caller. Returns true if a timer was running.
    pub fn stop(&self) -> bool {
        let taken = self.ticker.lock().take();
        let was_running = match taken {
            Some(t) => {
                t.handle.abort();
                self.store.release_source(t.epoch);
                true
            }
            None => false,
        };
        self.store.set_running(false);
        if was_running {
            info!("⏹️ Local generator stopped");
        }
        was_running
    }

    /// Stop and start again at a new speed if currently running.
    pub fn restart(&self, speed: f64) -> bool {
        if self.is_running() {
            self.stop();
            self.start(speed)
        } else {
            false
        }
    }

    /// One event outside the timer, e.g. an injected fraud.
    pub fn synthesize(&self, force: bool) -> TransactionEvent {
        self.synth.lock().next_event(force)
    }

    /// `count` events at `fraud_rate`, in generation order.
    pub fn synthesize_batch(&self, count: usize, fraud_rate: f64) -> Vec<TransactionEvent> {
        let mut synth = self.synth.lock();
        (0..count)
            .map(|_| synth.next_with_rate(fraud_rate, false))
            .collect()
    }
}

impl Drop for LocalGenerator {
    fn drop(&mut self) {
        if let Some(t) = self.ticker.lock().take() {
            t.handle.abort();
        }
    }
}
