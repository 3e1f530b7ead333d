//! Reconnect state machine
//!
//! Pure transitions, no timers and no I/O, so the retry contract can be
//! exercised directly:
//! - Idle → Connecting on a connect request
//! - Connecting → Connected on open (attempt counter back to zero)
//! - any → Disconnected on error (no retry by itself)
//! - close while the session should run schedules
//!   `min(base * 2^attempt, max)` and moves to Backoff, until
//!   `max_attempts` is exhausted
//! - disconnect request returns to Idle from anywhere

use std::time::Duration;

use crate::config::SessionConfig;
use crate::models::ConnectionStatus;

// =============================================================================
// POLICY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 10_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            base_ms: config.backoff_base_ms,
            max_ms: config.backoff_max_ms,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before reconnect number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.max_ms))
    }
}

// =============================================================================
// STATE MACHINE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Never connected, or torn down by a manual disconnect
    Idle,
    /// Socket open in progress
    Connecting,
    /// Socket open and streaming
    Connected,
    /// Dropped, no retry pending (error seen, or retries exhausted)
    Disconnected,
    /// Waiting for reconnect number `attempt` (1-based)
    Backoff { attempt: u32 },
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Backoff { attempt } => write!(f, "BACKOFF({})", attempt),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectRequested,
    Opened,
    Error,
    Closed { should_run: bool },
    BackoffElapsed,
    DisconnectRequested,
}

/// What the driver has to do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    None,
    Open,
    ScheduleReconnect { attempt: u32, delay: Duration },
    GiveUp,
    Teardown,
}

#[derive(Debug, Clone)]
pub struct LinkMachine {
    policy: ReconnectPolicy,
    state: LinkState,
    attempts: u32,
}

impl LinkMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: LinkState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Reconnects scheduled since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Status as shown to consumers; backoff reads as disconnected.
    pub fn status(&self) -> ConnectionStatus {
        match self.state {
            LinkState::Connecting => ConnectionStatus::Connecting,
            LinkState::Connected => ConnectionStatus::Connected,
            _ => ConnectionStatus::Disconnected,
        }
    }

    pub fn handle(&mut self, event: LinkEvent) -> LinkAction {
        match event {
            LinkEvent::ConnectRequested => match self.state {
                LinkState::Connecting | LinkState::Connected | LinkState::Backoff { .. } => {
                    LinkAction::None
                }
                LinkState::Idle | LinkState::Disconnected => {
                    self.state = LinkState::Connecting;
                    LinkAction::Open
                }
            },
            LinkEvent::Opened => {
                self.state = LinkState::Connected;
                self.attempts = 0;
                LinkAction::None
            }
            LinkEvent::Error => {
                self.state = LinkState::Disconnected;
                LinkAction::None
            }
            LinkEvent::Closed { should_run } => {
                if !should_run {
                    self.state = LinkState::Disconnected;
                    return LinkAction::None;
                }
                if self.attempts >= self.policy.max_attempts {
                    self.state = LinkState::Disconnected;
                    return LinkAction::GiveUp;
                }
                let delay = self.policy.delay_for(self.attempts);
                self.attempts += 1;
                self.state = LinkState::Backoff {
                    attempt: self.attempts,
                };
                LinkAction::ScheduleReconnect {
                    attempt: self.attempts,
                    delay,
                }
            }
            LinkEvent::BackoffElapsed => match self.state {
                LinkState::Backoff { .. } => {
                    self.state = LinkState::Connecting;
                    LinkAction::Open
                }
                _ => LinkAction::None,
            },
            LinkEvent::DisconnectRequested => {
                self.state = LinkState::Idle;
                self.attempts = 0;
                LinkAction::Teardown
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
