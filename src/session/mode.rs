//! Live vs. local simulation mode
//!
//! Decided once from configuration. The only transition afterwards is the
//! one-way failover Live → LocalSimulation when the first status probe fails.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Live,
    LocalSimulation,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::LocalSimulation => write!(f, "local_simulation"),
        }
    }
}

/// Why a session runs on the local generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalReason {
    /// Demo mode was forced by configuration
    Forced,
    /// Production build with no remote endpoint configured
    NoEndpoint,
    /// The first status probe failed
    Unreachable,
}

impl std::fmt::Display for LocalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forced => write!(f, "forced"),
            Self::NoEndpoint => write!(f, "no_endpoint"),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}

pub struct ModeSelector {
    state: RwLock<(SessionMode, Option<LocalReason>)>,
    probed: AtomicBool,
}

impl ModeSelector {
    /// Evaluate the configuration. A Live result is tentative until the
    /// first status probe resolves it.
    pub fn decide(config: &SessionConfig) -> Self {
        let reason = if config.force_demo {
            Some(LocalReason::Forced)
        } else if config.effective_api_base().is_none() {
            Some(LocalReason::NoEndpoint)
        } else {
            None
        };

        let mode = match reason {
            Some(_) => SessionMode::LocalSimulation,
            None => SessionMode::Live,
        };

        Self {
            state: RwLock::new((mode, reason)),
            // Local from the start needs no probe
            probed: AtomicBool::new(reason.is_some()),
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.state.read().0
    }

    pub fn is_live(&self) -> bool {
        self.mode() == SessionMode::Live
    }

    pub fn reason(&self) -> Option<LocalReason> {
        self.state.read().1
    }

    /// True until the first status probe has been recorded.
    pub fn needs_probe(&self) -> bool {
        !self.probed.load(Ordering::Acquire)
    }

    /// Record that the first probe happened. Returns true for the caller
    /// that made the transition.
    pub fn mark_probed(&self) -> bool {
        !self.probed.swap(true, Ordering::AcqRel)
    }

    /// Permanently switch to local simulation. Returns false if the session
    /// was already local.
    pub fn fail_over(&self, reason: LocalReason) -> bool {
        let mut state = self.state.write();
        if state.0 == SessionMode::LocalSimulation {
            return false;
        }
        info!(from = %state.0, to = %SessionMode::LocalSimulation, reason = %reason, "mode_failover");
        *state = (SessionMode::LocalSimulation, Some(reason));
        self.probed.store(true, Ordering::Release);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_base: Option<&str>, force_demo: bool, production: bool) -> SessionConfig {
        SessionConfig {
            api_base: api_base.map(str::to_string),
            force_demo,
            production,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_force_demo_wins() {
        let m = ModeSelector::decide(&config(Some("http://localhost:8000"), true, false));
        assert_eq!(m.mode(), SessionMode::LocalSimulation);
        assert_eq!(m.reason(), Some(LocalReason::Forced));
        assert!(!m.needs_probe());
    }

    #[test]
    fn test_production_without_endpoint_is_local() {
        let m = ModeSelector::decide(&config(None, false, true));
        assert_eq!(m.mode(), SessionMode::LocalSimulation);
        assert_eq!(m.reason(), Some(LocalReason::NoEndpoint));
    }

    #[test]
    fn test_endpoint_is_tentatively_live() {
        let m = ModeSelector::decide(&config(Some("http://localhost:8000"), false, true));
        assert!(m.is_live());
        assert!(m.needs_probe());
        assert!(m.mark_probed());
        assert!(!m.mark_probed());
        assert!(m.is_live());
    }

    #[test]
    fn test_failover_is_permanent() {
        let m = ModeSelector::decide(&config(Some("http://localhost:8000"), false, false));
        assert!(m.fail_over(LocalReason::Unreachable));
        assert!(!m.fail_over(LocalReason::Unreachable));
        assert_eq!(m.mode(), SessionMode::LocalSimulation);
        assert_eq!(m.reason(), Some(LocalReason::Unreachable));
        assert!(!m.needs_probe());
    }
}
