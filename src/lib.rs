//! FraudGuard stream coordinator
//!
//! Session-state core for a transaction-risk dashboard: a live WebSocket feed
//! from the remote scoring service with bounded reconnects, a local generator
//! used when the service is unavailable, and one store that both feed into.
//! Binaries and tests drive it through [`SessionController`].

pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod remote;
pub mod session;
pub mod stream;

pub use config::SessionConfig;
pub use error::{CoreError, CoreResult};
pub use models::{ConnectionStatus, RiskLevel, SessionStats, TransactionEvent};
pub use session::{FilterState, SessionController, SessionMode, SessionSnapshot, StoreEvent};
