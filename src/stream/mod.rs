//! Live stream plumbing: reconnect policy, socket transport and the
//! connection manager that ties them to the session store.

pub mod backoff;
pub mod connection;
pub mod transport;

pub use backoff::{LinkAction, LinkEvent, LinkMachine, LinkState, ReconnectPolicy};
pub use connection::{ConnectionManager, ConnectionMetrics, MetricsSummary};
pub use transport::{StreamConnection, StreamFrame, StreamTransport, WsTransport};
