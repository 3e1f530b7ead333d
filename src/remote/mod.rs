//! Remote scoring service boundary

pub mod client;
pub mod types;

pub use client::{HttpRemoteClient, RemoteApi};
pub use types::{Ack, Health, RemoteStatus, SimulatorConfig};
