//! Session state and the operator-facing controller.

pub mod controller;
pub mod explain;
pub mod filter;
pub mod generator;
pub mod mode;
pub mod store;

pub use controller::SessionController;
pub use filter::FilterState;
pub use generator::{EventSynth, LocalGenerator};
pub use mode::{LocalReason, ModeSelector, SessionMode};
pub use store::{CounterUpdate, EventSource, SessionSnapshot, SessionStore, StoreEvent};
