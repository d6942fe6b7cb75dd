//! Deposit-detected events and the listener registry.

mod registry;
mod types;

pub use registry::{DepositListener, ListenerId, ListenerRegistry};
pub use types::DepositDetected;
