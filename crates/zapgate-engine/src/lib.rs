//! Session connection lifecycle: live connection handles, the pairing
//! state machine, per-connection event pumps and startup reconnection.

pub mod error;
pub mod factory;
pub mod handle;
pub mod manager;
mod pump;
pub mod reconciler;
pub mod registry;
pub mod simulated;

#[cfg(test)]
mod testing;

pub use error::EngineError;
pub use factory::ClientFactory;
pub use handle::{ConnectionHandle, QrLoop, QrOutcome};
pub use manager::{ConnectMode, SessionInfo, SessionManager};
pub use reconciler::{ReconcileReport, StartupReconciler};
pub use registry::SessionRegistry;
pub use simulated::{AutoPair, SimulatedBackend, SimulatedClient};
