//! Declared-transition state machines
//!
//! Transfer, connection and discovery lifecycles as fixed transition
//! tables. Each machine is guarded by its own mutex; `state_changed`
//! callbacks observe transitions in program order and are invoked while
//! the lock is held, so they must not call back into the same machine.

pub mod connection;
pub mod discovery;
pub mod transfer;

pub use connection::{ConnectionState, ConnectionStateMachine};
pub use discovery::{DiscoveryState, DiscoveryStateMachine};
pub use transfer::{TransferState, TransferStateMachine};
