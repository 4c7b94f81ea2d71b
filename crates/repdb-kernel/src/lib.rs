//! # repdb-kernel: Transaction manager for `repdb`
//!
//! The kernel routes typed [`Operation`]s to the sites that store each
//! variable and produces [`Event`]s describing what happened. It is
//! deterministic: no IO, no clocks, no randomness. Logical time is supplied
//! by the caller with every operation.
//!
//! ## Architecture
//!
//! - [`config`]: Site/variable layout and the replication rule
//! - [`transaction`]: Transaction registry entries
//! - [`waiting`]: Queued operations and the wait-for graph
//! - [`deadlock`]: Cycle enumeration and victim selection
//! - [`event`]: Events reported for every operation
//! - [`engine`]: The [`Engine`] that ties it all together
//!
//! ## Example
//!
//! ```ignore
//! use repdb_kernel::{Engine, EngineConfig};
//! use repdb_types::{Operation, Tick, TxnId, VarId};
//!
//! let mut engine = Engine::new(EngineConfig::default())?;
//! let t1 = TxnId::new(1);
//! engine.apply(Tick::new(1), Operation::begin(t1))?;
//! let events = engine.apply(Tick::new(2), Operation::write(t1, VarId::new(2), 7))?;
//! ```

pub mod config;
pub mod deadlock;
pub mod engine;
mod error;
pub mod event;
pub mod transaction;
pub mod waiting;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::KernelError;
pub use event::{Event, SiteSnapshot, StateSnapshot, TxnSummary};
pub use repdb_types::Operation;
pub use transaction::{AbortReason, Transaction, TxnStatus};
pub use waiting::{PendingAction, PendingOp, WaitEdge, WaitForGraph, WaitQueue};
