//! Error types for simulation runs.

use repdb_kernel::KernelError;
use repdb_types::{Operation, Tick};

/// Errors that stop a simulation run.
#[derive(thiserror::Error, Debug)]
pub enum SimError {
    /// A simulation setting is out of range.
    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),

    /// The engine could not be created.
    #[error("engine setup failed: {0}")]
    Setup(#[source] KernelError),

    /// The engine rejected an operation.
    #[error("{op} at tick {tick} rejected: {source}")]
    Rejected {
        op: Operation,
        tick: Tick,
        #[source]
        source: KernelError,
    },

    /// A seeded run failed; rerun with `seed` to reproduce.
    #[error("seed {seed} failed: {source}")]
    SeedFailed {
        seed: u64,
        #[source]
        source: Box<SimError>,
    },

    /// An invariant was violated after an operation was applied.
    #[error("invariant {invariant} violated at tick {tick}: {message}")]
    InvariantViolation {
        invariant: String,
        message: String,
        context: Vec<(String, String)>,
        tick: Tick,
    },
}
