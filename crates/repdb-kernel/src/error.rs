//! Errors returned by the kernel.

use repdb_site::SiteError;
use repdb_types::{SiteId, Tick, TxnId, VarId};

/// Protocol violations: the script is malformed and the run should stop.
///
/// Lock conflicts, unavailable sites and deadlocks are normal outcomes and
/// are reported as events instead.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("transaction {0} was already started")]
    DuplicateTransaction(TxnId),

    #[error("transaction {0} was never started")]
    UnknownTransaction(TxnId),

    #[error("transaction {0} has already ended")]
    TransactionEnded(TxnId),

    #[error("read-only transaction {0} cannot write")]
    ReadOnlyWrite(TxnId),

    #[error("variable {0} does not exist")]
    UnknownVariable(VarId),

    #[error("site {0} does not exist")]
    UnknownSite(SiteId),

    #[error("operation at tick {attempted} precedes current tick {current}")]
    TickRegression { current: Tick, attempted: Tick },

    #[error(transparent)]
    Site(#[from] SiteError),
}
