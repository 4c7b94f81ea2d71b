//! # repdb-types: Core types for `repdb`
//!
//! This crate contains shared types used across the `repdb` system:
//! - Entity IDs ([`TxnId`], [`VarId`], [`SiteId`])
//! - Logical time ([`Tick`], [`CommitStamp`])
//! - Lock and site state enums ([`LockMode`], [`SiteStatus`])
//! - Typed script operations ([`Operation`])

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The value stored in a variable.
pub type Value = i64;

// ============================================================================
// Entity IDs - All Copy (cheap small values)
// ============================================================================

/// Identifier of a transaction, written `T<n>` in scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(u64);

impl TxnId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl From<u64> for TxnId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TxnId> for u64 {
    fn from(id: TxnId) -> Self {
        id.0
    }
}

/// Identifier of a logical variable, written `x<n>` in scripts.
///
/// Even-indexed variables are replicated at every site; odd-indexed
/// variables live at exactly one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarId(u32);

impl VarId {
    pub const fn new(index: u32) -> Self {
        debug_assert!(index > 0, "variable indices start at 1");
        Self(index)
    }

    pub fn index(&self) -> u32 {
        self.0
    }

    /// Returns true if the variable is copied to every site.
    pub fn is_replicated(&self) -> bool {
        self.0 % 2 == 0
    }
}

impl Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

impl From<VarId> for u32 {
    fn from(id: VarId) -> Self {
        id.0
    }
}

/// Identifier of a storage site (data manager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(u32);

impl SiteId {
    pub const fn new(id: u32) -> Self {
        debug_assert!(id > 0, "site ids start at 1");
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SiteId> for u32 {
    fn from(id: SiteId) -> Self {
        id.0
    }
}

// ============================================================================
// Logical Time
// ============================================================================

/// Logical time. One tick elapses per script line.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Tick(u64);

impl Tick {
    /// The time at which initial values are committed.
    pub const ZERO: Tick = Tick(0);

    pub const fn new(tick: u64) -> Self {
        Self(tick)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the following tick.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Tick {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Commit time of a version.
///
/// Several commits can be finalized within one tick (a retry pass may
/// release a queued `end`), so the tick is paired with a global commit
/// sequence number. Ordering is by tick, then sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CommitStamp {
    tick: Tick,
    seq: u64,
}

impl CommitStamp {
    /// Stamp of the initial values loaded at startup.
    pub const INITIAL: CommitStamp = CommitStamp {
        tick: Tick::ZERO,
        seq: 0,
    };

    pub const fn new(tick: Tick, seq: u64) -> Self {
        Self { tick, seq }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Display for CommitStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.tick, self.seq)
    }
}

// ============================================================================
// Lock and Site State
// ============================================================================

/// Mode of a variable lock held at a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Read lock; any number of holders.
    Shared,
    /// Write lock; a single holder.
    Exclusive,
}

impl Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "S"),
            LockMode::Exclusive => write!(f, "X"),
        }
    }
}

/// Availability of a site.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum SiteStatus {
    #[default]
    Up,
    Down,
    /// Back online, but some replicated variables have not seen a commit
    /// since recovery and cannot be read directly.
    Recovering,
}

impl Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteStatus::Up => write!(f, "up"),
            SiteStatus::Down => write!(f, "down"),
            SiteStatus::Recovering => write!(f, "recovering"),
        }
    }
}

// ============================================================================
// Operations - Copy (all fields are small ids and values)
// ============================================================================

/// A typed script operation fed to the transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// `begin(T)`: start a read-write transaction.
    Begin { txn: TxnId },
    /// `beginRO(T)`: start a read-only (snapshot) transaction.
    BeginReadOnly { txn: TxnId },
    /// `R(T, x)`: read a variable.
    Read { txn: TxnId, var: VarId },
    /// `W(T, x, v)`: write a variable.
    Write { txn: TxnId, var: VarId, value: Value },
    /// `end(T)`: commit or abort.
    End { txn: TxnId },
    /// `fail(s)`: take a site down.
    Fail { site: SiteId },
    /// `recover(s)`: bring a site back.
    Recover { site: SiteId },
    /// `dump()`: print committed values at every site.
    Dump,
    /// `querystate()`: print transaction manager state.
    QueryState,
}

impl Operation {
    pub fn begin(txn: TxnId) -> Self {
        Self::Begin { txn }
    }

    pub fn begin_read_only(txn: TxnId) -> Self {
        Self::BeginReadOnly { txn }
    }

    pub fn read(txn: TxnId, var: VarId) -> Self {
        Self::Read { txn, var }
    }

    pub fn write(txn: TxnId, var: VarId, value: Value) -> Self {
        Self::Write { txn, var, value }
    }

    pub fn end(txn: TxnId) -> Self {
        Self::End { txn }
    }

    pub fn fail(site: SiteId) -> Self {
        Self::Fail { site }
    }

    pub fn recover(site: SiteId) -> Self {
        Self::Recover { site }
    }

    /// Returns the transaction the operation belongs to, if any.
    pub fn txn(&self) -> Option<TxnId> {
        match self {
            Operation::Begin { txn }
            | Operation::BeginReadOnly { txn }
            | Operation::Read { txn, .. }
            | Operation::Write { txn, .. }
            | Operation::End { txn } => Some(*txn),
            Operation::Fail { .. }
            | Operation::Recover { .. }
            | Operation::Dump
            | Operation::QueryState => None,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Begin { txn } => write!(f, "begin({txn})"),
            Operation::BeginReadOnly { txn } => write!(f, "beginRO({txn})"),
            Operation::Read { txn, var } => write!(f, "R({txn},{var})"),
            Operation::Write { txn, var, value } => write!(f, "W({txn},{var},{value})"),
            Operation::End { txn } => write!(f, "end({txn})"),
            Operation::Fail { site } => write!(f, "fail({site})"),
            Operation::Recover { site } => write!(f, "recover({site})"),
            Operation::Dump => write!(f, "dump()"),
            Operation::QueryState => write!(f, "querystate()"),
        }
    }
}
