//! Committed version history of one variable at one site.

use repdb_types::{CommitStamp, Tick, Value};
use serde::{Deserialize, Serialize};

/// A committed value and the time it was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub value: Value,
    pub stamp: CommitStamp,
}

/// Append-only list of versions ordered by strictly increasing stamp.
///
/// A history is never empty: it starts with the initial value committed
/// at [`CommitStamp::INITIAL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistory {
    versions: Vec<Version>,
}

impl VersionHistory {
    /// Creates a history holding only the initial value.
    pub fn new(initial: Value) -> Self {
        Self {
            versions: vec![Version {
                value: initial,
                stamp: CommitStamp::INITIAL,
            }],
        }
    }

    /// Returns the most recent committed version.
    pub fn latest(&self) -> &Version {
        // Non-empty by construction.
        &self.versions[self.versions.len() - 1]
    }

    /// Returns the latest version committed strictly before `tick`.
    pub fn latest_before(&self, tick: Tick) -> Option<&Version> {
        let idx = self.versions.partition_point(|v| v.stamp.tick() < tick);
        idx.checked_sub(1).map(|i| &self.versions[i])
    }

    /// Appends a version. Returns `Err(last)` if `stamp` does not advance
    /// the history.
    pub(crate) fn append(&mut self, value: Value, stamp: CommitStamp) -> Result<(), CommitStamp> {
        let last = self.latest().stamp;
        if stamp <= last {
            return Err(last);
        }
        self.versions.push(Version { value, stamp });
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Version> {
        self.versions.iter()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
