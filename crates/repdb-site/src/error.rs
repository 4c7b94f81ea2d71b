//! Error types for site operations.

use repdb_types::{CommitStamp, SiteId, VarId};

/// Contract violations detected by a site.
///
/// Lock conflicts and unavailability are not errors; they are reported
/// through [`crate::SiteReply`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SiteError {
    /// The variable is not placed on this site.
    #[error("variable {var} is not stored at site {site}")]
    UnknownVariable { site: SiteId, var: VarId },

    /// A commit would not advance the version history.
    #[error("commit of {var} at site {site} is not monotonic: last {last}, attempted {attempted}")]
    NonMonotonicCommit {
        site: SiteId,
        var: VarId,
        last: CommitStamp,
        attempted: CommitStamp,
    },
}
