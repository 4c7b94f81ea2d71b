//! Error types for script parsing.

use thiserror::Error;

/// Result type for script parsing.
pub type Result<T> = std::result::Result<T, ScriptError>;

/// A line that does not describe a well-formed operation.
///
/// These are reported and the line is skipped; the run continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("{op} takes {expected} argument(s), got {found}")]
    Arity {
        op: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid transaction '{0}': expected T followed by a positive integer")]
    InvalidTransaction(String),

    #[error("invalid variable '{0}': expected x followed by a positive integer")]
    InvalidVariable(String),

    #[error("invalid site '{0}': expected a positive integer")]
    InvalidSite(String),

    #[error("invalid value '{0}': expected an integer")]
    InvalidValue(String),

    #[error("malformed line: {0}")]
    Malformed(String),
}
