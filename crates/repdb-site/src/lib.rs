//! # repdb-site: Data manager for a single `repdb` site
//!
//! Each site owns, for the variables placed on it:
//! - a lock table with FIFO waiting queues ([`lock`])
//! - an append-only committed version history ([`history`])
//! - the current, possibly uncommitted, value
//! - its availability status and downtime record ([`site`])
//!
//! Sites never talk to each other. The transaction manager reaches a site
//! by id and interprets the [`SiteReply`] it returns.

mod error;
pub mod history;
pub mod lock;
pub mod site;


pub use error::SiteError;
pub use history::{Version, VersionHistory};
pub use lock::{Lock, LockRequest};
pub use site::{DownInterval, Site, SiteReply};
