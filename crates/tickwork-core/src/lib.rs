//! `tickwork-core` — identifiers, configuration and process-level errors
//! shared by every tickwork crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::TickworkConfig;
pub use error::{Result, TickworkError};
pub use types::{JobId, QueueItemId, TenantId};
