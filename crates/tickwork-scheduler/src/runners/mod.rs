//! Kind-specific job runners.

pub mod admin;
pub mod ping;

pub use admin::{AdminTarget, StoreAdminTarget};
pub use ping::{HttpProber, Prober};

use std::sync::Arc;

use crate::queue::DrainReport;

/// External collaborators the executor dispatches to.
#[derive(Clone)]
pub struct Runners {
    pub prober: Arc<dyn Prober>,
    pub admin: Arc<dyn AdminTarget>,
}

/// Raw result of a runner, before normalisation into an `Outcome`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub success: bool,
    pub message: String,
    /// No work was found (an empty queue drain).
    pub idle: bool,
}

impl RunReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            idle: false,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            idle: false,
        }
    }

    pub fn from_drain(report: &DrainReport) -> Self {
        if report.is_idle() {
            return Self {
                success: true,
                message: "No pending items".to_string(),
                idle: true,
            };
        }
        Self {
            success: report.errors == 0,
            message: format!(
                "Processed {} item(s), {} error(s)",
                report.processed, report.errors
            ),
            idle: false,
        }
    }
}
