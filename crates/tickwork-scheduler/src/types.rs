use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tickwork_core::{JobId, QueueItemId};

/// Maintenance operation run against a tenant's administrative target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdminOperation {
    /// Delete every document in the collection.
    Delete { collection: String },
    /// Delete documents whose `field` timestamp is older than `days`.
    DeleteOlderThan {
        collection: String,
        field: String,
        days: u32,
    },
    /// Copy the collection to a timestamped backup.
    Backup { collection: String },
    /// Move documents older than `days` into the archive.
    Archive {
        collection: String,
        field: String,
        days: u32,
    },
    /// Delete documents where `field` (or, when unset, any field) is null.
    NullCleanup {
        collection: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
}

impl AdminOperation {
    pub fn collection(&self) -> &str {
        match self {
            AdminOperation::Delete { collection }
            | AdminOperation::DeleteOlderThan { collection, .. }
            | AdminOperation::Backup { collection }
            | AdminOperation::Archive { collection, .. }
            | AdminOperation::NullCleanup { collection, .. } => collection,
        }
    }
}

/// Kind-specific parameters of a job, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobTask {
    /// HTTP reachability probe.
    Ping {
        url: String,
        /// Exact status to require; any 2xx is accepted when unset.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_status: Option<u16>,
    },
    AdminOp { operation: AdminOperation },
    /// Drains the tenant's cipher queue once per firing.
    QueueWorker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ping,
    AdminOp,
    QueueWorker,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobKind::Ping => "ping",
            JobKind::AdminOp => "admin_op",
            JobKind::QueueWorker => "queue_worker",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A job definition as stored under `tenants/{tenant}/jobs/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Taken from the store key on read.
    #[serde(default)]
    pub id: JobId,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub task: JobTask,
    /// Cron expression (five-field standard, or six/seven-field with seconds).
    pub schedule: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Billed jobs cost credits per run (jobs beyond the free allowance).
    #[serde(default)]
    pub is_billed: bool,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status: Option<RunStatus>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Decode a stored definition, taking the id from the store key.
    pub fn from_value(id: JobId, value: Value) -> serde_json::Result<Self> {
        let mut job: Job = serde_json::from_value(value)?;
        job.id = id;
        Ok(job)
    }

    pub fn kind(&self) -> JobKind {
        match self.task {
            JobTask::Ping { .. } => JobKind::Ping,
            JobTask::AdminOp { .. } => JobKind::AdminOp,
            JobTask::QueueWorker => JobKind::QueueWorker,
        }
    }
}

/// Owner-supplied fields for a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDraft {
    pub name: String,
    #[serde(flatten)]
    pub task: JobTask,
    pub schedule: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn bool_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherAction {
    Encrypt,
    Decrypt,
}

impl std::fmt::Display for CipherAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CipherAction::Encrypt => write!(f, "encrypt"),
            CipherAction::Decrypt => write!(f, "decrypt"),
        }
    }
}

/// Lifecycle of a queued cipher request.
///
/// Only `pending -> processing -> {completed, failed}` transitions happen;
/// terminal states are never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(format!("unknown queue status: {other}")),
        }
    }
}

/// A queued cipher request under `tenants/{tenant}/queue/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    #[serde(default)]
    pub id: QueueItemId,
    pub action: CipherAction,
    pub payload: String,
    pub status: QueueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when a worker moves the item to `processing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn pending(id: QueueItemId, action: CipherAction, payload: &str) -> Self {
        Self {
            id,
            action,
            payload: payload.to_string(),
            status: QueueStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            claimed_at: None,
            processed_at: None,
        }
    }

    pub fn from_value(id: QueueItemId, value: Value) -> serde_json::Result<Self> {
        let mut item: QueueItem = serde_json::from_value(value)?;
        item.id = id;
        Ok(item)
    }
}

/// Normalised result of one job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
    /// The run found no work; it leaves no trace in history or counters.
    #[serde(default)]
    pub idle: bool,
}

impl Outcome {
    pub fn status(&self) -> RunStatus {
        if self.success {
            RunStatus::Success
        } else {
            RunStatus::Failed
        }
    }
}

/// One line of a tenant's execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub id: String,
    pub job_id: JobId,
    pub job_name: String,
    pub kind: JobKind,
    pub status: RunStatus,
    pub message: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Per-tenant request counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub requests: u64,
    #[serde(default)]
    pub encrypt: u64,
    #[serde(default)]
    pub decrypt: u64,
}

/// Response to a cipher request: either the immediate result or a queued ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: QueueItemId,
    pub status: QueueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Submission {
    pub fn completed(id: QueueItemId, result: String) -> Self {
        Self {
            id,
            status: QueueStatus::Completed,
            result: Some(result),
        }
    }

    pub fn queued(id: QueueItemId) -> Self {
        Self {
            id,
            status: QueueStatus::Pending,
            result: None,
        }
    }
}
