use thiserror::Error;
use tickwork_core::{JobId, QueueItemId, TenantId};
use tickwork_store::StoreError;

use crate::cipher::CipherError;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying store failure (read, write or transaction).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The cron expression could not be parsed. The job stays unscheduled.
    #[error("Invalid schedule {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// The tenant's balance does not cover the cost of the operation.
    #[error("No credits remaining (balance {balance}, required {required})")]
    InsufficientCredit { balance: u64, required: u64 },

    /// The tenant exhausted its request window.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A probe, administrative target or other collaborator call failed.
    /// Never retried here; the next scheduled firing is the retry.
    #[error("External call failed: {0}")]
    External(String),

    /// Malformed ciphertext or wrong secret.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Job not found: {tenant}/{id}")]
    JobNotFound { tenant: TenantId, id: JobId },

    #[error("Queue item not found: {tenant}/{id}")]
    QueueItemNotFound { tenant: TenantId, id: QueueItemId },

    #[error("No encryption secret configured for tenant {tenant}")]
    MissingSecret { tenant: TenantId },

    #[error("Invalid tenant id: {0:?}")]
    InvalidTenant(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Short error code string for the request-handling layer.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Store(_) => "STORE_ERROR",
            SchedulerError::InvalidSchedule { .. } => "INVALID_SCHEDULE",
            SchedulerError::InsufficientCredit { .. } => "PAYMENT_REQUIRED",
            SchedulerError::RateLimited { .. } => "RATE_LIMITED",
            SchedulerError::External(_) => "EXTERNAL_FAILURE",
            SchedulerError::Decryption(_) => "DECRYPTION_ERROR",
            SchedulerError::Encryption(_) => "ENCRYPTION_ERROR",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::QueueItemNotFound { .. } => "QUEUE_ITEM_NOT_FOUND",
            SchedulerError::MissingSecret { .. } => "MISSING_SECRET",
            SchedulerError::InvalidTenant(_) => "INVALID_TENANT",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<CipherError> for SchedulerError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::Decrypt(msg) => SchedulerError::Decryption(msg),
            CipherError::Encrypt(msg) => SchedulerError::Encryption(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
