use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FREE_JOB_LIMIT: usize = 5;
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;
pub const DEFAULT_RATE_MAX_REQUESTS: u32 = 60;
pub const DEFAULT_QUEUE_BATCH_SIZE: usize = 50;
pub const DEFAULT_BURST_ITERATIONS: usize = 20;
pub const MAX_PING_TIMEOUT_SECS: u64 = 30; // hard ceiling for reachability probes
pub const DEFAULT_LOG_RETENTION: usize = 100;

/// Top-level config (tickwork.toml + TICKWORK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickworkConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub ping: PingConfig,
    #[serde(default)]
    pub logs: LogsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl DatabaseConfig {
    /// Create the directory that will hold the database file.
    pub fn ensure_parent_dir(&self) -> crate::error::Result<()> {
        if let Some(parent) = std::path::Path::new(&self.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Credit bookkeeping. Payment capture lives outside this process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Jobs a tenant may hold before new ones become credit-billed.
    #[serde(default = "default_free_job_limit")]
    pub free_job_limit: usize,
    /// Credits charged per billed scheduled run.
    #[serde(default = "default_cost")]
    pub run_cost: u64,
    /// Credits charged per encrypt/decrypt request.
    #[serde(default = "default_cost")]
    pub request_cost: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            free_job_limit: DEFAULT_FREE_JOB_LIMIT,
            run_cost: default_cost(),
            request_cost: default_cost(),
        }
    }
}

/// Fixed-window request limiter. State is process-local and resets on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_RATE_WINDOW_SECS,
            max_requests: DEFAULT_RATE_MAX_REQUESTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum pending items read per drain pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum drain passes per burst after a request is enqueued.
    #[serde(default = "default_burst_iterations")]
    pub burst_iterations: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_QUEUE_BATCH_SIZE,
            burst_iterations: DEFAULT_BURST_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingConfig {
    #[serde(default = "default_ping_timeout")]
    pub timeout_secs: u64,
}

impl PingConfig {
    /// Configured timeout, clamped to the 30 s ceiling.
    pub fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.clamp(1, MAX_PING_TIMEOUT_SECS)
    }
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: MAX_PING_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Entries kept per tenant; older ones are pruned after each append. 0 = keep all.
    #[serde(default = "default_log_retention")]
    pub retention: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_LOG_RETENTION,
        }
    }
}

fn default_free_job_limit() -> usize {
    DEFAULT_FREE_JOB_LIMIT
}
fn default_cost() -> u64 {
    1
}
fn default_window_secs() -> u64 {
    DEFAULT_RATE_WINDOW_SECS
}
fn default_max_requests() -> u32 {
    DEFAULT_RATE_MAX_REQUESTS
}
fn default_batch_size() -> usize {
    DEFAULT_QUEUE_BATCH_SIZE
}
fn default_burst_iterations() -> usize {
    DEFAULT_BURST_ITERATIONS
}
fn default_ping_timeout() -> u64 {
    MAX_PING_TIMEOUT_SECS
}
fn default_log_retention() -> usize {
    DEFAULT_LOG_RETENTION
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickwork/tickwork.db", home)
}

impl TickworkConfig {
    /// Load config from a TOML file with TICKWORK_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `TICKWORK_RATE_LIMIT__MAX_REQUESTS=120`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::TickworkError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(TickworkConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("TICKWORK_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickwork/tickwork.toml", home)
}
