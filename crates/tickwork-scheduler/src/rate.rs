//! Fixed-window request limiter, one window per tenant.
//!
//! Windows live only in process memory: a restart resets every limit.

use std::time::Duration;

use dashmap::DashMap;
use tickwork_core::{config::RateLimitConfig, TenantId};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, SchedulerError};

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: Instant,
}

pub struct RateLimiter {
    windows: DashMap<TenantId, RateWindow>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            window: Duration::from_secs(config.window_secs),
            max_requests: config.max_requests,
        }
    }

    /// Count one request against the tenant's window.
    ///
    /// A rejected request does not count and changes nothing.
    pub fn check(&self, tenant: &TenantId) -> Result<()> {
        let now = Instant::now();
        let mut entry = self.windows.entry(tenant.clone()).or_insert(RateWindow {
            count: 0,
            reset_at: now + self.window,
        });

        if now > entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }

        if entry.count >= self.max_requests {
            let remaining = entry.reset_at.saturating_duration_since(now);
            let retry_after_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            debug!(tenant = %tenant, retry_after_secs, "rate limit hit");
            return Err(SchedulerError::RateLimited {
                retry_after_secs: retry_after_secs.max(1),
            });
        }

        entry.count += 1;
        Ok(())
    }

    /// Drop the tenant's window (tenant removed).
    pub fn forget(&self, tenant: &TenantId) {
        self.windows.remove(tenant);
    }

    pub fn tracked_tenants(&self) -> usize {
        self.windows.len()
    }
}
