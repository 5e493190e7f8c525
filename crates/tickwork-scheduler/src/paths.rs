//! Store layout for tenant-scoped state.
//!
//! Every path starts with `tenants/{tenant}`, so one tenant's data never
//! shares a prefix with another's.

use tickwork_core::{JobId, QueueItemId, TenantId};

pub const TENANTS: &str = "tenants";

pub fn tenant(t: &TenantId) -> String {
    format!("{TENANTS}/{t}")
}

pub fn jobs(t: &TenantId) -> String {
    format!("{TENANTS}/{t}/jobs")
}

pub fn job(t: &TenantId, id: &JobId) -> String {
    format!("{TENANTS}/{t}/jobs/{id}")
}

pub fn queue(t: &TenantId) -> String {
    format!("{TENANTS}/{t}/queue")
}

pub fn queue_item(t: &TenantId, id: &QueueItemId) -> String {
    format!("{TENANTS}/{t}/queue/{id}")
}

pub fn logs(t: &TenantId) -> String {
    format!("{TENANTS}/{t}/logs")
}

pub fn log_entry(t: &TenantId, id: &str) -> String {
    format!("{TENANTS}/{t}/logs/{id}")
}

pub fn credits(t: &TenantId) -> String {
    format!("{TENANTS}/{t}/credits")
}

pub fn secret(t: &TenantId) -> String {
    format!("{TENANTS}/{t}/secret")
}

pub fn usage(t: &TenantId) -> String {
    format!("{TENANTS}/{t}/usage")
}

/// A collection in the tenant's administrative target.
pub fn data(t: &TenantId, collection: &str) -> String {
    format!("{TENANTS}/{t}/data/{collection}")
}

pub fn backup(t: &TenantId, name: &str) -> String {
    format!("{TENANTS}/{t}/backups/{name}")
}

pub fn archive(t: &TenantId, collection: &str) -> String {
    format!("{TENANTS}/{t}/archive/{collection}")
}
