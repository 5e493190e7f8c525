use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tickwork_core::TenantId;
use tickwork_store::{path, Store};
use tracing::info;

use crate::error::{Result, SchedulerError};
use crate::paths;
use crate::types::AdminOperation;

/// A tenant's administrative data target.
///
/// Returns a human-readable summary of what the operation did.
#[async_trait]
pub trait AdminTarget: Send + Sync {
    async fn run(&self, tenant: &TenantId, operation: &AdminOperation) -> Result<String>;
}

/// Runs maintenance operations on `tenants/{tenant}/data/{collection}` in a [`Store`].
pub struct StoreAdminTarget {
    store: Arc<dyn Store>,
}

impl StoreAdminTarget {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn documents(&self, tenant: &TenantId, collection: &str) -> Result<Vec<(String, Value)>> {
        validate_collection(collection)?;
        Ok(self.store.children(&paths::data(tenant, collection)).await?)
    }

    async fn delete_where(
        &self,
        tenant: &TenantId,
        collection: &str,
        predicate: impl Fn(&Value) -> bool + Send,
    ) -> Result<usize> {
        let base = paths::data(tenant, collection);
        let mut deleted = 0;
        for (key, doc) in self.documents(tenant, collection).await? {
            if predicate(&doc) {
                self.store.remove(&path::join(&base, &key)).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl AdminTarget for StoreAdminTarget {
    async fn run(&self, tenant: &TenantId, operation: &AdminOperation) -> Result<String> {
        let summary = match operation {
            AdminOperation::Delete { collection } => {
                let n = self.delete_where(tenant, collection, |_| true).await?;
                format!("Deleted {n} document(s) from {collection}")
            }
            AdminOperation::DeleteOlderThan {
                collection,
                field,
                days,
            } => {
                let cutoff = cutoff(*days);
                let n = self
                    .delete_where(tenant, collection, |doc| is_older(doc, field, cutoff))
                    .await?;
                format!("Deleted {n} document(s) older than {days} day(s) from {collection}")
            }
            AdminOperation::Backup { collection } => {
                let name = format!("{collection}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"));
                let target = paths::backup(tenant, &name);
                let docs = self.documents(tenant, collection).await?;
                let n = docs.len();
                for (key, doc) in docs {
                    self.store.set(&path::join(&target, &key), doc).await?;
                }
                format!("Backed up {n} document(s) from {collection} to {name}")
            }
            AdminOperation::Archive {
                collection,
                field,
                days,
            } => {
                let cutoff = cutoff(*days);
                let source = paths::data(tenant, collection);
                let target = paths::archive(tenant, collection);
                let mut moved = 0;
                for (key, doc) in self.documents(tenant, collection).await? {
                    if is_older(&doc, field, cutoff) {
                        self.store.set(&path::join(&target, &key), doc).await?;
                        self.store.remove(&path::join(&source, &key)).await?;
                        moved += 1;
                    }
                }
                format!("Archived {moved} document(s) from {collection}")
            }
            AdminOperation::NullCleanup { collection, field } => {
                let n = self
                    .delete_where(tenant, collection, |doc| has_null(doc, field.as_deref()))
                    .await?;
                format!("Removed {n} document(s) with null values from {collection}")
            }
        };
        info!(tenant = %tenant, collection = operation.collection(), %summary, "admin operation finished");
        Ok(summary)
    }
}

fn validate_collection(collection: &str) -> Result<()> {
    if collection.is_empty() || collection.contains('/') {
        return Err(SchedulerError::External(format!(
            "invalid collection name {collection:?}"
        )));
    }
    Ok(())
}

fn cutoff(days: u32) -> DateTime<Utc> {
    Utc::now() - Duration::days(i64::from(days))
}

/// Document timestamps are RFC 3339 strings or epoch milliseconds.
fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Documents without a readable timestamp are never treated as old.
fn is_older(doc: &Value, field: &str, cutoff: DateTime<Utc>) -> bool {
    doc.get(field)
        .and_then(timestamp)
        .is_some_and(|at| at < cutoff)
}

fn has_null(doc: &Value, field: Option<&str>) -> bool {
    match (field, doc) {
        (Some(field), _) => doc.get(field).map_or(true, Value::is_null),
        (None, Value::Object(map)) => map.values().any(Value::is_null),
        (None, other) => other.is_null(),
    }
}
