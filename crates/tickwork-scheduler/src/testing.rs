//! Store doubles for unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tickwork_store::{Result, SqliteStore, Store, StoreError, Subscription, TxAction, TxOutcome};

/// In-memory store whose writes fail for any path containing one of the
/// given fragments. Reads and subscriptions always work.
pub struct FailingWrites {
    inner: SqliteStore,
    failing: Vec<String>,
}

impl FailingWrites {
    pub fn new(fragments: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            failing: fragments.iter().map(|f| f.to_string()).collect(),
        })
    }

    fn check(&self, path: &str) -> Result<()> {
        if self.failing.iter().any(|f| path.contains(f.as_str())) {
            Err(StoreError::InvalidPath(format!("write refused: {path}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FailingWrites {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.check(path)?;
        self.inner.set(path, value).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        self.check(path)?;
        self.inner.update(path, fields).await
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.check(path)?;
        self.inner.remove(path).await
    }

    async fn children(&self, path: &str) -> Result<Vec<(String, Value)>> {
        self.inner.children(path).await
    }

    async fn query_children(
        &self,
        path: &str,
        field: &str,
        equals: &Value,
        limit: usize,
    ) -> Result<Vec<(String, Value)>> {
        self.inner.query_children(path, field, equals, limit).await
    }

    async fn transaction(
        &self,
        path: &str,
        update: &mut (dyn for<'a> FnMut(Option<&'a Value>) -> TxAction + Send),
    ) -> Result<TxOutcome> {
        self.check(path)?;
        self.inner.transaction(path, update).await
    }

    fn subscribe(&self, path: &str) -> Subscription {
        self.inner.subscribe(path)
    }

    fn open_subscriptions(&self, path: &str) -> usize {
        self.inner.open_subscriptions(path)
    }
}
