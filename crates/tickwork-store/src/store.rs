use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::error::Result;

/// What happened to a child node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// A single node change, delivered to subscribers of the node's parent.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Full path of the changed node.
    pub path: String,
    /// Path of the parent the subscription is scoped to.
    pub parent: String,
    /// Last path segment.
    pub key: String,
    /// New value; `None` for removals.
    pub value: Option<Value>,
}

/// Result of a transaction callback.
#[derive(Debug, Clone)]
pub enum TxAction {
    /// Write this value atomically.
    Commit(Value),
    /// Leave the node untouched.
    Abort,
}

#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub committed: bool,
    /// The value written on commit, or the unchanged current value on abort.
    pub value: Option<Value>,
}

/// Item yielded by a [`Subscription`].
#[derive(Debug, Clone)]
pub enum Notification {
    Change(ChangeEvent),
    /// The subscriber fell behind and `n` events were dropped.
    /// Consumers must resynchronise from a full read.
    Lagged(u64),
}

/// Path-addressed JSON tree with atomic single-path updates and
/// subtree-scoped change notifications.
///
/// Implementations must be `Send + Sync`; a single instance is shared by
/// every tenant's watcher, executor and queue worker.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the value stored exactly at `path`.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Replace the value at `path`.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Shallow-merge `fields` into the object at `path` (creating it if absent).
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()>;

    /// Remove `path` and every node below it. Missing paths are a no-op.
    async fn remove(&self, path: &str) -> Result<()>;

    /// Direct children of `path` as `(key, value)`, ordered by key.
    async fn children(&self, path: &str) -> Result<Vec<(String, Value)>>;

    /// Direct children whose top-level `field` equals `equals`, ordered by key.
    async fn query_children(
        &self,
        path: &str,
        field: &str,
        equals: &Value,
        limit: usize,
    ) -> Result<Vec<(String, Value)>>;

    /// Atomic read-modify-write of a single path.
    ///
    /// `update` sees the current value (or `None`) and decides whether to
    /// commit. No other write to `path` can interleave between the read and
    /// the write.
    async fn transaction(
        &self,
        path: &str,
        update: &mut (dyn for<'a> FnMut(Option<&'a Value>) -> TxAction + Send),
    ) -> Result<TxOutcome>;

    /// Subscribe to changes of the direct children of `path`.
    fn subscribe(&self, path: &str) -> Subscription;

    /// Number of subscriptions currently open on `path`.
    fn open_subscriptions(&self, path: &str) -> usize;
}

/// Events buffered per subscriber before it is reported as lagged.
pub const CHANGE_BUFFER: usize = 1024;

#[derive(Debug)]
struct Feed {
    sender: broadcast::Sender<ChangeEvent>,
    subscribers: usize,
}

/// One broadcast channel per subscribed path.
///
/// An event is only sent on its parent's channel, so a subscriber never
/// sees (or lags behind) writes elsewhere in the tree. A path's channel
/// exists while at least one [`Subscription`] on it is open.
#[derive(Debug, Clone, Default)]
pub struct ChangeHub {
    feeds: Arc<DashMap<String, Feed>>,
}

impl ChangeHub {
    pub fn subscribe(&self, path: &str) -> Subscription {
        let rx = {
            let mut feed = self.feeds.entry(path.to_string()).or_insert_with(|| Feed {
                sender: broadcast::channel(CHANGE_BUFFER).0,
                subscribers: 0,
            });
            feed.subscribers += 1;
            feed.sender.subscribe()
        };
        Subscription {
            path: path.to_string(),
            rx,
            hub: self.clone(),
        }
    }

    /// Deliver `event` to subscribers of `event.parent`, if there are any.
    pub fn publish(&self, event: ChangeEvent) {
        if let Some(feed) = self.feeds.get(&event.parent) {
            // All receivers may have lagged out; that is reported on their side.
            let _ = feed.sender.send(event);
        }
    }

    /// Number of subscriptions currently open on `path`.
    pub fn open(&self, path: &str) -> usize {
        self.feeds.get(path).map(|f| f.subscribers).unwrap_or(0)
    }

    fn release(&self, path: &str) {
        self.feeds.remove_if_mut(path, |_, feed| {
            feed.subscribers = feed.subscribers.saturating_sub(1);
            feed.subscribers == 0
        });
    }
}

/// Live change feed for the children of one path.
///
/// Dropping the subscription closes it.
pub struct Subscription {
    path: String,
    rx: broadcast::Receiver<ChangeEvent>,
    hub: ChangeHub,
}

impl Subscription {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next change under this path. `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<Notification> {
        match self.rx.recv().await {
            Ok(event) => Some(Notification::Change(event)),
            Err(RecvError::Lagged(n)) => Some(Notification::Lagged(n)),
            Err(RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant of [`next`](Self::next), used to coalesce bursts.
    pub fn try_next(&mut self) -> Option<Notification> {
        match self.rx.try_recv() {
            Ok(event) => Some(Notification::Change(event)),
            Err(TryRecvError::Lagged(n)) => Some(Notification::Lagged(n)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.release(&self.path);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("path", &self.path).finish()
    }
}
