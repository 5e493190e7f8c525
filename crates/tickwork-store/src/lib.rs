//! `tickwork-store` — the durable tree store the scheduler runs against.
//!
//! # Overview
//!
//! The [`Store`] trait is a path-addressed JSON tree: plain reads and
//! writes, an atomic single-path [`Store::transaction`], and
//! [`Store::subscribe`] feeds scoped to the direct children of one path.
//! [`SqliteStore`] implements it on a single SQLite table and fans change
//! events out in-process.
//!
//! Paths are `/`-separated and carry no leading or trailing slash, e.g.
//! `tenants/acme/jobs/0190f3c2`.

pub mod db;
pub mod error;
pub mod path;
pub mod sqlite;
pub mod store;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
pub use store::{
    ChangeEvent, ChangeHub, ChangeKind, Notification, Store, Subscription, TxAction, TxOutcome,
};
