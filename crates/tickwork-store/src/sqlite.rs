use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::Result;
use crate::path;
use crate::store::{ChangeEvent, ChangeHub, ChangeKind, Store, Subscription, TxAction, TxOutcome};

/// [`Store`] backed by a single SQLite connection.
///
/// The connection lives behind a `Mutex`, which serialises every operation;
/// that is what makes [`Store::transaction`] atomic. Change events are
/// published after each committed write.
pub struct SqliteStore {
    db: Mutex<Connection>,
    changes: ChangeHub,
}

impl SqliteStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            changes: ChangeHub::default(),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn publish(&self, kind: ChangeKind, node_path: &str, value: Option<Value>) {
        self.changes.publish(ChangeEvent {
            kind,
            path: node_path.to_string(),
            parent: path::parent(node_path).to_string(),
            key: path::key(node_path).to_string(),
            value,
        });
    }
}

fn read_node(conn: &Connection, node_path: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM nodes WHERE path = ?1",
            [node_path],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn write_node(conn: &Connection, node_path: &str, value: &Value) -> Result<()> {
    conn.execute(
        "INSERT INTO nodes (path, parent, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(path) DO UPDATE SET value = excluded.value",
        rusqlite::params![node_path, path::parent(node_path), value.to_string()],
    )?;
    Ok(())
}

fn collect_rows(
    stmt: &mut rusqlite::Statement<'_>,
    params: impl rusqlite::Params,
) -> Result<Vec<(String, Value)>> {
    let rows = stmt
        .query_map(params, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(node_path, raw)| Ok((path::key(&node_path).to_string(), serde_json::from_str(&raw)?)))
        .collect()
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, node_path: &str) -> Result<Option<Value>> {
        path::validate(node_path)?;
        let db = self.db.lock().unwrap();
        read_node(&db, node_path)
    }

    #[instrument(skip(self, value), level = "trace")]
    async fn set(&self, node_path: &str, value: Value) -> Result<()> {
        path::validate(node_path)?;
        let db = self.db.lock().unwrap();
        let existed = read_node(&db, node_path)?.is_some();
        write_node(&db, node_path, &value)?;
        let kind = if existed {
            ChangeKind::Changed
        } else {
            ChangeKind::Added
        };
        self.publish(kind, node_path, Some(value));
        Ok(())
    }

    async fn update(&self, node_path: &str, fields: Map<String, Value>) -> Result<()> {
        path::validate(node_path)?;
        let db = self.db.lock().unwrap();
        let current = read_node(&db, node_path)?;
        let kind = if current.is_some() {
            ChangeKind::Changed
        } else {
            ChangeKind::Added
        };
        let merged = match current {
            Some(Value::Object(mut obj)) => {
                obj.extend(fields);
                Value::Object(obj)
            }
            _ => Value::Object(fields),
        };
        write_node(&db, node_path, &merged)?;
        self.publish(kind, node_path, Some(merged));
        Ok(())
    }

    async fn remove(&self, node_path: &str) -> Result<()> {
        path::validate(node_path)?;
        let db = self.db.lock().unwrap();
        let pattern = path::like_prefix(node_path);
        let removed: Vec<String> = {
            let mut stmt = db.prepare_cached(
                "SELECT path FROM nodes WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\'
                 ORDER BY path DESC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![node_path, pattern], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            rows
        };
        if removed.is_empty() {
            return Ok(());
        }
        db.execute(
            "DELETE FROM nodes WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\'",
            rusqlite::params![node_path, pattern],
        )?;
        debug!(path = node_path, count = removed.len(), "subtree removed");
        // Deepest first, so a parent's removal is the last event of the batch.
        for removed_path in removed {
            self.publish(ChangeKind::Removed, &removed_path, None);
        }
        Ok(())
    }

    async fn children(&self, node_path: &str) -> Result<Vec<(String, Value)>> {
        path::validate(node_path)?;
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare_cached("SELECT path, value FROM nodes WHERE parent = ?1 ORDER BY path")?;
        collect_rows(&mut stmt, [node_path])
    }

    async fn query_children(
        &self,
        node_path: &str,
        field: &str,
        equals: &Value,
        limit: usize,
    ) -> Result<Vec<(String, Value)>> {
        path::validate(node_path)?;
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(
            "SELECT path, value FROM nodes
             WHERE parent = ?1 AND json_extract(value, ?2) = json_extract(?3, '$')
             ORDER BY path LIMIT ?4",
        )?;
        collect_rows(
            &mut stmt,
            rusqlite::params![
                node_path,
                format!("$.{field}"),
                equals.to_string(),
                limit as i64
            ],
        )
    }

    async fn transaction(
        &self,
        node_path: &str,
        update: &mut (dyn for<'a> FnMut(Option<&'a Value>) -> TxAction + Send),
    ) -> Result<TxOutcome> {
        path::validate(node_path)?;
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let current = read_node(&tx, node_path)?;
        match update(current.as_ref()) {
            TxAction::Commit(next) => {
                write_node(&tx, node_path, &next)?;
                tx.commit()?;
                let kind = if current.is_some() {
                    ChangeKind::Changed
                } else {
                    ChangeKind::Added
                };
                self.publish(kind, node_path, Some(next.clone()));
                Ok(TxOutcome {
                    committed: true,
                    value: Some(next),
                })
            }
            TxAction::Abort => Ok(TxOutcome {
                committed: false,
                value: current,
            }),
        }
    }

    fn subscribe(&self, node_path: &str) -> Subscription {
        self.changes.subscribe(node_path)
    }

    fn open_subscriptions(&self, node_path: &str) -> usize {
        self.changes.open(node_path)
    }
}
