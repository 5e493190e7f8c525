use rusqlite::{Connection, Result};

/// Initialise the node table. Safe to call on every startup (idempotent).
///
/// Every path in the tree is one row; `parent` is the path with its last
/// segment removed (empty for top-level keys) so child listings and the
/// per-parent change fan-out are both a single indexed lookup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS nodes (
            path    TEXT NOT NULL PRIMARY KEY,
            parent  TEXT NOT NULL,
            value   TEXT NOT NULL   -- JSON document
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes (parent, path);
        ",
    )
}
