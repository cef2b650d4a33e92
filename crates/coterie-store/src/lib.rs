//! Embedded relational store for turns, summaries, tasks, agent state, cost
//! records, audit records, and team insights. Opened in write-ahead logging
//! mode; every public operation runs inside a transaction that commits or
//! rolls back as a unit.
//!
//! Each process (the supervisor, every worker, the CEO's in-process
//! delegation path) opens its own `Store` against the same database file.
//! WAL's single-writer/multiple-reader model plus a busy timeout on every
//! connection is relied on rather than funnelling all writes through one
//! process — see the "multi-writer store access" decision in DESIGN.md.

mod agents;
mod audit;
mod costs;
mod error;
mod insights;
mod retrieval;
mod schema;
mod summaries;
mod tasks;
mod turns;
pub mod types;

pub use retrieval::TurnHit;
pub use turns::make_session_id;

pub use error::{StoreError, StoreResult};
pub use types::*;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::Mutex;

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        schema::init_schema(&conn)?;
        schema::validate_integrity(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// An in-memory store for tests and ephemeral callers; schema is
    /// identical, nothing is persisted to disk.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}
