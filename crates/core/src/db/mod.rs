//! Build result store.
//!
//! Every action a build executor runs leaves one row behind. The daemon opens
//! one store under its data directory and shares it between the build run
//! loops, the purge task and the web API.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// File name of the store inside the data directory.
pub const DB_FILE: &str = "stagekeeper.db";

/// Shared handle to the result store.
///
/// Writers are the build run loops, one per live stage; a single locked
/// connection keeps their inserts serialized.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the store file at `path`, creating it if needed.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening result store");

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;

        debug!("result store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open [`DB_FILE`] inside `data_dir` and bring its schema up to date.
    pub fn open_in(data_dir: &Path) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir)?;
        let db = Self::new(data_dir.join(DB_FILE))?;
        db.initialize()?;
        Ok(db)
    }

    /// A store that lives only as long as the handle.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Apply pending migrations. Safe to call on an up-to-date store.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        schema::run_migrations(&self.conn())
    }

    /// The connection, even if a run loop panicked while holding it.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("result store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
