//! Database schema definitions and migration runner.
//!
//! The SQLite `user_version` pragma tracks which migrations have already been
//! applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order: `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[(
    1,
    "build results",
    r#"
    CREATE TABLE IF NOT EXISTS build_results (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at  TEXT    NOT NULL,
        ended_at    TEXT    NOT NULL,
        act         TEXT    NOT NULL CHECK (act IN ('create', 'update', 'change', 'destroy')),
        stdout      TEXT    NOT NULL DEFAULT '',
        stderr      TEXT    NOT NULL DEFAULT '',
        retval      INTEGER NOT NULL,
        cmd         TEXT    NOT NULL DEFAULT '',
        stage       TEXT    NOT NULL,
        branch      TEXT    NOT NULL,
        sha1        TEXT    NOT NULL DEFAULT ''
    );

    CREATE INDEX IF NOT EXISTS idx_build_results_stage ON build_results (stage);
    CREATE INDEX IF NOT EXISTS idx_build_results_ended_at ON build_results (ended_at);
    "#,
)];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            conn.pragma_update(None, "user_version", version)?;
            debug!(version, "migration applied");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}
