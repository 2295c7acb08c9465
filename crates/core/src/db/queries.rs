//! Typed queries over the `build_results` table.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Row};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{BuildAct, BuildResult};

/// Fixed-width timestamps so that SQL string comparison orders them.
fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(field: &str, value: String) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| DatabaseError::Corrupt {
            field: field.into(),
            value,
        })
}

struct RawResult {
    started_at: String,
    ended_at: String,
    act: String,
    stdout: String,
    stderr: String,
    retval: i32,
    cmd: String,
    stage: String,
    branch: String,
    sha1: String,
}

impl RawResult {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            started_at: row.get(0)?,
            ended_at: row.get(1)?,
            act: row.get(2)?,
            stdout: row.get(3)?,
            stderr: row.get(4)?,
            retval: row.get(5)?,
            cmd: row.get(6)?,
            stage: row.get(7)?,
            branch: row.get(8)?,
            sha1: row.get(9)?,
        })
    }

    fn decode(self) -> Result<BuildResult, DatabaseError> {
        let act = BuildAct::from_str_val(&self.act).ok_or_else(|| DatabaseError::Corrupt {
            field: "act".into(),
            value: self.act.clone(),
        })?;
        Ok(BuildResult {
            start: parse_timestamp("started_at", self.started_at)?,
            end: parse_timestamp("ended_at", self.ended_at)?,
            act,
            stdout: self.stdout,
            stderr: self.stderr,
            retval: self.retval,
            cmd: self.cmd,
            stage: self.stage,
            branch: self.branch,
            sha1: self.sha1,
        })
    }
}

impl Database {
    /// Append one build result.
    pub fn add_result(&self, result: &BuildResult) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO build_results
                (started_at, ended_at, act, stdout, stderr, retval, cmd, stage, branch, sha1)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                timestamp(&result.start),
                timestamp(&result.end),
                result.act.to_string(),
                result.stdout,
                result.stderr,
                result.retval,
                result.cmd,
                result.stage,
                result.branch,
                result.sha1,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, stage = %result.stage, act = %result.act, "stored build result");
        Ok(id)
    }

    /// All results recorded for `stage`, oldest first.
    pub fn get_results(&self, stage: &str) -> Result<Vec<BuildResult>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT started_at, ended_at, act, stdout, stderr, retval, cmd, stage, branch, sha1
             FROM build_results WHERE stage = ?1 ORDER BY id ASC",
        )?;
        let raw = stmt
            .query_map(params![stage], RawResult::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawResult::decode).collect()
    }

    /// Forget every result of `stage`. Returns the number of rows removed.
    pub fn delete_results(&self, stage: &str) -> Result<usize, DatabaseError> {
        let removed = self
            .conn()
            .execute("DELETE FROM build_results WHERE stage = ?1", params![stage])?;
        debug!(stage, removed, "deleted build results");
        Ok(removed)
    }

    /// Purge results that finished before `until`.
    pub fn clean_results(&self, until: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let removed = self.conn().execute(
            "DELETE FROM build_results WHERE ended_at < ?1",
            params![timestamp(&until)],
        )?;
        debug!(until = %until, removed, "purged old build results");
        Ok(removed)
    }
}
