//! Periodic purge of old build results.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time;
use tracing::{error, info};

use stagekeeper_core::db::Database;

const MAX_RETENTION_DAYS: u64 = 36_500;

/// Deletes build results older than the retention window on a timer.
pub struct Purger {
    db: Arc<Database>,
    retention: chrono::Duration,
    interval: Duration,
}

impl Purger {
    /// Returns `None` when `retention_days` is 0, i.e. results are kept
    /// forever.
    pub fn new(db: Arc<Database>, retention_days: u64, interval: Duration) -> Option<Self> {
        if retention_days == 0 {
            return None;
        }
        // A century is as good as forever and keeps the cutoff representable.
        let retention = chrono::Duration::days(retention_days.min(MAX_RETENTION_DAYS) as i64);
        Some(Self {
            db,
            retention,
            interval,
        })
    }

    /// Purge once per interval until `shutdown` is notified.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        info!(
            retention_days = self.retention.num_days(),
            interval_secs = self.interval.as_secs(),
            "result purge started"
        );
        let mut interval = time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.purge_once();
                }
                _ = shutdown.notified() => break,
            }
        }
        info!("result purge stopped");
    }

    /// Returns the number of deleted results.
    pub fn purge_once(&self) -> usize {
        let until = Utc::now() - self.retention;
        match self.db.clean_results(until) {
            Ok(0) => 0,
            Ok(n) => {
                info!(deleted = n, until = %until.to_rfc3339(), "purged old build results");
                n
            }
            Err(e) => {
                error!(error = %e, "failed to purge build results");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagekeeper_core::models::{BuildAct, BuildResult};

    fn result(stage: &str, age_days: i64) -> BuildResult {
        let end = Utc::now() - chrono::Duration::days(age_days);
        BuildResult {
            start: end,
            end,
            act: BuildAct::Create,
            stdout: String::new(),
            stderr: String::new(),
            retval: 0,
            cmd: String::new(),
            stage: stage.into(),
            branch: stage.into(),
            sha1: "a1".into(),
        }
    }

    fn db() -> Arc<Database> {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        Arc::new(db)
    }

    #[test]
    fn test_zero_retention_disables_purge() {
        assert!(Purger::new(db(), 0, Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_purge_once() {
        let db = db();
        db.add_result(&result("old", 40)).unwrap();
        db.add_result(&result("fresh", 1)).unwrap();

        let purger = Purger::new(db.clone(), 30, Duration::from_secs(60)).unwrap();
        assert_eq!(purger.purge_once(), 1);
        assert!(db.get_results("old").unwrap().is_empty());
        assert_eq!(db.get_results("fresh").unwrap().len(), 1);
        assert_eq!(purger.purge_once(), 0);
    }

    #[tokio::test]
    async fn test_run_purges_on_each_tick() {
        let db = db();
        db.add_result(&result("old", 40)).unwrap();
        let purger = Purger::new(db.clone(), 30, Duration::from_millis(20)).unwrap();
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let task = tokio::spawn(async move { purger.run(signal).await });

        let mut purged = false;
        for _ in 0..100 {
            if db.get_results("old").unwrap().is_empty() {
                purged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(purged);

        // Results aged past the window while running are picked up too.
        db.add_result(&result("later", 31)).unwrap();
        let mut purged = false;
        for _ in 0..100 {
            if db.get_results("later").unwrap().is_empty() {
                purged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(purged);

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let purger = Purger::new(db(), 30, Duration::from_secs(3600)).unwrap();
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let task = tokio::spawn(async move { purger.run(signal).await });
        tokio::task::yield_now().await;
        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
