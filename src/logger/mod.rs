//! Append-only decision log, one JSONL file per trader.
//!
//! Each record is one whole line written under a lock, so concurrent readers
//! see complete records or nothing. Retention is age-based: pruning rewrites
//! the file keeping survivors in their original order.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::domain::CycleRecord;
use crate::error::Result;

pub struct DecisionLogger {
    trader_id: String,
    path: PathBuf,
    /// Serializes file writes; whole lines only.
    write_lock: Mutex<()>,
    /// In-memory mirror for reads.
    records: RwLock<Vec<CycleRecord>>,
}

impl DecisionLogger {
    /// Open (or create) the log for a trader under `dir`, loading history.
    pub async fn open(dir: impl AsRef<Path>, trader_id: impl Into<String>) -> Result<Self> {
        let trader_id = trader_id.into();
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{trader_id}.jsonl"));

        let records = Self::load(&path).await?;
        if !records.is_empty() {
            info!(trader_id, count = records.len(), "loaded decision history");
        }

        Ok(Self {
            trader_id,
            path,
            write_lock: Mutex::new(()),
            records: RwLock::new(records),
        })
    }

    async fn load(path: &Path) -> Result<Vec<CycleRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let mut records = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<CycleRecord>(line) {
                Ok(r) => records.push(r),
                // A torn tail line (crash mid-write) is dropped, not fatal.
                Err(e) => warn!(line = i + 1, error = %e, "skipping malformed record"),
            }
        }
        Ok(records)
    }

    pub fn trader_id(&self) -> &str {
        &self.trader_id
    }

    /// Append one record durably.
    pub async fn record(&self, record: CycleRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;

        {
            let _guard = self.write_lock.lock().await;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await?;
        }

        self.records.write().await.push(record);
        Ok(())
    }

    /// The latest `n` records, newest first.
    pub async fn latest_n(&self, n: usize) -> Vec<CycleRecord> {
        let records = self.records.read().await;
        records.iter().rev().take(n).cloned().collect()
    }

    /// All records in append order.
    pub async fn all(&self) -> Vec<CycleRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Remove records strictly older than the retention cutoff.
    ///
    /// Returns the number of records removed. The file is rewritten with the
    /// surviving records in their original order.
    pub async fn clean_old_records(&self, retention_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days);

        // Hold the write lock across snapshot and rewrite so a concurrent
        // append cannot slip between them and be lost.
        let _guard = self.write_lock.lock().await;

        let (survivors, removed) = {
            let records = self.records.read().await;
            let survivors: Vec<CycleRecord> = records
                .iter()
                .filter(|r| r.timestamp >= cutoff)
                .cloned()
                .collect();
            let removed = records.len() - survivors.len();
            (survivors, removed)
        };
        if removed == 0 {
            return Ok(0);
        }

        let mut content = String::new();
        for record in &survivors {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }

        // Write-then-rename keeps readers off torn files.
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        *self.records.write().await = survivors;

        debug!(trader_id = %self.trader_id, removed, "pruned decision log");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record_at(cycle: u64, age_days: i64) -> CycleRecord {
        let mut r = CycleRecord::skipped("t1", cycle, "test");
        r.timestamp = Utc::now() - Duration::days(age_days);
        r
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let logger = DecisionLogger::open(dir.path(), "t1").await.unwrap();
            logger.record(record_at(1, 0)).await.unwrap();
            logger.record(record_at(2, 0)).await.unwrap();
        }

        let logger = DecisionLogger::open(dir.path(), "t1").await.unwrap();
        assert_eq!(logger.len().await, 2);
        let latest = logger.latest_n(1).await;
        assert_eq!(latest[0].cycle_number, 2);
    }

    #[tokio::test]
    async fn latest_n_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let logger = DecisionLogger::open(dir.path(), "t1").await.unwrap();
        for i in 1..=5 {
            logger.record(record_at(i, 0)).await.unwrap();
        }

        let latest = logger.latest_n(3).await;
        let cycles: Vec<u64> = latest.iter().map(|r| r.cycle_number).collect();
        assert_eq!(cycles, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn retention_drops_only_records_older_than_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let logger = DecisionLogger::open(dir.path(), "t1").await.unwrap();
        logger.record(record_at(1, 10)).await.unwrap();
        logger.record(record_at(2, 5)).await.unwrap();
        logger.record(record_at(3, 0)).await.unwrap();

        let removed = logger.clean_old_records(7).await.unwrap();
        assert_eq!(removed, 1);

        let remaining = logger.all().await;
        let cycles: Vec<u64> = remaining.iter().map(|r| r.cycle_number).collect();
        assert_eq!(cycles, vec![2, 3]);

        // No-op when nothing is old enough
        assert_eq!(logger.clean_old_records(7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn torn_tail_line_is_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        {
            let logger = DecisionLogger::open(dir.path(), "t1").await.unwrap();
            logger.record(record_at(1, 0)).await.unwrap();
        }
        // Simulate a crash mid-append
        let path = dir.path().join("t1.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"cycle_number\": 2, \"trader");
        std::fs::write(&path, content).unwrap();

        let logger = DecisionLogger::open(dir.path(), "t1").await.unwrap();
        assert_eq!(logger.len().await, 1);
    }
}
