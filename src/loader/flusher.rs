//! Sink flusher
//!
//! Every full batch is submitted on its own task so the read loop can keep
//! parsing while the sink works. The number of submissions running at once is
//! bounded by a semaphore shared by every file of a run.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::batcher::Batch;
use super::error::LoadError;
use super::progress::ProgressCounter;
use crate::db_utils::trade_db::{DbError, TradeDb};

pub struct Flusher {
    path: PathBuf,
    db: Arc<dyn TradeDb>,
    permits: Arc<Semaphore>,
    progress: ProgressCounter,
    timeout: Option<Duration>,
    failed: Arc<AtomicBool>,
    handles: Vec<(usize, JoinHandle<Result<(), DbError>>)>,
}

impl Flusher {
    pub fn new(
        path: &Path,
        db: Arc<dyn TradeDb>,
        permits: Arc<Semaphore>,
        progress: ProgressCounter,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            db,
            permits,
            progress,
            timeout,
            failed: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    /// Submit `batch` on a background task
    ///
    /// Waits only for a free submission slot, not for the sink. A batch whose
    /// slot frees up after an earlier batch failed is dropped unsent.
    pub async fn dispatch(&mut self, batch: Batch) -> Result<(), LoadError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| LoadError::Worker {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if self.has_failed() {
            debug!("Dropping batch {} of {:?} after a failed flush", batch.index, self.path);
            return Ok(());
        }

        let index = batch.index;
        let records = batch.len() as u64;
        debug!("Dispatching batch {} of {:?} ({} records)", index, self.path, records);

        let db = Arc::clone(&self.db);
        let progress = self.progress.clone();
        let failed = Arc::clone(&self.failed);
        let timeout = self.timeout;
        let path = self.path.clone();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            let insert = db.insert_many(batch.trades);
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, insert)
                    .await
                    .unwrap_or(Err(DbError::Timeout)),
                None => insert.await,
            };

            match &result {
                Ok(()) => progress.add(records),
                Err(e) => {
                    failed.store(true, Ordering::SeqCst);
                    error!("Batch {} of {:?} failed: {}", index, path, e);
                }
            }
            result
        });

        self.handles.push((index, handle));
        Ok(())
    }

    /// True once any dispatched submission has failed
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Wait for every dispatched submission
    ///
    /// Returns the number of batches flushed, or the failure of the lowest
    /// batch index.
    pub async fn drain(self) -> Result<usize, LoadError> {
        let mut first_error = None;
        let total = self.handles.len();

        for (index, handle) in self.handles {
            let outcome = match handle.await {
                Ok(Ok(())) => continue,
                Ok(Err(source)) => LoadError::Sink {
                    path: self.path.clone(),
                    batch: index,
                    source,
                },
                Err(e) => LoadError::Worker {
                    path: self.path.clone(),
                    reason: e.to_string(),
                },
            };
            first_error.get_or_insert(outcome);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::recording_trade_db::RecordingTradeDb;
    use crate::trade::Trade;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn batch(index: usize, ticker: &str, size: usize) -> Batch {
        let trades = (0..size)
            .map(|n| Trade {
                ticker: ticker.to_string(),
                gross_amount: 1.0,
                quantity: n as i64,
                entry_time: Utc.with_ymd_and_hms(1970, 1, 1, 12, 0, 0).unwrap(),
                trade_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            })
            .collect();
        Batch { index, trades }
    }

    fn flusher(db: Arc<RecordingTradeDb>, permits: usize, progress: &ProgressCounter) -> Flusher {
        Flusher::new(
            Path::new("session.zip"),
            db,
            Arc::new(Semaphore::new(permits)),
            progress.clone(),
            None,
        )
    }

    #[tokio::test]
    async fn test_in_flight_submissions_are_bounded() {
        let db = Arc::new(RecordingTradeDb::new().with_delay(Duration::from_millis(20)));
        let progress = ProgressCounter::new();
        let mut flusher = flusher(Arc::clone(&db), 2, &progress);

        for index in 0..6 {
            flusher.dispatch(batch(index, "PETR4", 3)).await.unwrap();
        }
        assert_eq!(flusher.drain().await.unwrap(), 6);

        assert!(db.max_in_flight() <= 2);
        assert_eq!(db.record_count(), 18);
        assert_eq!(progress.get(), 18);
    }

    #[tokio::test]
    async fn test_drain_reports_lowest_failing_batch() {
        let db = Arc::new(RecordingTradeDb::new().rejecting("BAD"));
        let progress = ProgressCounter::new();
        let mut flusher = flusher(Arc::clone(&db), 4, &progress);

        flusher.dispatch(batch(0, "PETR4", 2)).await.unwrap();
        flusher.dispatch(batch(1, "BAD", 2)).await.unwrap();
        flusher.dispatch(batch(2, "VALE3", 2)).await.unwrap();
        flusher.dispatch(batch(3, "BAD", 2)).await.unwrap();

        let err = flusher.drain().await.unwrap_err();
        assert!(matches!(
            err,
            LoadError::Sink { batch: 1, source: DbError::Rejected(_), .. }
        ));
        // Successful batches still count; failed ones never do
        assert_eq!(progress.get(), 4);
        assert_eq!(db.record_count(), 4);
    }

    #[tokio::test]
    async fn test_batches_after_a_failure_are_not_sent() {
        let db = Arc::new(RecordingTradeDb::new().rejecting("BAD"));
        let progress = ProgressCounter::new();
        let mut flusher = flusher(Arc::clone(&db), 1, &progress);
        assert!(!flusher.has_failed());

        flusher.dispatch(batch(0, "BAD", 1)).await.unwrap();
        // The single slot frees up only once batch 0 has failed
        flusher.dispatch(batch(1, "PETR4", 1)).await.unwrap();
        assert!(flusher.has_failed());

        let err = flusher.drain().await.unwrap_err();
        assert!(matches!(err, LoadError::Sink { batch: 0, .. }));
        assert_eq!(db.submissions(), 1);
        assert_eq!(db.record_count(), 0);
    }

    #[tokio::test]
    async fn test_submission_timeout() {
        let db = Arc::new(RecordingTradeDb::new().with_delay(Duration::from_millis(500)));
        let progress = ProgressCounter::new();
        let mut flusher = Flusher::new(
            Path::new("slow.zip"),
            db,
            Arc::new(Semaphore::new(1)),
            progress.clone(),
            Some(Duration::from_millis(10)),
        );

        flusher.dispatch(batch(0, "PETR4", 1)).await.unwrap();
        let err = flusher.drain().await.unwrap_err();
        assert!(matches!(err, LoadError::Sink { source: DbError::Timeout, .. }));
        assert_eq!(progress.get(), 0);
    }
}
