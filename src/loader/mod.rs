//! Ingestion of B3 trade archives
//!
//! `Loader::load` runs one file pipeline per archive of a directory on a
//! bounded pool of workers and reports the first failure in listing order.
//! No new file is started after a failure, and nothing already flushed is
//! rolled back.

pub mod batcher;
pub mod error;
pub mod flusher;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod reader;

use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::db_utils::trade_db::TradeDb;

pub use batcher::{Batch, Batcher};
pub use error::{ErrorKind, LoadError, ParseError, TradeField};
pub use flusher::Flusher;
pub use parser::{TradeParser, DEFAULT_TIMEZONE};
pub use pipeline::{process_file, FileReport};
pub use progress::{ProgressCounter, ProgressDisplay};
pub use reader::{ArchiveReader, RowStream, DEFAULT_PAYLOAD_EXTENSION};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_CONCURRENT_FILES: usize = 4;
pub const DEFAULT_MAX_IN_FLIGHT_BATCHES: usize = 8;

/// Tuning of one load run
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Maximum trades per batch
    pub batch_size: usize,
    /// Archives processed at the same time
    pub concurrent_files: usize,
    /// Batch submissions running at the same time, across all files
    pub max_in_flight_batches: usize,
    pub payload_extension: String,
    /// Timezone of the entry-time field
    pub timezone: Tz,
    /// Upper bound on a single batch submission
    pub flush_timeout: Option<Duration>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrent_files: DEFAULT_CONCURRENT_FILES,
            max_in_flight_batches: DEFAULT_MAX_IN_FLIGHT_BATCHES,
            payload_extension: DEFAULT_PAYLOAD_EXTENSION.to_string(),
            timezone: DEFAULT_TIMEZONE,
            flush_timeout: None,
        }
    }
}

/// Totals of a successful run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSummary {
    pub files: usize,
    /// Archives without a payload member
    pub skipped: usize,
    pub rows: u64,
    pub batches: usize,
}

impl LoadSummary {
    fn add(&mut self, report: &FileReport) {
        self.files += 1;
        if report.payload.is_none() {
            self.skipped += 1;
        }
        self.rows += report.rows;
        self.batches += report.batches;
    }
}

pub struct Loader {
    db: Arc<dyn TradeDb>,
    options: LoadOptions,
    progress: ProgressCounter,
}

impl Loader {
    pub fn new(db: Arc<dyn TradeDb>, options: LoadOptions) -> Self {
        Self {
            db,
            options,
            progress: ProgressCounter::new(),
        }
    }

    /// Report flushed records to `progress` instead of a private counter
    pub fn with_progress(mut self, progress: ProgressCounter) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &ProgressCounter {
        &self.progress
    }

    /// Load every archive found in `directory`
    ///
    /// Once a file fails no further file is started; files already running
    /// are drained. The error returned is the one of the failing file that
    /// sorts first by name.
    pub async fn load(&self, directory: &Path) -> Result<LoadSummary, LoadError> {
        let start = Instant::now();
        let files = list_archives(directory).await?;
        info!(
            "Found {} files in {:?} (batch size {}, {} concurrent files)",
            files.len(),
            directory,
            self.options.batch_size,
            self.options.concurrent_files
        );

        let workers = Arc::new(Semaphore::new(self.options.concurrent_files.max(1)));
        let permits = Arc::new(Semaphore::new(self.options.max_in_flight_batches.max(1)));
        let options = Arc::new(self.options.clone());
        let failed = Arc::new(AtomicBool::new(false));
        let total = files.len();
        let mut handles = Vec::with_capacity(total);

        for path in files {
            if failed.load(Ordering::SeqCst) {
                break;
            }
            let worker = Arc::clone(&workers)
                .acquire_owned()
                .await
                .map_err(|e| LoadError::Worker {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            // A file may have failed while this one waited for a worker
            if failed.load(Ordering::SeqCst) {
                break;
            }

            let db = Arc::clone(&self.db);
            let permits = Arc::clone(&permits);
            let progress = self.progress.clone();
            let options = Arc::clone(&options);
            let failed = Arc::clone(&failed);
            let file = path.clone();

            let handle = tokio::spawn(async move {
                let _worker = worker;
                let result = process_file(&file, &options, db, permits, progress).await;
                if result.is_err() {
                    failed.store(true, Ordering::SeqCst);
                }
                result
            });
            handles.push((path, handle));
        }

        if handles.len() < total {
            warn!(
                "Not starting {} remaining files after a failure",
                total - handles.len()
            );
        }

        let mut summary = LoadSummary::default();
        let mut first_error = None;

        for (path, handle) in handles {
            match handle.await {
                Ok(Ok(report)) => summary.add(&report),
                Ok(Err(e)) => {
                    error!("Failed to load {:?}: {}", path, e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!("Worker for {:?} panicked: {}", path, e);
                    first_error.get_or_insert(LoadError::Worker {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            "Loaded {} rows from {} files ({} skipped) in {:.2}s",
            summary.rows,
            summary.files,
            summary.skipped,
            start.elapsed().as_secs_f64()
        );
        Ok(summary)
    }
}

/// Regular files of `directory`, sorted by name
async fn list_archives(directory: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let list_error = |source| LoadError::ListDir {
        path: directory.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(directory).await.map_err(list_error)?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(list_error)? {
        let path = entry.path();
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => files.push(path),
            Ok(_) => warn!("Skipping {:?}: not a file", path),
            Err(e) => warn!("Skipping {:?}: {}", path, e),
        }
    }

    files.sort();
    Ok(files)
}
