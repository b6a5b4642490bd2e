//! File pipeline
//!
//! One archive is driven end to end: a blocking reader task parses rows and
//! hands full batches over a small channel, while the async side dispatches
//! them to the flusher. The file is only done once every dispatched batch has
//! returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use super::batcher::{Batch, Batcher};
use super::error::LoadError;
use super::flusher::Flusher;
use super::parser::TradeParser;
use super::progress::ProgressCounter;
use super::reader::ArchiveReader;
use super::LoadOptions;
use crate::db_utils::trade_db::TradeDb;

/// Outcome of one successfully loaded archive
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub path: PathBuf,
    /// Data rows parsed (header excluded)
    pub rows: u64,
    /// Batches flushed to the sink
    pub batches: usize,
    /// Payload member read, `None` when the archive had none and was skipped
    pub payload: Option<String>,
}

struct ReadSummary {
    rows: u64,
    payload: Option<String>,
    remainder: Option<Batch>,
    aborted: bool,
}

/// Load one archive into `db`
pub async fn process_file(
    path: &Path,
    options: &LoadOptions,
    db: Arc<dyn TradeDb>,
    permits: Arc<Semaphore>,
    progress: ProgressCounter,
) -> Result<FileReport, LoadError> {
    let start = Instant::now();
    info!("Loading {:?}", path);

    let (sender, mut receiver) = mpsc::channel::<Batch>(1);
    let reader = {
        let path = path.to_path_buf();
        let extension = options.payload_extension.clone();
        let parser = TradeParser::new(options.timezone);
        let batch_size = options.batch_size;
        tokio::task::spawn_blocking(move || {
            read_archive(&path, &extension, parser, batch_size, sender)
        })
    };

    let mut flusher = Flusher::new(path, db, permits, progress, options.flush_timeout);
    let mut dispatch_error = None;

    while let Some(batch) = receiver.recv().await {
        if flusher.has_failed() {
            break;
        }
        if let Err(e) = flusher.dispatch(batch).await {
            dispatch_error = Some(e);
            break;
        }
    }
    // Closing the channel stops the reader if the loop ended early
    drop(receiver);

    let mut read = match reader.await {
        Ok(read) => read,
        Err(e) => Err(LoadError::Worker {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    };

    let remainder = read.as_mut().ok().and_then(|read| read.remainder.take());
    if let Some(batch) = remainder {
        if dispatch_error.is_none() && !flusher.has_failed() {
            if let Err(e) = flusher.dispatch(batch).await {
                dispatch_error = Some(e);
            }
        }
    }

    let drained = flusher.drain().await;

    let read = read?;
    if let Some(e) = dispatch_error {
        return Err(e);
    }
    let batches = drained?;
    if read.aborted {
        return Err(LoadError::Worker {
            path: path.to_path_buf(),
            reason: "reader stopped before the end of the payload".to_string(),
        });
    }

    info!(
        "Finished {:?}: {} rows in {} batches ({:.2}s)",
        path,
        read.rows,
        batches,
        start.elapsed().as_secs_f64()
    );

    Ok(FileReport {
        path: path.to_path_buf(),
        rows: read.rows,
        batches,
        payload: read.payload,
    })
}

fn read_archive(
    path: &Path,
    payload_extension: &str,
    parser: TradeParser,
    batch_size: usize,
    sender: mpsc::Sender<Batch>,
) -> Result<ReadSummary, LoadError> {
    let mut reader = ArchiveReader::open(path, payload_extension)?;

    // Archives without a payload member are skipped, not failed
    let Some(member) = reader.payload().map(str::to_string) else {
        warn!(
            "No .{} payload in {:?}, skipping",
            payload_extension, path
        );
        return Ok(ReadSummary {
            rows: 0,
            payload: None,
            remainder: None,
            aborted: false,
        });
    };

    let mut rows = reader.rows()?;
    match rows.next() {
        Some(header) => {
            header?;
        }
        None => {
            return Err(LoadError::MissingHeader {
                path: path.to_path_buf(),
                member,
            })
        }
    }

    let mut batcher = Batcher::new(batch_size);
    let mut count = 0u64;

    for row in rows {
        let row = row?;
        let trade = parser.parse(&row).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            line: row.position().map(|p| p.line()).unwrap_or_default(),
            source,
        })?;
        count += 1;

        if batcher.push(trade) && sender.blocking_send(batcher.take()).is_err() {
            return Ok(ReadSummary {
                rows: count,
                payload: Some(member),
                remainder: None,
                aborted: true,
            });
        }
    }

    Ok(ReadSummary {
        rows: count,
        payload: Some(member),
        remainder: batcher.flush_remainder(),
        aborted: false,
    })
}
