use std::fmt;
use std::path::PathBuf;

use crate::db_utils::trade_db::DbError;

/// Positional fields of a trade row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeField {
    Ticker,
    GrossAmount,
    Quantity,
    EntryTime,
    TradeDate,
}

impl TradeField {
    /// Column index of the field inside a payload row
    pub fn column(self) -> usize {
        match self {
            TradeField::Ticker => 1,
            TradeField::GrossAmount => 3,
            TradeField::Quantity => 4,
            TradeField::EntryTime => 5,
            TradeField::TradeDate => 8,
        }
    }
}

impl fmt::Display for TradeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TradeField::Ticker => "ticker",
            TradeField::GrossAmount => "gross_amount",
            TradeField::Quantity => "quantity",
            TradeField::EntryTime => "entry_time",
            TradeField::TradeDate => "trade_date",
        };
        f.write_str(name)
    }
}

/// A single field of a row failed to convert
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {field} {value:?}: {reason}")]
pub struct ParseError {
    pub field: TradeField,
    pub value: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(field: TradeField, value: &str, reason: impl Into<String>) -> Self {
        Self {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Broad category of a load failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    Sink,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to list directory {path:?}: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open archive {path:?}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to read rows from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("payload {member} in {path:?} has no header row")]
    MissingHeader { path: PathBuf, member: String },

    #[error("{path:?} line {line}: {source}")]
    Parse {
        path: PathBuf,
        line: u64,
        #[source]
        source: ParseError,
    },

    #[error("failed to insert batch {batch} from {path:?}: {source}")]
    Sink {
        path: PathBuf,
        batch: usize,
        #[source]
        source: DbError,
    },

    #[error("worker for {path:?} stopped unexpectedly: {reason}")]
    Worker { path: PathBuf, reason: String },
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Parse { .. } => ErrorKind::Parse,
            LoadError::Sink { .. } => ErrorKind::Sink,
            LoadError::ListDir { .. }
            | LoadError::Archive { .. }
            | LoadError::Read { .. }
            | LoadError::MissingHeader { .. }
            | LoadError::Worker { .. } => ErrorKind::Io,
        }
    }

    /// Path of the archive (or directory) the failure belongs to
    pub fn path(&self) -> &PathBuf {
        match self {
            LoadError::ListDir { path, .. }
            | LoadError::Archive { path, .. }
            | LoadError::Read { path, .. }
            | LoadError::MissingHeader { path, .. }
            | LoadError::Parse { path, .. }
            | LoadError::Sink { path, .. }
            | LoadError::Worker { path, .. } => path,
        }
    }
}
