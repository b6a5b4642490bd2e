//! Archive reader
//!
//! Each input archive is a zip container holding one `;`-delimited text
//! payload. `ArchiveReader` owns the container handle and `RowStream` owns the
//! decoded member stream; both are released when they go out of scope, on
//! every exit path of the caller.

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};
use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use super::error::LoadError;

/// Field delimiter of the payload
pub const FIELD_DELIMITER: u8 = b';';

/// Default extension of the payload member
pub const DEFAULT_PAYLOAD_EXTENSION: &str = "txt";

/// An opened archive and the payload member selected inside it
pub struct ArchiveReader {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
    payload: Option<String>,
}

impl ArchiveReader {
    /// Open the archive at `path` and locate its payload member
    ///
    /// An archive without a member ending in `payload_extension` opens fine;
    /// its row stream is simply empty.
    pub fn open(path: &Path, payload_extension: &str) -> Result<Self, LoadError> {
        let archive_error = |source: ZipError| LoadError::Archive {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(|e| archive_error(ZipError::Io(e)))?;
        let archive = ZipArchive::new(BufReader::new(file)).map_err(archive_error)?;

        let payload = archive
            .file_names()
            .find(|name| is_payload(name, payload_extension))
            .map(str::to_string);

        debug!(
            "Opened archive {:?} ({} members, payload: {:?})",
            path,
            archive.len(),
            payload
        );

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            payload,
        })
    }

    /// Name of the payload member, if the archive has one
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Open the payload member as a stream of raw rows
    ///
    /// The first row yielded is the payload header.
    pub fn rows(&mut self) -> Result<RowStream<'_>, LoadError> {
        let Some(member) = self.payload.as_deref() else {
            return Ok(RowStream {
                path: &self.path,
                records: None,
            });
        };

        let file = self
            .archive
            .by_name(member)
            .map_err(|source| LoadError::Archive {
                path: self.path.clone(),
                source,
            })?;
        let stream: Box<dyn Read + '_> = Box::new(file);

        // Every row must have as many fields as the header
        let records = ReaderBuilder::new()
            .delimiter(FIELD_DELIMITER)
            .has_headers(false)
            .flexible(false)
            .from_reader(stream)
            .into_records();

        Ok(RowStream {
            path: &self.path,
            records: Some(records),
        })
    }
}

/// Rows of one payload member
pub struct RowStream<'a> {
    path: &'a Path,
    records: Option<StringRecordsIntoIter<Box<dyn Read + 'a>>>,
}

impl Iterator for RowStream<'_> {
    type Item = Result<StringRecord, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let records = self.records.as_mut()?;
        let next = records.next()?;
        Some(next.map_err(|source| LoadError::Read {
            path: self.path.to_path_buf(),
            source,
        }))
    }
}

fn is_payload(name: &str, extension: &str) -> bool {
    !name.ends_with('/')
        && Path::new(name)
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}
