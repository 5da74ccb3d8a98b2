//! Log reader
//!
//! [`BinLogReader`] derives the record count from the sink length and hands
//! out lazy, restartable record iterators.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use log::warn;
use nvtrace_common::{BinRecord, RECORD_SIZE};

use crate::domain::LogError;

/// Number of records in a log of `len` bytes
///
/// # Errors
/// Returns [`LogError::TruncatedLog`] if `len` is not a multiple of the record size.
pub fn record_count_for_len(len: u64) -> Result<u64, LogError> {
    let size = RECORD_SIZE as u64;
    if len % size != 0 {
        return Err(LogError::TruncatedLog { len, record_size: RECORD_SIZE });
    }
    Ok(len / size)
}

/// Reads records from a seekable source
pub struct BinLogReader<R: Read + Seek> {
    inner: R,
    count: u64,
    trailing_bytes: u64,
}

impl BinLogReader<BufReader<File>> {
    /// Open a log file, rejecting truncated logs
    ///
    /// # Errors
    /// Returns [`LogError::OpenFailed`] if the file cannot be opened and
    /// [`LogError::TruncatedLog`] if its size is not a whole number of records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Self::from_reader(BufReader::new(open_file(path.as_ref())?))
    }

    /// Open a log file, reading only its whole records if it is truncated
    ///
    /// # Errors
    /// Returns [`LogError::OpenFailed`] if the file cannot be opened.
    pub fn open_lenient(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Self::from_reader_lenient(BufReader::new(open_file(path.as_ref())?))
    }
}

fn open_file(path: &Path) -> Result<File, LogError> {
    File::open(path).map_err(|source| LogError::OpenFailed { path: path.to_path_buf(), source })
}

impl<R: Read + Seek> BinLogReader<R> {
    /// Wrap a seekable source, rejecting truncated logs
    ///
    /// # Errors
    /// Returns [`LogError::TruncatedLog`] if the length is not a whole number of records.
    pub fn from_reader(mut inner: R) -> Result<Self, LogError> {
        let len = inner.seek(SeekFrom::End(0))?;
        let count = record_count_for_len(len)?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, count, trailing_bytes: 0 })
    }

    /// Wrap a seekable source; a partial trailing record is reported and ignored
    ///
    /// # Errors
    /// Returns an error if the source cannot be seeked.
    pub fn from_reader_lenient(mut inner: R) -> Result<Self, LogError> {
        let len = inner.seek(SeekFrom::End(0))?;
        let size = RECORD_SIZE as u64;
        let trailing_bytes = len % size;
        if trailing_bytes != 0 {
            warn!(
                "{}; ignoring {trailing_bytes} trailing bytes",
                LogError::TruncatedLog { len, record_size: RECORD_SIZE }
            );
        }
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, count: len / size, trailing_bytes })
    }

    /// Number of whole records in the log
    pub fn record_count(&self) -> u64 {
        self.count
    }

    /// Bytes after the last whole record (0 unless opened leniently)
    pub fn trailing_bytes(&self) -> u64 {
        self.trailing_bytes
    }

    /// Seek back to the first record
    ///
    /// # Errors
    /// Returns an error if the source cannot be seeked.
    pub fn rewind(&mut self) -> Result<(), LogError> {
        self.inner.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Iterate over all records from the start of the log.
    ///
    /// Each call starts over, so the sequence can be walked any number of times.
    ///
    /// # Errors
    /// Returns an error if the source cannot be rewound.
    pub fn records(&mut self) -> Result<Records<'_, R>, LogError> {
        self.rewind()?;
        Ok(Records { inner: &mut self.inner, remaining: self.count })
    }

    /// Read every record into memory
    ///
    /// # Errors
    /// Returns an error if any record cannot be read.
    pub fn read_all(&mut self) -> Result<Vec<BinRecord>, LogError> {
        self.records()?.collect()
    }
}

/// Lazy iterator over the records of a log
pub struct Records<'a, R: Read> {
    inner: &'a mut R,
    remaining: u64,
}

impl<R: Read> Iterator for Records<'_, R> {
    type Item = Result<BinRecord, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let mut buf = [0u8; RECORD_SIZE];
        match self.inner.read_exact(&mut buf) {
            Ok(()) => {
                self.remaining -= 1;
                Some(Ok(BinRecord::from_bytes(&buf)))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e.into()))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (0, Some(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binlog::BinLogWriter;
    use std::io::Cursor;

    fn log_of(n: u32) -> Vec<u8> {
        let mut writer = BinLogWriter::new(Vec::new());
        for i in 0..n {
            writer.append(&BinRecord { lcore: i, ..Default::default() }).unwrap();
        }
        writer.into_inner()
    }

    #[test]
    fn test_count_from_length() {
        assert_eq!(record_count_for_len(0).unwrap(), 0);
        assert_eq!(record_count_for_len(3 * RECORD_SIZE as u64).unwrap(), 3);
        assert!(matches!(
            record_count_for_len(3 * RECORD_SIZE as u64 + 5),
            Err(LogError::TruncatedLog { len, record_size: RECORD_SIZE }) if len == 341
        ));
    }

    #[test]
    fn test_records_in_order() {
        let mut reader = BinLogReader::from_reader(Cursor::new(log_of(3))).unwrap();
        assert_eq!(reader.record_count(), 3);
        let lcores: Vec<u32> = reader.records().unwrap().map(|r| r.unwrap().lcore).collect();
        assert_eq!(lcores, vec![0, 1, 2]);
    }

    #[test]
    fn test_records_are_restartable() {
        let mut reader = BinLogReader::from_reader(Cursor::new(log_of(2))).unwrap();
        let first = reader.read_all().unwrap();
        let second = reader.read_all().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_truncated_log_is_rejected() {
        let mut bytes = log_of(2);
        bytes.extend_from_slice(&[0xAA; 10]);
        let result = BinLogReader::from_reader(Cursor::new(bytes));
        assert!(matches!(result, Err(LogError::TruncatedLog { .. })));
    }

    #[test]
    fn test_lenient_reader_skips_partial_record() {
        let mut bytes = log_of(2);
        bytes.extend_from_slice(&[0xAA; 10]);
        let mut reader = BinLogReader::from_reader_lenient(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.record_count(), 2);
        assert_eq!(reader.trailing_bytes(), 10);
        assert_eq!(reader.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_log() {
        let mut reader = BinLogReader::from_reader(Cursor::new(Vec::new())).unwrap();
        assert_eq!(reader.record_count(), 0);
        assert!(reader.records().unwrap().next().is_none());
    }

    #[test]
    fn test_open_missing_file() {
        let result = BinLogReader::open("/nonexistent/trace.bin");
        assert!(matches!(result, Err(LogError::OpenFailed { .. })));
    }
}
