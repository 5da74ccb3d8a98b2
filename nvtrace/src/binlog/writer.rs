//! Append-only log writer

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use nvtrace_common::BinRecord;

use crate::domain::LogError;

/// Appends records to a sink.
///
/// Generic over `W: Write` so tests can write into a `Vec<u8>` while the
/// capture command writes into a buffered file.
pub struct BinLogWriter<W: Write> {
    inner: W,
    written: u64,
}

impl BinLogWriter<BufWriter<File>> {
    /// Create (or truncate) a log file
    ///
    /// # Errors
    /// Returns [`LogError::OpenFailed`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|source| LogError::OpenFailed { path: path.to_path_buf(), source })?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> BinLogWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Append one record
    ///
    /// # Errors
    /// Returns an error if the sink rejects the write.
    pub fn append(&mut self, record: &BinRecord) -> Result<(), LogError> {
        self.inner.write_all(&record.to_bytes())?;
        self.written += 1;
        Ok(())
    }

    /// Records appended so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush the sink and return the number of records written
    ///
    /// # Errors
    /// Returns an error if the final flush fails.
    pub fn finish(mut self) -> Result<u64, LogError> {
        self.inner.flush()?;
        Ok(self.written)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
