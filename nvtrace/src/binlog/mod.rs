//! Fixed-record binary log
//!
//! The log is a bare sequence of [`nvtrace_common::BinRecord`]s, each
//! `RECORD_SIZE` bytes. There is no header or footer; the record count is the
//! file length divided by the record size.

pub mod display;
pub mod reader;
pub mod writer;

pub use display::{dump_records, format_record};
pub use reader::{record_count_for_len, BinLogReader, Records};
pub use writer::BinLogWriter;
