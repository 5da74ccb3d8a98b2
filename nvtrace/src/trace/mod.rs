//! Trace capture pipeline
//!
//! ```text
//! TraceSource ──▶ TraceEventFilter ──▶ TraceRecordEncoder ──▶ BinLogWriter
//! ```
//!
//! - `source`: trace event model and the [`TraceSource`] seam
//! - `snapshot`: JSON snapshot implementation of [`TraceSource`]
//! - `filter`: keeps I/O-queue submit/complete events, fixes the time origin
//! - `encoder`: maps an accepted event onto a fixed-size record
//! - `capture`: drives the pipeline for one capture session

pub mod capture;
pub mod encoder;
pub mod filter;
pub mod snapshot;
pub mod source;

pub use capture::{capture, print_lane_sizes, CaptureStats};
pub use encoder::TraceRecordEncoder;
pub use filter::{is_io_tracepoint, TraceEventFilter};
pub use snapshot::SnapshotSource;
pub use source::{ArgValue, SourceSpec, TpointDescriptor, TraceEvent, TraceFlags, TraceSource};
