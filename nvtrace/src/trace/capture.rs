//! Capture session driver

use std::io::Write;

use log::{debug, info};
use nvtrace_common::MAX_LCORE;

use super::encoder::TraceRecordEncoder;
use super::filter::TraceEventFilter;
use super::source::TraceSource;
use crate::binlog::BinLogWriter;
use crate::domain::{CaptureError, LaneId};

/// Counters for one capture session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    /// Events read from the source
    pub seen: u64,
    /// Events that passed the I/O filter
    pub accepted: u64,
    /// Records appended to the log
    pub written: u64,
}

/// Print per-lane entry counts, skipping empty lanes
///
/// # Errors
/// Returns an error if writing to `out` fails.
pub fn print_lane_sizes<S: TraceSource, W: Write>(
    source: &S,
    lane: Option<LaneId>,
    out: &mut W,
) -> std::io::Result<()> {
    for i in 0..MAX_LCORE {
        if lane.is_some_and(|l| l.0 != i) {
            continue;
        }
        let count = source.entry_count(LaneId(i));
        if count > 0 {
            writeln!(out, "Trace Size of lcore ({i}): {count}")?;
        }
    }
    Ok(())
}

/// Filter, encode and append every event of `source` to `writer`.
///
/// # Errors
/// Returns an error if the source is corrupt, a tracepoint name does not fit
/// the record, or the log cannot be written.
pub fn capture<S: TraceSource, W: Write>(
    source: &mut S,
    writer: &mut BinLogWriter<W>,
) -> Result<CaptureStats, CaptureError> {
    let encoder = TraceRecordEncoder::new(source.flags().tsc_rate);
    let mut filter = TraceEventFilter::new();
    let mut stats = CaptureStats::default();

    while let Some(event) = source.next_event()? {
        stats.seen += 1;
        let tpoint = source.flags().require_tpoint(event.tpoint_id)?;
        if !filter.accept(&event, tpoint) {
            continue;
        }
        stats.accepted += 1;

        let origin = filter.origin().unwrap_or(0);
        let record = encoder.encode(&event, tpoint, origin)?;
        writer.append(&record)?;
        stats.written += 1;
    }

    match filter.origin() {
        Some(origin) => debug!("Capture time origin: {origin}"),
        None => debug!("No I/O events accepted, time origin unset"),
    }
    info!(
        "Captured {} of {} events ({} records written)",
        stats.accepted, stats.seen, stats.written
    );
    Ok(stats)
}
