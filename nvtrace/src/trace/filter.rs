//! I/O tracepoint selection
//!
//! Only `NVME_IO_SUBMIT` / `NVME_IO_COMPLETE` events whose first argument is
//! the integer zero are captured. A non-zero first argument marks an admin or
//! other non-I/O queue event; a missing or string one is malformed. The first accepted event fixes the capture's time
//! origin.

use nvtrace_common::{TPOINT_NVME_IO_COMPLETE, TPOINT_NVME_IO_SUBMIT};

use super::source::{TpointDescriptor, TraceEvent};

/// Whether `name` is one of the captured I/O tracepoints
#[must_use]
pub fn is_io_tracepoint(name: &str) -> bool {
    name == TPOINT_NVME_IO_SUBMIT || name == TPOINT_NVME_IO_COMPLETE
}

/// Stateful filter over a trace event stream
#[derive(Debug, Default)]
pub struct TraceEventFilter {
    origin: Option<u64>,
    accepted: u64,
}

impl TraceEventFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `event` is captured. Accepting the first event sets the origin.
    pub fn accept(&mut self, event: &TraceEvent, tpoint: &TpointDescriptor) -> bool {
        if !is_io_tracepoint(&tpoint.name) || event.first_arg() != Some(0) {
            return false;
        }
        if self.origin.is_none() {
            self.origin = Some(event.tsc);
        }
        self.accepted += 1;
        true
    }

    /// Timestamp of the first accepted event
    #[must_use]
    pub fn origin(&self) -> Option<u64> {
        self.origin
    }

    /// Events accepted so far
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// `tsc` relative to the origin (against zero if nothing was accepted yet)
    #[must_use]
    pub fn relative(&self, tsc: u64) -> u64 {
        tsc.saturating_sub(self.origin.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LaneId;
    use crate::trace::source::ArgValue;

    fn tpoint(name: &str) -> TpointDescriptor {
        TpointDescriptor {
            name: name.to_string(),
            id: 0,
            new_object: false,
            object_type: 0,
            args: vec!["qid".into()],
        }
    }

    fn event(tsc: u64, first_arg: u64) -> TraceEvent {
        TraceEvent {
            tpoint_id: 0,
            lcore: LaneId(0),
            tsc,
            object_id: 0,
            object_index: None,
            object_start: None,
            args: vec![ArgValue::Int(first_arg)],
        }
    }

    #[test]
    fn test_accepts_io_tracepoints_on_io_queues() {
        let mut filter = TraceEventFilter::new();
        assert!(filter.accept(&event(10, 0), &tpoint(TPOINT_NVME_IO_SUBMIT)));
        assert!(filter.accept(&event(20, 0), &tpoint(TPOINT_NVME_IO_COMPLETE)));
        assert_eq!(filter.accepted(), 2);
    }

    #[test]
    fn test_rejects_other_tracepoints() {
        let mut filter = TraceEventFilter::new();
        assert!(!filter.accept(&event(10, 0), &tpoint("BDEV_IO_START")));
        assert_eq!(filter.origin(), None);
    }

    #[test]
    fn test_rejects_nonzero_first_argument() {
        let mut filter = TraceEventFilter::new();
        assert!(!filter.accept(&event(10, 1), &tpoint(TPOINT_NVME_IO_SUBMIT)));
        assert_eq!(filter.accepted(), 0);
    }

    #[test]
    fn test_rejects_missing_or_string_first_argument() {
        let mut filter = TraceEventFilter::new();
        let mut missing = event(10, 0);
        missing.args.clear();
        assert!(!filter.accept(&missing, &tpoint(TPOINT_NVME_IO_SUBMIT)));

        let mut string = event(20, 0);
        string.args[0] = ArgValue::Str("0".into());
        assert!(!filter.accept(&string, &tpoint(TPOINT_NVME_IO_SUBMIT)));
        assert_eq!(filter.accepted(), 0);
        assert_eq!(filter.origin(), None);
    }

    #[test]
    fn test_origin_is_first_accepted_event() {
        let mut filter = TraceEventFilter::new();
        filter.accept(&event(5, 0), &tpoint("OTHER"));
        filter.accept(&event(100, 0), &tpoint(TPOINT_NVME_IO_SUBMIT));
        filter.accept(&event(150, 0), &tpoint(TPOINT_NVME_IO_COMPLETE));
        assert_eq!(filter.origin(), Some(100));
        assert_eq!(filter.relative(150), 50);
    }

    #[test]
    fn test_relative_without_origin_is_absolute() {
        let filter = TraceEventFilter::new();
        assert_eq!(filter.relative(1234), 1234);
    }
}
