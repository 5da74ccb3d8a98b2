//! Trace source abstraction
//!
//! A trace source yields the events of a running (or snapshotted) storage
//! application's trace ring, together with the tracepoint descriptors that
//! name each event's arguments.

use std::collections::HashMap;
use std::path::PathBuf;

use nvtrace_common::OBJECT_NONE;

use crate::domain::{LaneId, TraceError};

/// One argument value carried by a trace event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// Integer and pointer arguments
    Int(u64),
    /// String arguments
    Str(String),
}

impl ArgValue {
    /// Integer value, or `None` for string arguments
    #[must_use]
    pub fn as_int(&self) -> Option<u64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            ArgValue::Str(_) => None,
        }
    }
}

/// Static description of a tracepoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpointDescriptor {
    pub name: String,
    pub id: u16,
    /// Whether this tracepoint opens a new correlated object
    pub new_object: bool,
    /// Object type the tracepoint refers to (`OBJECT_NONE` if none)
    pub object_type: u8,
    /// Argument names, by position
    pub args: Vec<String>,
}

impl TpointDescriptor {
    /// Whether events of this tracepoint close an object opened earlier,
    /// so a submit-to-complete latency can be derived.
    #[must_use]
    pub fn tracks_latency(&self) -> bool {
        !self.new_object && self.object_type != OBJECT_NONE
    }
}

/// Trace-wide metadata
#[derive(Debug, Clone, Default)]
pub struct TraceFlags {
    /// Ticks per second of event timestamps
    pub tsc_rate: u64,
    tpoints: HashMap<u16, TpointDescriptor>,
}

impl TraceFlags {
    #[must_use]
    pub fn new(tsc_rate: u64, tpoints: impl IntoIterator<Item = TpointDescriptor>) -> Self {
        Self { tsc_rate, tpoints: tpoints.into_iter().map(|t| (t.id, t)).collect() }
    }

    #[must_use]
    pub fn tpoint(&self, id: u16) -> Option<&TpointDescriptor> {
        self.tpoints.get(&id)
    }

    /// Look up a tracepoint, failing on ids the trace never described
    ///
    /// # Errors
    /// Returns [`TraceError::UnknownTpoint`] if `id` is not described.
    pub fn require_tpoint(&self, id: u16) -> Result<&TpointDescriptor, TraceError> {
        self.tpoint(id).ok_or(TraceError::UnknownTpoint(id))
    }
}

/// One fired tracepoint, as produced by the trace source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub tpoint_id: u16,
    pub lcore: LaneId,
    /// Absolute timestamp in ticks
    pub tsc: u64,
    pub object_id: u64,
    /// Sequence index of the correlated object, if one was assigned
    pub object_index: Option<u64>,
    /// Timestamp at which the correlated object was first observed
    pub object_start: Option<u64>,
    pub args: Vec<ArgValue>,
}

impl TraceEvent {
    /// Integer value of the first argument, `None` if absent or not an integer
    #[must_use]
    pub fn first_arg(&self) -> Option<u64> {
        self.args.first().and_then(ArgValue::as_int)
    }
}

/// Anything that produces trace events in timestamp order
pub trait TraceSource {
    fn flags(&self) -> &TraceFlags;

    /// Number of entries recorded on `lane`
    fn entry_count(&self, lane: LaneId) -> u64;

    /// Next event, or `None` once the source is exhausted
    ///
    /// # Errors
    /// Returns an error if the underlying source is corrupt.
    fn next_event(&mut self) -> Result<Option<TraceEvent>, TraceError>;
}

/// Where a capture reads its trace from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Live trace of an application identified by shared-memory id
    Shm { name: String, id: i32 },
    /// Live trace of an application identified by process id
    Pid { name: String, pid: i32 },
    /// Trace snapshot file
    File(PathBuf),
}

impl SourceSpec {
    /// Path the trace is read from
    #[must_use]
    pub fn trace_path(&self) -> PathBuf {
        match self {
            SourceSpec::Shm { name, id } => PathBuf::from(format!("/dev/shm/{name}_trace.{id}")),
            SourceSpec::Pid { name, pid } => {
                PathBuf::from(format!("/dev/shm/{name}_trace.pid{pid}"))
            }
            SourceSpec::File(path) => path.clone(),
        }
    }

    /// Output file name used when `--output` is not given
    #[must_use]
    pub fn default_output(&self) -> PathBuf {
        match self {
            SourceSpec::Shm { name, id } => PathBuf::from(format!("{name}_{id}.bin")),
            SourceSpec::Pid { name, pid } => PathBuf::from(format!("{name}_pid{pid}.bin")),
            SourceSpec::File(path) => {
                let mut out = path.clone().into_os_string();
                out.push(".bin");
                PathBuf::from(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shm_paths() {
        let spec = SourceSpec::Shm { name: "nvmf".into(), id: 1 };
        assert_eq!(spec.trace_path(), PathBuf::from("/dev/shm/nvmf_trace.1"));
        assert_eq!(spec.default_output(), PathBuf::from("nvmf_1.bin"));
    }

    #[test]
    fn test_pid_paths() {
        let spec = SourceSpec::Pid { name: "bdevperf".into(), pid: 4242 };
        assert_eq!(spec.trace_path(), PathBuf::from("/dev/shm/bdevperf_trace.pid4242"));
        assert_eq!(spec.default_output(), PathBuf::from("bdevperf_pid4242.bin"));
    }

    #[test]
    fn test_file_paths() {
        let spec = SourceSpec::File(PathBuf::from("traces/run1.json"));
        assert_eq!(spec.trace_path(), PathBuf::from("traces/run1.json"));
        assert_eq!(spec.default_output(), PathBuf::from("traces/run1.json.bin"));
    }

    #[test]
    fn test_tracks_latency() {
        let mut tpoint = TpointDescriptor {
            name: "NVME_IO_COMPLETE".into(),
            id: 1,
            new_object: false,
            object_type: 3,
            args: vec![],
        };
        assert!(tpoint.tracks_latency());
        tpoint.new_object = true;
        assert!(!tpoint.tracks_latency());
        tpoint.new_object = false;
        tpoint.object_type = OBJECT_NONE;
        assert!(!tpoint.tracks_latency());
    }
}
