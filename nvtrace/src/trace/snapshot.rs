//! JSON trace snapshot source
//!
//! Reads the JSON export of a trace (the same document for live
//! shared-memory sources and snapshot files):
//!
//! ```json
//! {
//!   "tsc_rate": 2100000000,
//!   "tpoints": [
//!     { "name": "NVME_IO_SUBMIT", "id": 32, "new_object": true, "object_type": 4,
//!       "args": [ { "name": "qid" }, { "name": "cid" }, { "name": "opc" } ] }
//!   ],
//!   "entries": [
//!     { "lcore": 0, "tpoint": 32, "tsc": 1000, "object_id": 7, "args": [0, 5, 1] }
//!   ]
//! }
//! ```
//!
//! Entries from all lanes are merged in timestamp order. Object indexes and
//! start timestamps are assigned here, the way the trace parser does it: a
//! `new_object` tracepoint opens an object and takes the next index for its
//! object type; later tracepoints of that type look the object up.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::debug;
use serde::Deserialize;
use serde_json::Value;

use super::source::{ArgValue, TpointDescriptor, TraceEvent, TraceFlags, TraceSource};
use crate::domain::{LaneId, TraceError};
use nvtrace_common::OBJECT_NONE;

#[derive(Deserialize)]
struct Snapshot {
    tsc_rate: u64,
    tpoints: Vec<SnapshotTpoint>,
    #[serde(default)]
    entries: Vec<SnapshotEntry>,
}

#[derive(Deserialize)]
struct SnapshotTpoint {
    name: String,
    id: u16,
    #[serde(default)]
    new_object: bool,
    #[serde(default)]
    object_type: u8,
    #[serde(default)]
    args: Vec<SnapshotArg>,
}

#[derive(Deserialize)]
struct SnapshotArg {
    name: String,
}

#[derive(Deserialize)]
struct SnapshotEntry {
    lcore: u32,
    tpoint: u16,
    tsc: u64,
    #[serde(default)]
    object_id: u64,
    #[serde(default)]
    args: Vec<Value>,
}

/// Per-object-type bookkeeping of open objects
#[derive(Default)]
struct ObjectStats {
    next_index: u64,
    /// `object_id` → (index, start tsc)
    open: HashMap<u64, (u64, u64)>,
}

/// Trace source backed by a parsed JSON snapshot
pub struct SnapshotSource {
    flags: TraceFlags,
    entries: std::vec::IntoIter<SnapshotEntry>,
    entry_counts: BTreeMap<LaneId, u64>,
    objects: HashMap<u8, ObjectStats>,
}

impl SnapshotSource {
    /// Open a snapshot file, optionally keeping only one lane
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or is not a valid snapshot.
    pub fn open(path: impl AsRef<Path>, lane: Option<LaneId>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|source| TraceError::OpenFailed { path: path.to_path_buf(), source })?;
        Self::from_reader(BufReader::new(file), lane)
    }

    /// Parse a snapshot from any reader
    ///
    /// # Errors
    /// Returns an error if the document is not a valid snapshot.
    pub fn from_reader(reader: impl Read, lane: Option<LaneId>) -> Result<Self, TraceError> {
        let snapshot: Snapshot = serde_json::from_reader(reader)?;

        let tpoints = snapshot.tpoints.into_iter().map(|t| TpointDescriptor {
            name: t.name,
            id: t.id,
            new_object: t.new_object,
            object_type: t.object_type,
            args: t.args.into_iter().map(|a| a.name).collect(),
        });
        let flags = TraceFlags::new(snapshot.tsc_rate, tpoints);

        let mut entries: Vec<SnapshotEntry> = snapshot
            .entries
            .into_iter()
            .filter(|e| lane.map_or(true, |l| l.0 == e.lcore))
            .collect();
        // Stable, so same-tick entries keep their per-lane order
        entries.sort_by_key(|e| e.tsc);

        let mut entry_counts = BTreeMap::new();
        for entry in &entries {
            *entry_counts.entry(LaneId(entry.lcore)).or_insert(0) += 1;
        }
        debug!("Loaded trace snapshot: {} entries, {} lanes", entries.len(), entry_counts.len());

        Ok(Self { flags, entries: entries.into_iter(), entry_counts, objects: HashMap::new() })
    }

    fn correlate(&mut self, tpoint: &TpointDescriptor, entry: &SnapshotEntry) -> (Option<u64>, Option<u64>) {
        if tpoint.object_type == OBJECT_NONE {
            return (None, None);
        }
        let stats = self.objects.entry(tpoint.object_type).or_default();
        if tpoint.new_object {
            let index = stats.next_index;
            stats.next_index += 1;
            stats.open.insert(entry.object_id, (index, entry.tsc));
        }
        match stats.open.get(&entry.object_id) {
            Some(&(index, start)) => (Some(index), Some(start)),
            None => (None, None),
        }
    }
}

fn parse_arg(value: Value) -> ArgValue {
    match value {
        Value::Number(n) => {
            // Negative values keep their two's complement bit pattern
            #[allow(clippy::cast_sign_loss)]
            let v = n.as_u64().or_else(|| n.as_i64().map(|i| i as u64)).unwrap_or(0);
            ArgValue::Int(v)
        }
        Value::String(s) => {
            let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"));
            match hex.map(|h| u64::from_str_radix(h, 16)) {
                Some(Ok(v)) => ArgValue::Int(v),
                _ => ArgValue::Str(s),
            }
        }
        Value::Bool(b) => ArgValue::Int(u64::from(b)),
        other => ArgValue::Str(other.to_string()),
    }
}

impl TraceSource for SnapshotSource {
    fn flags(&self) -> &TraceFlags {
        &self.flags
    }

    fn entry_count(&self, lane: LaneId) -> u64 {
        self.entry_counts.get(&lane).copied().unwrap_or(0)
    }

    fn next_event(&mut self) -> Result<Option<TraceEvent>, TraceError> {
        let Some(entry) = self.entries.next() else {
            return Ok(None);
        };
        let tpoint = self.flags.require_tpoint(entry.tpoint)?.clone();
        let (object_index, object_start) = self.correlate(&tpoint, &entry);

        Ok(Some(TraceEvent {
            tpoint_id: entry.tpoint,
            lcore: LaneId(entry.lcore),
            tsc: entry.tsc,
            object_id: entry.object_id,
            object_index,
            object_start,
            args: entry.args.into_iter().map(parse_arg).collect(),
        }))
    }
}
