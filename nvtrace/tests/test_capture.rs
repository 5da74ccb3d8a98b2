use std::path::PathBuf;

use nvtrace::binlog::{BinLogReader, BinLogWriter};
use nvtrace::domain::{LaneId, LogError, TraceError};
use nvtrace::trace::{
    capture, ArgValue, SnapshotSource, TpointDescriptor, TraceEvent, TraceFlags, TraceSource,
};
use nvtrace_common::{opcode, RecordKind, RECORD_SIZE};
use proptest::prelude::*;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Trace source over an in-memory event list
struct VecSource {
    flags: TraceFlags,
    events: std::vec::IntoIter<TraceEvent>,
}

impl VecSource {
    fn new(events: Vec<TraceEvent>) -> Self {
        let tpoints = [
            ("NVME_IO_SUBMIT", 1, vec!["qid", "cid", "opc", "nsid", "cdw10", "cdw11", "cdw12", "cdw13"]),
            ("NVME_IO_COMPLETE", 2, vec!["qid", "cid", "cpl"]),
            ("BDEV_IO_DONE", 3, vec!["qid"]),
        ]
        .into_iter()
        .map(|(name, id, args)| TpointDescriptor {
            name: name.into(),
            id,
            new_object: false,
            object_type: 0,
            args: args.into_iter().map(String::from).collect(),
        });
        Self { flags: TraceFlags::new(2_000_000, tpoints), events: events.into_iter() }
    }
}

impl TraceSource for VecSource {
    fn flags(&self) -> &TraceFlags {
        &self.flags
    }

    fn entry_count(&self, _lane: LaneId) -> u64 {
        self.events.len() as u64
    }

    fn next_event(&mut self) -> Result<Option<TraceEvent>, TraceError> {
        Ok(self.events.next())
    }
}

fn event(tpoint_id: u16, tsc: u64, args: &[u64]) -> TraceEvent {
    TraceEvent {
        tpoint_id,
        lcore: LaneId(0),
        tsc,
        object_id: 0,
        object_index: None,
        object_start: None,
        args: args.iter().copied().map(ArgValue::Int).collect(),
    }
}

#[test]
fn test_scenario_a_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("scenario_a.bin");

    let mut source = SnapshotSource::open(fixture("scenario_a.json"), None).unwrap();
    let mut writer = BinLogWriter::create(&out).unwrap();
    let stats = capture(&mut source, &mut writer).unwrap();
    assert_eq!(writer.finish().unwrap(), 2);
    assert_eq!(stats.seen, 4);
    assert_eq!(stats.accepted, 2);

    assert_eq!(std::fs::metadata(&out).unwrap().len(), 2 * RECORD_SIZE as u64);

    let records = BinLogReader::open(&out).unwrap().read_all().unwrap();
    assert_eq!(records.len(), 2);

    let submit = &records[0];
    assert_eq!(submit.kind(), RecordKind::Submit);
    assert_eq!(submit.opc, u16::from(opcode::WRITE));
    assert_eq!(submit.cid, 5);
    assert_eq!(submit.nsid, 1);
    assert_eq!(submit.cdw12, 7);
    assert_eq!(submit.tsc_timestamp, 0);
    assert_eq!(submit.tsc_rate, 1_000_000);

    let complete = &records[1];
    assert_eq!(complete.kind(), RecordKind::Complete);
    assert_eq!(complete.cid, 5);
    assert_eq!(complete.cpl, 0);
    assert_eq!(complete.tsc_timestamp, 300);
    assert_eq!(complete.tsc_sc_time, 300);
}

#[test]
fn test_lane_filter() {
    let mut source = SnapshotSource::open(fixture("zoned_writes.json"), Some(LaneId(2))).unwrap();
    assert_eq!(source.entry_count(LaneId(0)), 0);
    assert_eq!(source.entry_count(LaneId(2)), 4);

    let mut writer = BinLogWriter::new(Vec::new());
    let stats = capture(&mut source, &mut writer).unwrap();
    assert_eq!(stats.written, 4);

    let bytes = writer.into_inner();
    let records = BinLogReader::from_reader(std::io::Cursor::new(bytes))
        .unwrap()
        .read_all()
        .unwrap();
    assert!(records.iter().all(|r| r.lcore == 2));
    // Origin is the first accepted event of the filtered lane
    assert_eq!(records[0].tsc_timestamp, 0);
    assert_eq!(records[1].tsc_timestamp, 60);
}

#[test]
fn test_truncated_log_is_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.bin");
    let mut bytes = vec![0u8; 2 * RECORD_SIZE];
    bytes.truncate(2 * RECORD_SIZE - 6);
    std::fs::write(&path, &bytes).unwrap();

    match BinLogReader::open(&path) {
        Err(LogError::TruncatedLog { len, record_size }) => {
            assert_eq!(len, 218);
            assert_eq!(record_size, RECORD_SIZE);
        }
        other => panic!("expected TruncatedLog, got {:?}", other.map(|r| r.record_count())),
    }

    let mut reader = BinLogReader::open_lenient(&path).unwrap();
    assert_eq!(reader.record_count(), 1);
    assert_eq!(reader.read_all().unwrap().len(), 1);
}

#[test]
fn test_missing_trace_file() {
    let result = SnapshotSource::open("/nonexistent/trace.json", None);
    assert!(matches!(result, Err(TraceError::OpenFailed { .. })));
}

#[derive(Debug, Clone)]
struct Submit {
    cid: u16,
    opc: u8,
    nsid: u32,
    cdw: [u32; 4],
    gap: u64,
}

fn submit_strategy() -> impl Strategy<Value = Submit> {
    (any::<u16>(), any::<u8>(), any::<u32>(), any::<[u32; 4]>(), 0u64..1000).prop_map(
        |(cid, opc, nsid, cdw, gap)| Submit { cid, opc, nsid, cdw, gap },
    )
}

proptest! {
    #[test]
    fn prop_round_trip_preserves_fields(submits in prop::collection::vec(submit_strategy(), 0..40)) {
        let mut tsc = 5_000;
        let events: Vec<TraceEvent> = submits
            .iter()
            .map(|s| {
                tsc += s.gap;
                let args = [
                    0,
                    u64::from(s.cid),
                    u64::from(s.opc),
                    u64::from(s.nsid),
                    u64::from(s.cdw[0]),
                    u64::from(s.cdw[1]),
                    u64::from(s.cdw[2]),
                    u64::from(s.cdw[3]),
                ];
                event(1, tsc, &args)
            })
            .collect();
        let origin = events.first().map_or(0, |e| e.tsc);

        let mut source = VecSource::new(events.clone());
        let mut writer = BinLogWriter::new(Vec::new());
        capture(&mut source, &mut writer).unwrap();
        let records = BinLogReader::from_reader(std::io::Cursor::new(writer.into_inner()))
            .unwrap()
            .read_all()
            .unwrap();

        prop_assert_eq!(records.len(), submits.len());
        for ((record, s), e) in records.iter().zip(&submits).zip(&events) {
            prop_assert_eq!(record.cid, s.cid);
            prop_assert_eq!(record.opc, u16::from(s.opc));
            prop_assert_eq!(record.nsid, s.nsid);
            prop_assert_eq!([record.cdw10, record.cdw11, record.cdw12, record.cdw13], s.cdw);
            prop_assert_eq!(record.tsc_timestamp, e.tsc - origin);
            prop_assert_eq!(record.tsc_rate, 2_000_000);
            prop_assert_eq!(record.tpoint_name.as_str(), "NVME_IO_SUBMIT");
        }
    }

    #[test]
    fn prop_filter_keeps_io_queue_events(stream in prop::collection::vec((1u16..=3, 0u64..3), 0..60)) {
        let events: Vec<TraceEvent> = stream
            .iter()
            .enumerate()
            .map(|(i, &(tpoint, qid))| event(tpoint, i as u64, &[qid, 1, 2]))
            .collect();
        let expected = stream.iter().filter(|&&(tpoint, qid)| tpoint != 3 && qid == 0).count();

        let mut source = VecSource::new(events);
        let mut writer = BinLogWriter::new(Vec::new());
        let stats = capture(&mut source, &mut writer).unwrap();

        prop_assert_eq!(stats.written, expected as u64);
        prop_assert_eq!(writer.into_inner().len(), expected * RECORD_SIZE);
    }
}
