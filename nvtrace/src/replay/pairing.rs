//! Submit/complete pairing by command id

use std::collections::{HashMap, VecDeque};

use nvtrace_common::{BinRecord, RecordKind};

use crate::device::CompletionStatus;

/// A submit record and the completion recorded for it, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPair {
    /// Position of the submit record in the log
    pub index: usize,
    pub submit: BinRecord,
    pub complete: Option<BinRecord>,
}

impl RecordPair {
    /// Completion status recorded during capture
    #[must_use]
    pub fn recorded_status(&self) -> Option<CompletionStatus> {
        self.complete.map(|c| CompletionStatus::from_raw(c.cpl))
    }

    /// Submit-to-complete latency in ticks recorded during capture.
    ///
    /// Uses the correlated latency when the trace tracked the object, and the
    /// difference of the two relative timestamps otherwise.
    #[must_use]
    pub fn recorded_latency(&self) -> Option<u64> {
        self.complete.map(|c| {
            if c.tsc_sc_time > 0 {
                c.tsc_sc_time
            } else {
                c.tsc_timestamp.saturating_sub(self.submit.tsc_timestamp)
            }
        })
    }
}

/// Result of pairing a log
#[derive(Debug, Default)]
pub struct Pairing {
    /// One entry per submit record, in log order
    pub pairs: Vec<RecordPair>,
    /// Complete records with no earlier submit for their command id
    pub orphan_completions: usize,
}

/// Pair every submit with the next complete carrying the same command id
#[must_use]
pub fn pair_records(records: &[BinRecord]) -> Pairing {
    let mut pairing = Pairing::default();
    // cid -> indexes into pairing.pairs still waiting for a completion
    let mut waiting: HashMap<u16, VecDeque<usize>> = HashMap::new();

    for (index, record) in records.iter().enumerate() {
        match record.kind() {
            RecordKind::Submit => {
                waiting.entry(record.cid).or_default().push_back(pairing.pairs.len());
                pairing.pairs.push(RecordPair { index, submit: *record, complete: None });
            }
            RecordKind::Complete => {
                match waiting.get_mut(&record.cid).and_then(VecDeque::pop_front) {
                    Some(slot) => pairing.pairs[slot].complete = Some(*record),
                    None => pairing.orphan_completions += 1,
                }
            }
            RecordKind::Other => {}
        }
    }
    pairing
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvtrace_common::{TpointName, TPOINT_NVME_IO_COMPLETE, TPOINT_NVME_IO_SUBMIT};

    fn submit(cid: u16, ts: u64) -> BinRecord {
        BinRecord {
            tpoint_name: TpointName::new(TPOINT_NVME_IO_SUBMIT).unwrap(),
            cid,
            tsc_timestamp: ts,
            ..Default::default()
        }
    }

    fn complete(cid: u16, ts: u64, cpl: u32, sc_time: u64) -> BinRecord {
        BinRecord {
            tpoint_name: TpointName::new(TPOINT_NVME_IO_COMPLETE).unwrap(),
            cid,
            cpl,
            tsc_timestamp: ts,
            tsc_sc_time: sc_time,
            ..Default::default()
        }
    }

    #[test]
    fn test_pairs_by_command_id() {
        let records = [submit(1, 0), submit(2, 5), complete(2, 9, 0, 4), complete(1, 12, 0x1B9, 12)];
        let pairing = pair_records(&records);

        assert_eq!(pairing.pairs.len(), 2);
        assert_eq!(pairing.orphan_completions, 0);
        assert_eq!(pairing.pairs[0].index, 0);
        assert_eq!(pairing.pairs[0].recorded_status(), Some(CompletionStatus::ZONE_IS_FULL));
        assert_eq!(pairing.pairs[0].recorded_latency(), Some(12));
        assert_eq!(pairing.pairs[1].recorded_status(), Some(CompletionStatus::SUCCESS));
        assert_eq!(pairing.pairs[1].recorded_latency(), Some(4));
    }

    #[test]
    fn test_reused_command_id_pairs_in_order() {
        let records = [submit(7, 0), complete(7, 3, 0, 0), submit(7, 10), complete(7, 18, 0, 0)];
        let pairing = pair_records(&records);
        assert_eq!(pairing.pairs[0].recorded_latency(), Some(3));
        assert_eq!(pairing.pairs[1].recorded_latency(), Some(8));
    }

    #[test]
    fn test_unmatched_records() {
        let records = [complete(3, 1, 0, 0), submit(4, 2), BinRecord::default()];
        let pairing = pair_records(&records);
        assert_eq!(pairing.orphan_completions, 1);
        assert_eq!(pairing.pairs.len(), 1);
        assert_eq!(pairing.pairs[0].complete, None);
        assert_eq!(pairing.pairs[0].recorded_status(), None);
    }
}
