//! Human-readable record dump

use std::io::Write;

use nvtrace_common::BinRecord;

use crate::domain::LogError;

/// One dump line for record `index` (no trailing newline)
#[must_use]
pub fn format_record(index: u64, r: &BinRecord) -> String {
    format!(
        "entry: {index}  lcore: {}  tsc_rate: {}  tsc_timestamp: {}  obj_idx: {}  obj_id: {}  \
         tsc_sc_time: {}  tpoint_name: {}  opc: {}  cid: {}  nsid: {}  cpl: {}  \
         cdw10: {}  cdw11: {}  cdw12: {}  cdw13: {}",
        r.lcore,
        r.tsc_rate,
        r.tsc_timestamp,
        r.obj_idx,
        r.obj_id,
        r.tsc_sc_time,
        r.tpoint_name,
        r.opc,
        r.cid,
        r.nsid,
        r.cpl,
        r.cdw10,
        r.cdw11,
        r.cdw12,
        r.cdw13,
    )
}

/// Write one line per record to `out`, returning the number of records dumped
///
/// # Errors
/// Returns the first record read error or a write failure on `out`.
pub fn dump_records<I, W>(records: I, out: &mut W) -> Result<u64, LogError>
where
    I: IntoIterator<Item = Result<BinRecord, LogError>>,
    W: Write,
{
    let mut n = 0;
    for record in records {
        writeln!(out, "{}", format_record(n, &record?))?;
        n += 1;
    }
    Ok(n)
}
