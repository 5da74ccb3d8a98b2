//! Trace event → [`BinRecord`] mapping
//!
//! Submit events carry `opc`, `cid`, `nsid` and `cdw10..cdw13`; complete
//! events carry `cid` and `cpl`. Arguments are matched by the names the
//! tracepoint descriptor declares, starting after the queue discriminator in
//! position 0. Anything else only gets the common fields.

use nvtrace_common::{
    BinRecord, TpointName, TPOINT_NVME_IO_COMPLETE, TPOINT_NVME_IO_SUBMIT, UINT16BIT_MASK,
    UINT32BIT_MASK, UINT8BIT_MASK,
};

use super::source::{TpointDescriptor, TraceEvent};
use crate::domain::TraceError;

/// Builds binary records for one capture session
#[derive(Debug, Clone, Copy)]
pub struct TraceRecordEncoder {
    tsc_rate: u64,
}

#[allow(clippy::cast_possible_truncation)]
fn narrow32(v: u64) -> u32 {
    (v & UINT32BIT_MASK) as u32
}

#[allow(clippy::cast_possible_truncation)]
fn narrow16(v: u64) -> u16 {
    (v & UINT16BIT_MASK) as u16
}

impl TraceRecordEncoder {
    #[must_use]
    pub fn new(tsc_rate: u64) -> Self {
        Self { tsc_rate }
    }

    /// Encode one accepted event; `origin` is the capture's first timestamp.
    ///
    /// # Errors
    /// Returns [`TraceError::NameTooLong`] if the tracepoint name does not fit.
    pub fn encode(
        &self,
        event: &TraceEvent,
        tpoint: &TpointDescriptor,
        origin: u64,
    ) -> Result<BinRecord, TraceError> {
        let tpoint_name = TpointName::new(&tpoint.name).map_err(|source| {
            TraceError::NameTooLong { name: tpoint.name.clone(), source }
        })?;

        let tsc_sc_time = if tpoint.tracks_latency() {
            event.object_start.map_or(0, |start| event.tsc.saturating_sub(start))
        } else {
            0
        };

        let mut record = BinRecord {
            lcore: event.lcore.0,
            tsc_rate: self.tsc_rate,
            tsc_timestamp: event.tsc.saturating_sub(origin),
            obj_id: event.object_id,
            obj_idx: event.object_index.map_or(0, narrow32),
            tsc_sc_time,
            tpoint_name,
            ..BinRecord::default()
        };

        let named_args = tpoint
            .args
            .iter()
            .zip(&event.args)
            .skip(1)
            .filter_map(|(name, value)| value.as_int().map(|v| (name.as_str(), v)));

        match tpoint.name.as_str() {
            TPOINT_NVME_IO_SUBMIT => {
                for (name, v) in named_args {
                    match name {
                        "opc" => record.opc = narrow16(v & UINT8BIT_MASK),
                        "cid" => record.cid = narrow16(v),
                        "nsid" => record.nsid = narrow32(v),
                        "cdw10" => record.cdw10 = narrow32(v),
                        "cdw11" => record.cdw11 = narrow32(v),
                        "cdw12" => record.cdw12 = narrow32(v),
                        "cdw13" => record.cdw13 = narrow32(v),
                        _ => {}
                    }
                }
            }
            TPOINT_NVME_IO_COMPLETE => {
                for (name, v) in named_args {
                    match name {
                        "cid" => record.cid = narrow16(v),
                        "cpl" => record.cpl = narrow32(v),
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        Ok(record)
    }
}
