//! # Shared Data Structures (capture ↔ replay)
//!
//! Defines the on-disk record written by `nvtrace record` and read back by
//! `nvtrace replay`, plus the NVMe and ZNS protocol constants both halves
//! agree on. The record is `#[repr(C)]` with explicit padding so the in-memory
//! layout and the file layout are the same 112 bytes on every target, and the
//! byte encoding is done field by field in little-endian order so neither side
//! depends on struct packing rules.
//!
//! ## Key Types
//!
//! - [`BinRecord`] - One captured submit or complete event
//! - [`TpointName`] - Bounded, NUL-padded tracepoint name
//! - [`RecordKind`] - Which field group of a record is meaningful
//!
//! ## Record Layout
//!
//! ```text
//! off  size  field
//!   0     4  lcore
//!   4     4  (padding)
//!   8     8  tsc_rate
//!  16     8  tsc_timestamp   relative to first accepted event
//!  24     8  obj_id
//!  32     4  obj_idx
//!  36     4  (padding)
//!  40     8  tsc_sc_time     submit-to-complete latency
//!  48    32  tpoint_name     NUL padded
//!  80     2  opc
//!  82     2  cid
//!  84     4  nsid
//!  88     4  cpl
//!  92    16  cdw10..cdw13
//! 108     4  (padding)
//! ```

#![no_std]

pub mod zns;

use core::fmt;

// ============================================================================
// Tracepoints
// ============================================================================

/// Tracepoint fired when an I/O command is written to a submission queue
pub const TPOINT_NVME_IO_SUBMIT: &str = "NVME_IO_SUBMIT";

/// Tracepoint fired when an I/O command's completion is reaped
pub const TPOINT_NVME_IO_COMPLETE: &str = "NVME_IO_COMPLETE";

/// Object type value for tracepoints that carry no correlated object
pub const OBJECT_NONE: u8 = 0;

/// Highest lane index a trace can carry. `--lcore` values above it are rejected.
pub const MAX_LCORE: u32 = 128;

/// Width of the embedded tracepoint name, including the terminating NUL
pub const TPOINT_NAME_LEN: usize = 32;

/// Size of one encoded [`BinRecord`]
pub const RECORD_SIZE: usize = 112;

/// Masks applied when narrowing 64-bit trace arguments
pub const UINT8BIT_MASK: u64 = 0xFF;
pub const UINT16BIT_MASK: u64 = 0xFFFF;
pub const UINT32BIT_MASK: u64 = 0xFFFF_FFFF;

// ============================================================================
// NVM Command Set Opcodes
// ============================================================================

pub mod opcode {
    pub const FLUSH: u8 = 0x00;
    pub const WRITE: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_UNCORRECTABLE: u8 = 0x04;
    pub const COMPARE: u8 = 0x05;
    pub const WRITE_ZEROES: u8 = 0x08;
    pub const DATASET_MANAGEMENT: u8 = 0x09;
    pub const VERIFY: u8 = 0x0c;
    pub const COPY: u8 = 0x19;

    // Zoned Namespace command set
    pub const ZONE_MGMT_SEND: u8 = 0x79;
    pub const ZONE_MGMT_RECV: u8 = 0x7a;
    pub const ZONE_APPEND: u8 = 0x7d;

    // Admin
    pub const ADMIN_IDENTIFY: u8 = 0x06;

    /// Whether a recorded opcode can be re-issued on an I/O queue.
    #[must_use]
    pub fn is_replayable(opc: u8) -> bool {
        matches!(
            opc,
            FLUSH
                | WRITE
                | READ
                | WRITE_UNCORRECTABLE
                | COMPARE
                | WRITE_ZEROES
                | DATASET_MANAGEMENT
                | VERIFY
                | ZONE_MGMT_SEND
                | ZONE_MGMT_RECV
                | ZONE_APPEND
        )
    }

    /// Whether the opcode moves `NLB + 1` logical blocks through a data buffer.
    #[must_use]
    pub fn transfers_blocks(opc: u8) -> bool {
        matches!(opc, WRITE | READ | COMPARE | ZONE_APPEND)
    }
}

// ============================================================================
// Tracepoint Name
// ============================================================================

/// Tracepoint name that fits the fixed record field.
///
/// At most `TPOINT_NAME_LEN - 1` bytes so the stored field always keeps a
/// terminating NUL.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TpointName([u8; TPOINT_NAME_LEN]);

/// Returned when a tracepoint name does not fit [`TpointName`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameTooLong {
    pub len: usize,
}

impl fmt::Display for NameTooLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tracepoint name is {} bytes, limit is {}",
            self.len,
            TPOINT_NAME_LEN - 1
        )
    }
}

impl core::error::Error for NameTooLong {}

impl TpointName {
    /// Validate and copy `name` into a NUL-padded field.
    ///
    /// # Errors
    /// Returns [`NameTooLong`] if `name` has `TPOINT_NAME_LEN` bytes or more.
    pub fn new(name: &str) -> Result<Self, NameTooLong> {
        let bytes = name.as_bytes();
        if bytes.len() >= TPOINT_NAME_LEN {
            return Err(NameTooLong { len: bytes.len() });
        }
        let mut raw = [0u8; TPOINT_NAME_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Wrap a raw field read from disk. Bytes after the first NUL are ignored.
    #[must_use]
    pub const fn from_raw(raw: [u8; TPOINT_NAME_LEN]) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(&self) -> &[u8; TPOINT_NAME_LEN] {
        &self.0
    }

    /// Name up to the first NUL. Invalid UTF-8 yields `"<invalid>"`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(TPOINT_NAME_LEN);
        core::str::from_utf8(&self.0[..end]).unwrap_or("<invalid>")
    }
}

impl Default for TpointName {
    fn default() -> Self {
        Self([0; TPOINT_NAME_LEN])
    }
}

impl fmt::Debug for TpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for TpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Binary Record
// ============================================================================

/// Which field group of a [`BinRecord`] carries data.
///
/// Derived from the tracepoint name; the record itself has no tag field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// `opc`, `cid`, `nsid` and `cdw10..cdw13` are populated
    Submit,
    /// `cid` and `cpl` are populated
    Complete,
    /// Only the common fields are populated
    Other,
}

/// One captured trace event, as persisted in the binary log.
///
/// Created once at encode time and never modified afterwards.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinRecord {
    /// Execution lane (lcore) that recorded the event
    pub lcore: u32,

    #[allow(clippy::pub_underscore_fields)]
    pub _pad0: u32,

    /// Ticks per second of the timestamp domain. Constant for a capture.
    pub tsc_rate: u64,

    /// Ticks since the first accepted event of the capture
    pub tsc_timestamp: u64,

    /// Correlated object id (the request the event belongs to)
    pub obj_id: u64,

    /// Per-object-type sequence index, 0 if none was assigned
    pub obj_idx: u32,

    #[allow(clippy::pub_underscore_fields)]
    pub _pad1: u32,

    /// Ticks between the object's first event and this one.
    ///
    /// 0 for events that open an object or carry no object.
    pub tsc_sc_time: u64,

    pub tpoint_name: TpointName,

    // Submit side
    pub opc: u16,
    pub cid: u16,
    pub nsid: u32,

    // Complete side
    pub cpl: u32,

    // Submit side, command specific
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,

    #[allow(clippy::pub_underscore_fields)]
    pub _pad2: u32,
}

const _: () = assert!(core::mem::size_of::<BinRecord>() == RECORD_SIZE);

impl BinRecord {
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self.tpoint_name.as_str() {
            TPOINT_NVME_IO_SUBMIT => RecordKind::Submit,
            TPOINT_NVME_IO_COMPLETE => RecordKind::Complete,
            _ => RecordKind::Other,
        }
    }

    /// Starting LBA of a read/write style command (`cdw11:cdw10`)
    #[must_use]
    pub fn slba(&self) -> u64 {
        (u64::from(self.cdw11) << 32) | u64::from(self.cdw10)
    }

    /// Zero-based block count of a read/write style command (`cdw12[15:0]`)
    #[must_use]
    pub fn nlb(&self) -> u16 {
        (self.cdw12 & 0xFFFF) as u16
    }

    /// Encode into the on-disk layout
    #[must_use]
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        let mut w = Cursor { buf: &mut out, pos: 0 };
        w.put(&self.lcore.to_le_bytes());
        w.put(&self._pad0.to_le_bytes());
        w.put(&self.tsc_rate.to_le_bytes());
        w.put(&self.tsc_timestamp.to_le_bytes());
        w.put(&self.obj_id.to_le_bytes());
        w.put(&self.obj_idx.to_le_bytes());
        w.put(&self._pad1.to_le_bytes());
        w.put(&self.tsc_sc_time.to_le_bytes());
        w.put(self.tpoint_name.as_raw());
        w.put(&self.opc.to_le_bytes());
        w.put(&self.cid.to_le_bytes());
        w.put(&self.nsid.to_le_bytes());
        w.put(&self.cpl.to_le_bytes());
        w.put(&self.cdw10.to_le_bytes());
        w.put(&self.cdw11.to_le_bytes());
        w.put(&self.cdw12.to_le_bytes());
        w.put(&self.cdw13.to_le_bytes());
        w.put(&self._pad2.to_le_bytes());
        debug_assert_eq!(w.pos, RECORD_SIZE);
        out
    }

    /// Decode from the on-disk layout
    #[must_use]
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut r = Reader { buf: bytes, pos: 0 };
        Self {
            lcore: u32::from_le_bytes(r.take()),
            _pad0: u32::from_le_bytes(r.take()),
            tsc_rate: u64::from_le_bytes(r.take()),
            tsc_timestamp: u64::from_le_bytes(r.take()),
            obj_id: u64::from_le_bytes(r.take()),
            obj_idx: u32::from_le_bytes(r.take()),
            _pad1: u32::from_le_bytes(r.take()),
            tsc_sc_time: u64::from_le_bytes(r.take()),
            tpoint_name: TpointName::from_raw(r.take()),
            opc: u16::from_le_bytes(r.take()),
            cid: u16::from_le_bytes(r.take()),
            nsid: u32::from_le_bytes(r.take()),
            cpl: u32::from_le_bytes(r.take()),
            cdw10: u32::from_le_bytes(r.take()),
            cdw11: u32::from_le_bytes(r.take()),
            cdw12: u32::from_le_bytes(r.take()),
            cdw13: u32::from_le_bytes(r.take()),
            _pad2: u32::from_le_bytes(r.take()),
        }
    }
}

struct Cursor<'a> {
    buf: &'a mut [u8; RECORD_SIZE],
    pos: usize,
}

impl Cursor<'_> {
    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }
}

struct Reader<'a> {
    buf: &'a [u8; RECORD_SIZE],
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size_matches_layout() {
        assert_eq!(core::mem::size_of::<BinRecord>(), RECORD_SIZE);
        assert_eq!(core::mem::align_of::<BinRecord>(), 8);
    }

    #[test]
    fn test_field_offsets() {
        let record = BinRecord {
            lcore: 0x0102_0304,
            tsc_rate: 0x1111_1111_1111_1111,
            obj_id: 0x2222_2222_2222_2222,
            obj_idx: 0x3333_3333,
            tpoint_name: TpointName::new(TPOINT_NVME_IO_SUBMIT).unwrap(),
            opc: 0x0001,
            cid: 0x0005,
            cdw13: 0xAABB_CCDD,
            ..Default::default()
        };
        let bytes = record.to_bytes();

        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[8..16], &[0x11; 8]);
        assert_eq!(&bytes[24..32], &[0x22; 8]);
        assert_eq!(&bytes[32..36], &[0x33; 4]);
        assert_eq!(&bytes[48..62], b"NVME_IO_SUBMIT");
        assert_eq!(bytes[62], 0);
        assert_eq!(&bytes[80..84], &[0x01, 0x00, 0x05, 0x00]);
        assert_eq!(&bytes[104..108], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(&bytes[108..112], &[0; 4]);
    }

    #[test]
    fn test_decode_restores_record() {
        let record = BinRecord {
            lcore: 3,
            tsc_rate: 2_100_000_000,
            tsc_timestamp: 4200,
            obj_id: 77,
            obj_idx: 9,
            tsc_sc_time: 1234,
            tpoint_name: TpointName::new(TPOINT_NVME_IO_COMPLETE).unwrap(),
            cid: 5,
            cpl: 0x0001_0000,
            ..Default::default()
        };
        assert_eq!(BinRecord::from_bytes(&record.to_bytes()), record);
    }

    #[test]
    fn test_kind_follows_tpoint_name() {
        let mut record = BinRecord::default();
        assert_eq!(record.kind(), RecordKind::Other);
        record.tpoint_name = TpointName::new(TPOINT_NVME_IO_SUBMIT).unwrap();
        assert_eq!(record.kind(), RecordKind::Submit);
        record.tpoint_name = TpointName::new(TPOINT_NVME_IO_COMPLETE).unwrap();
        assert_eq!(record.kind(), RecordKind::Complete);
    }

    #[test]
    fn test_tpoint_name_bounds() {
        assert!(TpointName::new("A_NAME_THAT_IS_EXACTLY_31_BYTES").is_ok());
        let err = TpointName::new("A_NAME_THAT_IS_EXACTLY_32_BYTES!").unwrap_err();
        assert_eq!(err.len, 32);
    }

    #[test]
    fn test_slba_and_nlb() {
        let record = BinRecord { cdw10: 0x10, cdw11: 0x1, cdw12: 0x8000_0007, ..Default::default() };
        assert_eq!(record.slba(), 0x1_0000_0010);
        assert_eq!(record.nlb(), 7);
    }
}
