//! Zoned Namespace wire constants
//!
//! Byte layout of the Zone Management Receive data structure:
//!
//! ```text
//! report header (64 bytes)
//!   0   8  nr_zones
//!   8  56  reserved
//! zone descriptor (64 bytes), repeated
//!   0   1  zt   bits 3:0 zone type
//!   1   1  zs   bits 7:4 zone state
//!   2   1  za   bit0 zfc, bit1 fzr, bit2 rzr, bit7 zdev
//!   3   5  reserved
//!   8   8  zcap
//!  16   8  zslba
//!  24   8  wp
//!  32  32  reserved
//! [zone descriptor extension, zdes bytes]  only in extended reports
//! ```

/// Size of the report header that precedes the descriptors
pub const ZONE_REPORT_HEADER_SIZE: usize = 64;

/// Size of one zone descriptor, excluding any extension
pub const ZONE_DESCRIPTOR_SIZE: usize = 64;

/// `zdes` in Identify Namespace is expressed in 64-byte units
pub const ZDES_UNIT: usize = 64;

// Zone types
pub const ZONE_TYPE_SEQWR: u8 = 0x2;

// Zone states
pub const ZONE_STATE_EMPTY: u8 = 0x1;
pub const ZONE_STATE_IOPEN: u8 = 0x2;
pub const ZONE_STATE_EOPEN: u8 = 0x3;
pub const ZONE_STATE_CLOSED: u8 = 0x4;
pub const ZONE_STATE_RONLY: u8 = 0xD;
pub const ZONE_STATE_FULL: u8 = 0xE;
pub const ZONE_STATE_OFFLINE: u8 = 0xF;

// Zone attribute bits
pub const ZA_ZFC: u8 = 1 << 0;
pub const ZA_FZR: u8 = 1 << 1;
pub const ZA_RZR: u8 = 1 << 2;
pub const ZA_ZDEV: u8 = 1 << 7;

// Zone Send Action (cdw13 bits 7:0 of Zone Management Send)
pub const ZSA_CLOSE: u8 = 0x1;
pub const ZSA_FINISH: u8 = 0x2;
pub const ZSA_OPEN: u8 = 0x3;
pub const ZSA_RESET: u8 = 0x4;
pub const ZSA_OFFLINE: u8 = 0x5;
pub const ZSA_SET_ZDE: u8 = 0x10;

// Zone Receive Action (cdw13 bits 7:0 of Zone Management Receive)
pub const ZRA_REPORT: u8 = 0x0;
pub const ZRA_EXTENDED_REPORT: u8 = 0x1;

// Zone Receive Action Specific Field (cdw13 bits 15:8)
pub const ZRASF_LIST_ALL: u8 = 0x0;

/// cdw13 bit 16: `nr_zones` counts only the descriptors returned in this buffer
pub const ZRA_PARTIAL_REPORT: u32 = 1 << 16;

/// Byte offset of descriptor `index` in a report buffer.
///
/// `zdes` is the extension size in bytes (0 for plain reports).
#[must_use]
pub const fn descriptor_offset(index: usize, zdes: usize) -> usize {
    ZONE_REPORT_HEADER_SIZE + index * (ZONE_DESCRIPTOR_SIZE + zdes)
}

/// How many descriptors fit in a report buffer of `buf_len` bytes.
#[must_use]
pub const fn zones_per_buffer(buf_len: usize, zdes: usize) -> usize {
    if buf_len < ZONE_REPORT_HEADER_SIZE {
        return 0;
    }
    (buf_len - ZONE_REPORT_HEADER_SIZE) / (ZONE_DESCRIPTOR_SIZE + zdes)
}
