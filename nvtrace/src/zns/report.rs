//! Zone report wire format
//!
//! A report is a 64-byte header (`nr_zones` as little-endian u64, then
//! reserved bytes) followed by 64-byte zone descriptors, each trailed by a
//! `zdes`-byte extension when the namespace format declares one:
//!
//! ```text
//! byte  0      zone type   (bits 3:0)
//! byte  1      zone state  (bits 7:4)
//! byte  2      attributes  (bit 0 ZFC, 1 FZR, 2 RZR, 7 ZDEV)
//! bytes 8..16  zone capacity
//! bytes 16..24 zone start LBA
//! bytes 24..32 write pointer
//! ```

use std::fmt;

use nvtrace_common::zns::{
    descriptor_offset, zones_per_buffer, ZA_FZR, ZA_RZR, ZA_ZDEV, ZA_ZFC, ZONE_DESCRIPTOR_SIZE,
    ZONE_REPORT_HEADER_SIZE, ZONE_STATE_CLOSED, ZONE_STATE_EMPTY, ZONE_STATE_EOPEN,
    ZONE_STATE_FULL, ZONE_STATE_IOPEN, ZONE_STATE_OFFLINE, ZONE_STATE_RONLY, ZONE_TYPE_SEQWR,
};

use crate::domain::{Lba, ZoneError};

const ZT_MASK: u8 = 0x0F;
const ZS_SHIFT: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneType {
    SequentialWriteRequired,
    Reserved(u8),
}

impl ZoneType {
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            ZONE_TYPE_SEQWR => ZoneType::SequentialWriteRequired,
            other => ZoneType::Reserved(other),
        }
    }

    #[must_use]
    pub fn raw(self) -> u8 {
        match self {
            ZoneType::SequentialWriteRequired => ZONE_TYPE_SEQWR,
            ZoneType::Reserved(raw) => raw,
        }
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneType::SequentialWriteRequired => f.write_str("Sequential Write Required"),
            ZoneType::Reserved(_) => f.write_str("Reserved"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneState {
    Empty,
    ImplicitOpen,
    ExplicitOpen,
    Closed,
    ReadOnly,
    Full,
    Offline,
    /// Undefined codes, kept for forward compatibility
    Reserved(u8),
}

impl ZoneState {
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            ZONE_STATE_EMPTY => ZoneState::Empty,
            ZONE_STATE_IOPEN => ZoneState::ImplicitOpen,
            ZONE_STATE_EOPEN => ZoneState::ExplicitOpen,
            ZONE_STATE_CLOSED => ZoneState::Closed,
            ZONE_STATE_RONLY => ZoneState::ReadOnly,
            ZONE_STATE_FULL => ZoneState::Full,
            ZONE_STATE_OFFLINE => ZoneState::Offline,
            other => ZoneState::Reserved(other),
        }
    }

    #[must_use]
    pub fn raw(self) -> u8 {
        match self {
            ZoneState::Empty => ZONE_STATE_EMPTY,
            ZoneState::ImplicitOpen => ZONE_STATE_IOPEN,
            ZoneState::ExplicitOpen => ZONE_STATE_EOPEN,
            ZoneState::Closed => ZONE_STATE_CLOSED,
            ZoneState::ReadOnly => ZONE_STATE_RONLY,
            ZoneState::Full => ZONE_STATE_FULL,
            ZoneState::Offline => ZONE_STATE_OFFLINE,
            ZoneState::Reserved(raw) => raw,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ZoneState::Empty => "Empty",
            ZoneState::ImplicitOpen => "Implicit Open",
            ZoneState::ExplicitOpen => "Explicit Open",
            ZoneState::Closed => "Closed",
            ZoneState::ReadOnly => "Read Only",
            ZoneState::Full => "Full",
            ZoneState::Offline => "Offline",
            ZoneState::Reserved(_) => "Reserved",
        }
    }
}

impl fmt::Display for ZoneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Zone attribute flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZoneAttributes(pub u8);

impl ZoneAttributes {
    /// Zone finished by controller
    #[must_use]
    pub fn finished_by_controller(self) -> bool {
        self.0 & ZA_ZFC != 0
    }

    #[must_use]
    pub fn finish_recommended(self) -> bool {
        self.0 & ZA_FZR != 0
    }

    #[must_use]
    pub fn reset_recommended(self) -> bool {
        self.0 & ZA_RZR != 0
    }

    /// Descriptor extension valid
    #[must_use]
    pub fn extension_valid(self) -> bool {
        self.0 & ZA_ZDEV != 0
    }
}

/// One decoded zone descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneDescriptor {
    pub zone_type: ZoneType,
    pub state: ZoneState,
    pub attrs: ZoneAttributes,
    /// Writable LBAs in the zone
    pub capacity: u64,
    pub start: Lba,
    pub write_pointer: Lba,
    /// Extension words, empty unless the extension-valid flag is set
    pub extension: Vec<u64>,
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

impl ZoneDescriptor {
    /// Decode the descriptor (and extension) that starts at `buf[0]`.
    /// `buf` must hold `ZONE_DESCRIPTOR_SIZE + zdes` bytes.
    fn decode(buf: &[u8], zdes: usize) -> Self {
        let attrs = ZoneAttributes(buf[2]);
        let extension = if attrs.extension_valid() {
            buf[ZONE_DESCRIPTOR_SIZE..ZONE_DESCRIPTOR_SIZE + zdes]
                .chunks_exact(8)
                .map(|w| read_u64(w, 0))
                .collect()
        } else {
            Vec::new()
        };
        Self {
            zone_type: ZoneType::from_raw(buf[0] & ZT_MASK),
            state: ZoneState::from_raw(buf[1] >> ZS_SHIFT),
            attrs,
            capacity: read_u64(buf, 8),
            start: Lba(read_u64(buf, 16)),
            write_pointer: Lba(read_u64(buf, 24)),
            extension,
        }
    }

    /// Write this descriptor (and its extension, if any) to the start of `buf`
    pub(crate) fn encode(&self, buf: &mut [u8], zdes: usize) {
        buf[..ZONE_DESCRIPTOR_SIZE + zdes].fill(0);
        buf[0] = self.zone_type.raw() & ZT_MASK;
        buf[1] = self.state.raw() << ZS_SHIFT;
        buf[2] = self.attrs.0;
        buf[8..16].copy_from_slice(&self.capacity.to_le_bytes());
        buf[16..24].copy_from_slice(&self.start.0.to_le_bytes());
        buf[24..32].copy_from_slice(&self.write_pointer.0.to_le_bytes());
        let ext = &mut buf[ZONE_DESCRIPTOR_SIZE..ZONE_DESCRIPTOR_SIZE + zdes];
        for (slot, word) in ext.chunks_exact_mut(8).zip(&self.extension) {
            slot.copy_from_slice(&word.to_le_bytes());
        }
    }
}

impl fmt::Display for ZoneDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ZSLBA: {} ZCAP: 0x{:016x} WP: {} ZS: {} ZT: {} ZA: 0x{:02x}",
            self.start, self.capacity, self.write_pointer, self.state, self.zone_type, self.attrs.0
        )
    }
}

/// A borrowed report buffer
#[derive(Debug, Clone, Copy)]
pub struct ZoneReport<'a> {
    buf: &'a [u8],
    zdes: usize,
}

impl<'a> ZoneReport<'a> {
    /// # Errors
    /// Returns [`ZoneError::BufferTooShort`] if `buf` cannot hold the header.
    pub fn new(buf: &'a [u8], zdes: usize) -> Result<Self, ZoneError> {
        if buf.len() < ZONE_REPORT_HEADER_SIZE {
            return Err(ZoneError::BufferTooShort { index: 0, len: buf.len() });
        }
        Ok(Self { buf, zdes })
    }

    /// Zone count from the report header
    #[must_use]
    pub fn nr_zones(&self) -> u64 {
        read_u64(self.buf, 0)
    }

    /// Number of descriptors the buffer has room for
    #[must_use]
    pub fn capacity(&self) -> usize {
        zones_per_buffer(self.buf.len(), self.zdes)
    }

    /// Decode descriptor `index`
    ///
    /// # Errors
    /// Returns [`ZoneError::BufferTooShort`] if the descriptor and its
    /// extension extend past the buffer.
    pub fn descriptor(&self, index: usize) -> Result<ZoneDescriptor, ZoneError> {
        let offset = descriptor_offset(index, self.zdes);
        let end = offset + ZONE_DESCRIPTOR_SIZE + self.zdes;
        if end > self.buf.len() {
            return Err(ZoneError::BufferTooShort { index, len: self.buf.len() });
        }
        Ok(ZoneDescriptor::decode(&self.buf[offset..end], self.zdes))
    }

    /// Descriptors reported in this buffer, in index order
    pub fn descriptors(&self) -> impl Iterator<Item = Result<ZoneDescriptor, ZoneError>> + '_ {
        let reported = usize::try_from(self.nr_zones()).unwrap_or(usize::MAX);
        (0..reported.min(self.capacity())).map(|i| self.descriptor(i))
    }
}

/// Fill `buf` with a report of `zones`, truncated to what fits
///
/// Returns the number of descriptors written, which is also stored as the
/// header's zone count.
pub(crate) fn encode_report(buf: &mut [u8], zones: &[ZoneDescriptor], zdes: usize) -> usize {
    let fits = zones.len().min(zones_per_buffer(buf.len(), zdes));
    buf.fill(0);
    buf[..8].copy_from_slice(&(fits as u64).to_le_bytes());
    for (i, zone) in zones.iter().take(fits).enumerate() {
        zone.encode(&mut buf[descriptor_offset(i, zdes)..], zdes);
    }
    fits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(start: u64, state: ZoneState) -> ZoneDescriptor {
        ZoneDescriptor {
            zone_type: ZoneType::SequentialWriteRequired,
            state,
            attrs: ZoneAttributes::default(),
            capacity: 0x4000,
            start: Lba(start),
            write_pointer: Lba(start),
            extension: Vec::new(),
        }
    }

    #[test]
    fn test_state_labels() {
        let labels: Vec<&str> = [0x1, 0x2, 0x3, 0x4, 0xD, 0xE, 0xF]
            .into_iter()
            .map(|raw| ZoneState::from_raw(raw).label())
            .collect();
        assert_eq!(
            labels,
            ["Empty", "Implicit Open", "Explicit Open", "Closed", "Read Only", "Full", "Offline"]
        );
    }

    #[test]
    fn test_undefined_states_are_reserved() {
        for raw in [0x0, 0x5, 0x8, 0xC] {
            let state = ZoneState::from_raw(raw);
            assert_eq!(state, ZoneState::Reserved(raw));
            assert_eq!(state.label(), "Reserved");
        }
    }

    #[test]
    fn test_zone_type() {
        assert_eq!(ZoneType::from_raw(2), ZoneType::SequentialWriteRequired);
        assert_eq!(ZoneType::from_raw(1).to_string(), "Reserved");
    }

    #[test]
    fn test_decode_packed_bytes() {
        let mut buf = vec![0u8; 4096];
        buf[0] = 1;
        let d = ZONE_REPORT_HEADER_SIZE;
        // Reserved nibbles set to make sure they are masked off
        buf[d] = 0xF2;
        buf[d + 1] = 0xE7;
        buf[d + 2] = ZA_ZFC | ZA_RZR;
        buf[d + 8..d + 16].copy_from_slice(&0x100u64.to_le_bytes());
        buf[d + 16..d + 24].copy_from_slice(&0x200u64.to_le_bytes());
        buf[d + 24..d + 32].copy_from_slice(&0x300u64.to_le_bytes());

        let report = ZoneReport::new(&buf, 0).unwrap();
        assert_eq!(report.nr_zones(), 1);
        let zone = report.descriptor(0).unwrap();
        assert_eq!(zone.zone_type, ZoneType::SequentialWriteRequired);
        assert_eq!(zone.state, ZoneState::Full);
        assert!(zone.attrs.finished_by_controller());
        assert!(!zone.attrs.finish_recommended());
        assert!(zone.attrs.reset_recommended());
        assert!(!zone.attrs.extension_valid());
        assert_eq!(zone.capacity, 0x100);
        assert_eq!(zone.start, Lba(0x200));
        assert_eq!(zone.write_pointer, Lba(0x300));
        assert!(zone.extension.is_empty());
    }

    #[test]
    fn test_extension_only_when_valid() {
        let zdes = 64;
        let mut with_ext = zone(0, ZoneState::Closed);
        with_ext.attrs = ZoneAttributes(ZA_ZDEV);
        with_ext.extension = (1..=8).collect();
        let mut without_ext = zone(0x4000, ZoneState::Empty);
        without_ext.extension = Vec::new();

        let mut buf = vec![0u8; 4096];
        encode_report(&mut buf, &[with_ext.clone(), without_ext.clone()], zdes);
        // Poison the second zone's extension area, which must be ignored
        let ext = descriptor_offset(1, zdes) + ZONE_DESCRIPTOR_SIZE;
        buf[ext..ext + zdes].fill(0xFF);

        let report = ZoneReport::new(&buf, zdes).unwrap();
        assert_eq!(report.descriptor(0).unwrap(), with_ext);
        assert_eq!(report.descriptor(1).unwrap(), without_ext);
    }

    #[test]
    fn test_descriptors_in_index_order() {
        let zones = [
            zone(0, ZoneState::Empty),
            zone(0x4000, ZoneState::Full),
            zone(0x8000, ZoneState::Offline),
        ];
        let mut buf = vec![0u8; 4096];
        assert_eq!(encode_report(&mut buf, &zones, 0), 3);

        let report = ZoneReport::new(&buf, 0).unwrap();
        let labels: Vec<&str> =
            report.descriptors().map(|z| z.unwrap().state.label()).collect();
        assert_eq!(labels, ["Empty", "Full", "Offline"]);
    }

    #[test]
    fn test_encode_truncates_to_buffer() {
        let zones: Vec<ZoneDescriptor> = (0..100).map(|i| zone(i * 0x4000, ZoneState::Empty)).collect();
        let mut buf = vec![0u8; 4096];
        assert_eq!(encode_report(&mut buf, &zones, 64), 31);
        assert_eq!(ZoneReport::new(&buf, 64).unwrap().nr_zones(), 31);
    }

    #[test]
    fn test_short_buffers() {
        assert!(matches!(
            ZoneReport::new(&[0u8; 32], 0),
            Err(ZoneError::BufferTooShort { index: 0, len: 32 })
        ));
        let buf = [0u8; 128];
        let report = ZoneReport::new(&buf, 0).unwrap();
        assert!(report.descriptor(0).is_ok());
        assert!(matches!(report.descriptor(1), Err(ZoneError::BufferTooShort { index: 1, .. })));
    }

    #[test]
    fn test_display() {
        let line = zone(0x4000, ZoneState::Empty).to_string();
        assert_eq!(
            line,
            "ZSLBA: 0x0000000000004000 ZCAP: 0x0000000000004000 WP: 0x0000000000004000 \
             ZS: Empty ZT: Sequential Write Required ZA: 0x00"
        );
    }
}
