//! NVMe submission entries

use nvtrace_common::opcode;
use nvtrace_common::zns::{
    ZRASF_LIST_ALL, ZRA_EXTENDED_REPORT, ZRA_PARTIAL_REPORT, ZRA_REPORT, ZSA_RESET,
};

use crate::domain::{Lba, NamespaceId};

/// Command dwords that a submission carries besides the data pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NvmeCommand {
    pub opc: u8,
    pub nsid: u32,
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
}

#[allow(clippy::cast_possible_truncation)]
fn split_lba(slba: Lba) -> (u32, u32) {
    (slba.0 as u32, (slba.0 >> 32) as u32)
}

impl NvmeCommand {
    /// An I/O command with its command specific dwords 10-13
    #[must_use]
    pub fn io(opc: u8, nsid: NamespaceId, cdw: [u32; 4]) -> Self {
        Self {
            opc,
            nsid: nsid.0,
            cdw10: cdw[0],
            cdw11: cdw[1],
            cdw12: cdw[2],
            cdw13: cdw[3],
            ..Self::default()
        }
    }

    /// Zone Management Receive listing all zones from `slba` into a buffer of
    /// `buf_len` bytes. Partial report: the header counts only the zones
    /// that fit.
    #[must_use]
    pub fn zone_report(nsid: NamespaceId, slba: Lba, buf_len: usize, extended: bool) -> Self {
        let (cdw10, cdw11) = split_lba(slba);
        let zra = if extended { ZRA_EXTENDED_REPORT } else { ZRA_REPORT };
        #[allow(clippy::cast_possible_truncation)]
        let numd = (buf_len / 4).saturating_sub(1) as u32;
        Self {
            opc: opcode::ZONE_MGMT_RECV,
            nsid: nsid.0,
            cdw10,
            cdw11,
            cdw12: numd,
            cdw13: u32::from(zra) | (u32::from(ZRASF_LIST_ALL) << 8) | ZRA_PARTIAL_REPORT,
            ..Self::default()
        }
    }

    /// Zone Management Send resetting the zone starting at `slba`
    #[must_use]
    pub fn zone_reset(nsid: NamespaceId, slba: Lba) -> Self {
        let (cdw10, cdw11) = split_lba(slba);
        Self {
            opc: opcode::ZONE_MGMT_SEND,
            nsid: nsid.0,
            cdw10,
            cdw11,
            cdw13: u32::from(ZSA_RESET),
            ..Self::default()
        }
    }

    /// Starting LBA (dwords 10-11)
    #[must_use]
    pub fn slba(&self) -> Lba {
        Lba((u64::from(self.cdw11) << 32) | u64::from(self.cdw10))
    }

    /// Number of logical blocks for block transfer commands (1-based)
    #[must_use]
    pub fn block_count(&self) -> u32 {
        (self.cdw12 & 0xFFFF) + 1
    }

    /// Zone send action for Zone Management Send
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn zone_send_action(&self) -> u8 {
        self.cdw13 as u8
    }

    /// Whether a Zone Management Receive asks for extended descriptors
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn is_extended_report(&self) -> bool {
        (self.cdw13 as u8) == ZRA_EXTENDED_REPORT
    }

    /// Data transfer length in bytes for Zone Management Receive (NUMD is 0-based)
    #[must_use]
    pub fn report_len(&self) -> usize {
        (self.cdw12 as usize + 1) * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_report_dwords() {
        let cmd = NvmeCommand::zone_report(NamespaceId(2), Lba(0x1_0000_0040), 4096, true);
        assert_eq!(cmd.opc, opcode::ZONE_MGMT_RECV);
        assert_eq!(cmd.nsid, 2);
        assert_eq!(cmd.cdw10, 0x40);
        assert_eq!(cmd.cdw11, 0x1);
        assert_eq!(cmd.cdw12, 1023);
        assert_eq!(cmd.report_len(), 4096);
        assert!(cmd.is_extended_report());
        assert_eq!(cmd.cdw13 & ZRA_PARTIAL_REPORT, ZRA_PARTIAL_REPORT);
        assert_eq!(cmd.slba(), Lba(0x1_0000_0040));
    }

    #[test]
    fn test_plain_report_is_not_extended() {
        let cmd = NvmeCommand::zone_report(NamespaceId(1), Lba(0), 4096, false);
        assert!(!cmd.is_extended_report());
    }

    #[test]
    fn test_zone_reset() {
        let cmd = NvmeCommand::zone_reset(NamespaceId(1), Lba(0x8000));
        assert_eq!(cmd.opc, opcode::ZONE_MGMT_SEND);
        assert_eq!(cmd.zone_send_action(), ZSA_RESET);
        assert_eq!(cmd.slba(), Lba(0x8000));
    }

    #[test]
    fn test_io_block_count() {
        let cmd = NvmeCommand::io(opcode::WRITE, NamespaceId(1), [0x10, 0, 7, 0]);
        assert_eq!(cmd.slba(), Lba(0x10));
        assert_eq!(cmd.block_count(), 8);
    }
}
