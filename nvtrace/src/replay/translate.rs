//! Recorded submit → live command
//!
//! Only submit records of known NVM and ZNS I/O opcodes are re-issued. The
//! recorded command dwords are kept as they are and the command is aimed at
//! the replay target namespace.

use std::fmt;

use nvtrace_common::{opcode, BinRecord, RecordKind};

use crate::device::{NamespaceInfo, NvmeCommand};

/// A command ready to submit, with its data buffer size (0 = no data)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayCommand {
    pub cmd: NvmeCommand,
    pub data_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotSubmit,
    UnsupportedOpcode(u8),
    OutOfRange,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotSubmit => f.write_str("not a submit record"),
            SkipReason::UnsupportedOpcode(opc) => write!(f, "opcode {opc:#04x} is not replayed"),
            SkipReason::OutOfRange => f.write_str("LBA range outside the target namespace"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    Issue(ReplayCommand),
    Skip(SkipReason),
}

/// Translate one record for replay on `ns`
#[must_use]
pub fn translate(record: &BinRecord, ns: &NamespaceInfo) -> Translation {
    if record.kind() != RecordKind::Submit {
        return Translation::Skip(SkipReason::NotSubmit);
    }
    let Ok(opc) = u8::try_from(record.opc) else {
        return Translation::Skip(SkipReason::UnsupportedOpcode(0xFF));
    };
    if !opcode::is_replayable(opc) {
        return Translation::Skip(SkipReason::UnsupportedOpcode(opc));
    }

    let cmd = NvmeCommand::io(opc, ns.id, [record.cdw10, record.cdw11, record.cdw12, record.cdw13]);

    let data_len = if opcode::transfers_blocks(opc) {
        let blocks = u64::from(cmd.block_count());
        let end = cmd.slba().0.checked_add(blocks);
        if end.map_or(true, |end| end > ns.num_sectors) {
            return Translation::Skip(SkipReason::OutOfRange);
        }
        usize::try_from(blocks * u64::from(ns.sector_size)).unwrap_or(usize::MAX)
    } else if opc == opcode::ZONE_MGMT_RECV {
        cmd.report_len()
    } else {
        0
    };

    Translation::Issue(ReplayCommand { cmd, data_len })
}
