//! Completion status field

use std::fmt;

/// Status code type and status code of a completion
///
/// Packed as in the Linux passthrough return value and the recorded `cpl`
/// word: status code in bits 7:0, status code type in bits 10:8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompletionStatus {
    pub sct: u8,
    pub sc: u8,
}

impl CompletionStatus {
    pub const SUCCESS: Self = Self::generic(0x00);
    pub const INVALID_OPCODE: Self = Self::generic(0x01);
    pub const INVALID_FIELD: Self = Self::generic(0x02);
    pub const INVALID_NAMESPACE: Self = Self::generic(0x0B);
    pub const LBA_OUT_OF_RANGE: Self = Self::generic(0x80);

    pub const ZONE_BOUNDARY_ERROR: Self = Self::command_specific(0xB8);
    pub const ZONE_IS_FULL: Self = Self::command_specific(0xB9);
    pub const ZONE_IS_READ_ONLY: Self = Self::command_specific(0xBA);
    pub const ZONE_IS_OFFLINE: Self = Self::command_specific(0xBB);
    pub const ZONE_INVALID_WRITE: Self = Self::command_specific(0xBC);
    pub const TOO_MANY_ACTIVE_ZONES: Self = Self::command_specific(0xBD);
    pub const TOO_MANY_OPEN_ZONES: Self = Self::command_specific(0xBE);
    pub const ZONE_INVALID_STATE_TRANSITION: Self = Self::command_specific(0xBF);

    /// Host-side transport failure (path related, internal path error)
    pub const INTERNAL_PATH_ERROR: Self = Self { sct: 0x3, sc: 0x00 };

    const fn generic(sc: u8) -> Self {
        Self { sct: 0x0, sc }
    }

    const fn command_specific(sc: u8) -> Self {
        Self { sct: 0x1, sc }
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_raw(raw: u32) -> Self {
        Self { sct: ((raw >> 8) & 0x7) as u8, sc: (raw & 0xFF) as u8 }
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        ((self.sct as u32) << 8) | self.sc as u32
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        self.sct == 0 && self.sc == 0
    }

    fn description(self) -> &'static str {
        match (self.sct, self.sc) {
            (0x0, 0x00) => "Success",
            (0x0, 0x01) => "Invalid Command Opcode",
            (0x0, 0x02) => "Invalid Field in Command",
            (0x0, 0x0B) => "Invalid Namespace or Format",
            (0x0, 0x80) => "LBA Out of Range",
            (0x1, 0xB8) => "Zone Boundary Error",
            (0x1, 0xB9) => "Zone Is Full",
            (0x1, 0xBA) => "Zone Is Read Only",
            (0x1, 0xBB) => "Zone Is Offline",
            (0x1, 0xBC) => "Zone Invalid Write",
            (0x1, 0xBD) => "Too Many Active Zones",
            (0x1, 0xBE) => "Too Many Open Zones",
            (0x1, 0xBF) => "Invalid Zone State Transition",
            (0x3, 0x00) => "Internal Path Error",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (sct={:#x}, sc={:#04x})", self.description(), self.sct, self.sc)
    }
}
