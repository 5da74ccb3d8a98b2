//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep lane indexes, command ids, namespace ids and
//! LBAs from being mixed up in function signatures.

use std::fmt;

/// Execution lane (lcore) index from the trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneId(pub u32);

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lcore:{}", self.0)
    }
}

/// NVMe command identifier, unique per submission queue while in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(pub u16);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CID:{}", self.0)
    }
}

/// NVMe namespace identifier (starts at 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceId(pub u32);

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NSID:{}", self.0)
    }
}

/// Logical block address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lba(pub u64);

impl fmt::Display for Lba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        assert_eq!(LaneId(3).to_string(), "lcore:3");
        assert_eq!(CommandId(5).to_string(), "CID:5");
        assert_eq!(NamespaceId(1).to_string(), "NSID:1");
        assert_eq!(Lba(0x80000).to_string(), "0x0000000000080000");
    }
}
