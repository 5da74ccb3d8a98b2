//! NVMe device session abstraction
//!
//! The replay engine and the zone report session talk to a device only
//! through [`DeviceSession`] and [`QueuePair`]. The session is created once by
//! the composition root and passed by reference; there is no global
//! controller or namespace registry.
//!
//! Completions are delivered over a `crossbeam_channel` sender handed to
//! [`QueuePair::submit`]. Nothing is delivered until the caller polls with
//! [`QueuePair::process_completions`]; [`CompletionWaiter`] wraps that loop.

pub mod dma;
pub mod emulated;
pub mod passthru;

mod command;
mod status;
mod waiter;

pub use command::NvmeCommand;
pub use dma::{alloc_dma_buffer, BufferOrigin, DmaBuffer, DMA_ALIGN, DMA_BUFFER_SIZE};
pub use emulated::{EmulatedConfig, EmulatedSession};
pub use passthru::PassthruSession;
pub use status::CompletionStatus;
pub use waiter::CompletionWaiter;

use crossbeam_channel::Sender;

use crate::domain::{CommandId, DeviceError, NamespaceId};

/// An attached controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    /// Transport address or kernel name (e.g. `nvme0`)
    pub name: String,
    pub model: String,
    pub serial: String,
}

impl ControllerInfo {
    /// `model (serial)`, padded the way the attach banner prints it
    #[must_use]
    pub fn label(&self) -> String {
        format!("{:<20.20} ({:<20.20})", self.model, self.serial)
    }
}

/// Zone geometry of a zoned namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneGeometry {
    /// Zone size in logical blocks
    pub zone_size: u64,
    pub num_zones: u64,
    /// Descriptor extension size in bytes for the active format (0 if none)
    pub zdes: usize,
}

/// An active namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    /// Index into [`DeviceSession::controllers`]
    pub ctrlr: usize,
    pub id: NamespaceId,
    pub sector_size: u32,
    pub num_sectors: u64,
    /// `Some` for zoned namespaces
    pub zoned: Option<ZoneGeometry>,
}

impl NamespaceInfo {
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.num_sectors * u64::from(self.sector_size)
    }

    #[must_use]
    pub fn is_zoned(&self) -> bool {
        self.zoned.is_some()
    }
}

/// A command completion as observed by a poll
#[derive(Debug)]
pub struct Completion {
    pub cid: CommandId,
    pub status: CompletionStatus,
    /// Command specific result (dword 0)
    pub dw0: u32,
    /// The data buffer handed to `submit`, returned to its owner
    pub buffer: Option<DmaBuffer>,
}

/// A submission/completion queue pair
pub trait QueuePair {
    /// Queue `cmd` without blocking. Ownership of `buffer` passes to the
    /// queue pair until the completion is delivered on `done`.
    ///
    /// # Errors
    /// Returns an error if the command cannot be queued.
    fn submit(
        &mut self,
        cmd: NvmeCommand,
        buffer: Option<DmaBuffer>,
        done: &Sender<Completion>,
    ) -> Result<CommandId, DeviceError>;

    /// Make progress: complete up to `max` commands (0 = no limit) and deliver
    /// their completions. Returns the number completed.
    ///
    /// # Errors
    /// Returns an error if the transport itself fails. Command errors are
    /// reported through the completion status instead.
    fn process_completions(&mut self, max: u32) -> Result<u32, DeviceError>;
}

/// An attached set of controllers and their namespaces
pub trait DeviceSession {
    fn controllers(&self) -> &[ControllerInfo];

    fn namespaces(&self) -> &[NamespaceInfo];

    /// Allocate an I/O queue pair on the controller owning `ns`
    ///
    /// # Errors
    /// Returns an error if the controller cannot provide a queue pair.
    fn alloc_io_qpair(&self, ns: &NamespaceInfo) -> Result<Box<dyn QueuePair + '_>, DeviceError>;

    /// Allocate `len` bytes of controller memory, if the controller has a
    /// memory buffer large enough
    fn alloc_controller_buffer(&self, _ns: &NamespaceInfo, _len: usize) -> Option<DmaBuffer> {
        None
    }

    /// Look up an active namespace
    ///
    /// # Errors
    /// Returns [`DeviceError::NamespaceNotFound`] if `id` is not active.
    fn namespace(&self, id: NamespaceId) -> Result<&NamespaceInfo, DeviceError> {
        self.namespaces()
            .iter()
            .find(|ns| ns.id == id)
            .ok_or(DeviceError::NamespaceNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_label_is_padded() {
        let ctrlr = ControllerInfo {
            name: "nvme0".into(),
            model: "ZNS SSD".into(),
            serial: "S123".into(),
        };
        assert_eq!(ctrlr.label(), "ZNS SSD              (S123                )");
    }

    #[test]
    fn test_namespace_size() {
        let ns = NamespaceInfo {
            ctrlr: 0,
            id: NamespaceId(1),
            sector_size: 4096,
            num_sectors: 1024,
            zoned: None,
        };
        assert_eq!(ns.size_bytes(), 4 * 1024 * 1024);
        assert!(!ns.is_zoned());
    }
}
