//! In-memory NVMe device
//!
//! Models one controller with one namespace, either conventional or zoned.
//! Zoned namespaces keep a write pointer and state per zone and follow the
//! sequential-write rules, so replays and zone reports behave the way they
//! do on hardware. No data is stored; reads return zeroes.

use std::cell::RefCell;
use std::collections::VecDeque;

use crossbeam_channel::Sender;
use log::debug;
use nvtrace_common::opcode;
use nvtrace_common::zns::{
    ZONE_STATE_CLOSED, ZONE_STATE_EMPTY, ZONE_STATE_EOPEN, ZONE_STATE_FULL, ZONE_STATE_IOPEN,
    ZONE_STATE_OFFLINE, ZONE_STATE_RONLY, ZSA_CLOSE, ZSA_FINISH, ZSA_OPEN, ZSA_RESET, ZA_ZDEV,
};

use super::{
    Completion, CompletionStatus, ControllerInfo, DeviceSession, DmaBuffer, NamespaceInfo,
    NvmeCommand, QueuePair, ZoneGeometry,
};
use crate::domain::{CommandId, DeviceError, Lba, NamespaceId};
use crate::zns::report::{encode_report, ZoneAttributes, ZoneDescriptor, ZoneState, ZoneType};

/// Shape of the emulated namespace
#[derive(Debug, Clone)]
pub struct EmulatedConfig {
    pub sector_size: u32,
    pub num_sectors: u64,
    /// Zone size in LBAs; `None` for a conventional namespace
    pub zone_size: Option<u64>,
    /// Descriptor extension size in bytes
    pub zdes: usize,
    /// Controller memory buffer size in bytes (0 = none)
    pub cmb_size: usize,
}

impl EmulatedConfig {
    #[must_use]
    pub fn conventional(num_sectors: u64) -> Self {
        Self { sector_size: 512, num_sectors, zone_size: None, zdes: 0, cmb_size: 0 }
    }

    #[must_use]
    pub fn zoned(num_zones: u64, zone_size: u64) -> Self {
        Self {
            sector_size: 512,
            num_sectors: num_zones * zone_size,
            zone_size: Some(zone_size),
            zdes: 0,
            cmb_size: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Zone {
    start: u64,
    capacity: u64,
    wp: u64,
    state: u8,
    extension: Option<Vec<u8>>,
}

impl Zone {
    fn descriptor(&self) -> ZoneDescriptor {
        let (attrs, extension) = match &self.extension {
            Some(bytes) => (
                ZoneAttributes(ZA_ZDEV),
                bytes
                    .chunks_exact(8)
                    .map(|w| u64::from_le_bytes(w.try_into().unwrap_or_default()))
                    .collect(),
            ),
            None => (ZoneAttributes::default(), Vec::new()),
        };
        ZoneDescriptor {
            zone_type: ZoneType::SequentialWriteRequired,
            state: ZoneState::from_raw(self.state),
            attrs,
            capacity: self.capacity,
            start: Lba(self.start),
            write_pointer: Lba(self.wp),
            extension,
        }
    }

    fn end(&self) -> u64 {
        self.start + self.capacity
    }

    /// Check that `nlb` blocks may be written at `slba`
    fn check_write(&self, slba: u64, nlb: u64) -> Result<(), CompletionStatus> {
        match self.state {
            ZONE_STATE_FULL => return Err(CompletionStatus::ZONE_IS_FULL),
            ZONE_STATE_RONLY => return Err(CompletionStatus::ZONE_IS_READ_ONLY),
            ZONE_STATE_OFFLINE => return Err(CompletionStatus::ZONE_IS_OFFLINE),
            _ => {}
        }
        if slba != self.wp {
            return Err(CompletionStatus::ZONE_INVALID_WRITE);
        }
        if slba.checked_add(nlb).map_or(true, |end| end > self.end()) {
            return Err(CompletionStatus::ZONE_BOUNDARY_ERROR);
        }
        Ok(())
    }

    fn advance(&mut self, nlb: u64) {
        self.wp += nlb;
        if self.wp >= self.end() {
            self.state = ZONE_STATE_FULL;
        } else if matches!(self.state, ZONE_STATE_EMPTY | ZONE_STATE_CLOSED) {
            self.state = ZONE_STATE_IOPEN;
        }
    }
}

#[derive(Debug)]
struct State {
    zones: Vec<Zone>,
    log: Vec<NvmeCommand>,
}

/// An emulated device session
#[derive(Debug)]
pub struct EmulatedSession {
    config: EmulatedConfig,
    controllers: Vec<ControllerInfo>,
    namespaces: Vec<NamespaceInfo>,
    state: RefCell<State>,
}

impl EmulatedSession {
    #[must_use]
    pub fn new(config: EmulatedConfig) -> Self {
        let zones = match config.zone_size {
            Some(size) if size > 0 => (0..config.num_sectors / size)
                .map(|i| Zone {
                    start: i * size,
                    capacity: size,
                    wp: i * size,
                    state: ZONE_STATE_EMPTY,
                    extension: None,
                })
                .collect(),
            _ => Vec::new(),
        };
        let zoned = config.zone_size.map(|zone_size| ZoneGeometry {
            zone_size,
            num_zones: zones.len() as u64,
            zdes: config.zdes,
        });
        let namespaces = vec![NamespaceInfo {
            ctrlr: 0,
            id: NamespaceId(1),
            sector_size: config.sector_size,
            num_sectors: config.num_sectors,
            zoned,
        }];
        let controllers = vec![ControllerInfo {
            name: "emulated".into(),
            model: "nvtrace emulated".into(),
            serial: "EMU0000".into(),
        }];
        Self { config, controllers, namespaces, state: RefCell::new(State { zones, log: Vec::new() }) }
    }

    /// Force the raw state of zone `index`
    pub fn set_zone_state(&self, index: usize, state: u8) {
        if let Some(zone) = self.state.borrow_mut().zones.get_mut(index) {
            zone.state = state;
            if state == ZONE_STATE_FULL {
                zone.wp = zone.end();
            }
        }
    }

    /// Attach descriptor extension data to zone `index`
    pub fn set_zone_extension(&self, index: usize, data: &[u8]) {
        let zdes = self.config.zdes;
        if let Some(zone) = self.state.borrow_mut().zones.get_mut(index) {
            let mut ext = vec![0u8; zdes];
            let n = data.len().min(zdes);
            ext[..n].copy_from_slice(&data[..n]);
            zone.extension = Some(ext);
        }
    }

    #[must_use]
    pub fn zone_state(&self, index: usize) -> Option<ZoneState> {
        self.state.borrow().zones.get(index).map(|z| ZoneState::from_raw(z.state))
    }

    #[must_use]
    pub fn write_pointer(&self, index: usize) -> Option<Lba> {
        self.state.borrow().zones.get(index).map(|z| Lba(z.wp))
    }

    /// Every command executed so far, in completion order
    #[must_use]
    pub fn command_log(&self) -> Vec<NvmeCommand> {
        self.state.borrow().log.clone()
    }

    fn execute(&self, cmd: &NvmeCommand, buffer: Option<&mut DmaBuffer>) -> (CompletionStatus, u32) {
        let mut state = self.state.borrow_mut();
        state.log.push(*cmd);

        if cmd.nsid != self.namespaces[0].id.0 {
            return (CompletionStatus::INVALID_NAMESPACE, 0);
        }
        let result = if state.zones.is_empty() {
            self.execute_conventional(cmd, buffer.as_deref())
        } else {
            self.execute_zoned(&mut state.zones, cmd, buffer)
        };
        match result {
            Ok(dw0) => (CompletionStatus::SUCCESS, dw0),
            Err(status) => (status, 0),
        }
    }

    /// The command's LBA range must end inside the namespace
    fn check_range(&self, cmd: &NvmeCommand) -> Result<(), CompletionStatus> {
        let end = cmd.slba().0.checked_add(u64::from(cmd.block_count()));
        if end.map_or(true, |end| end > self.config.num_sectors) {
            return Err(CompletionStatus::LBA_OUT_OF_RANGE);
        }
        Ok(())
    }

    fn check_transfer(&self, cmd: &NvmeCommand, buffer: Option<&DmaBuffer>) -> Result<u64, CompletionStatus> {
        let nlb = u64::from(cmd.block_count());
        self.check_range(cmd)?;
        let bytes = nlb * u64::from(self.config.sector_size);
        match buffer {
            Some(buf) if buf.len() as u64 >= bytes => Ok(nlb),
            _ => Err(CompletionStatus::INVALID_FIELD),
        }
    }

    fn execute_conventional(&self, cmd: &NvmeCommand, buffer: Option<&DmaBuffer>) -> Result<u32, CompletionStatus> {
        match cmd.opc {
            opcode::WRITE | opcode::READ | opcode::COMPARE => self.check_transfer(cmd, buffer).map(|_| 0),
            opcode::WRITE_ZEROES | opcode::WRITE_UNCORRECTABLE | opcode::VERIFY => {
                self.check_range(cmd).map(|()| 0)
            }
            opcode::FLUSH | opcode::DATASET_MANAGEMENT | opcode::COPY => Ok(0),
            _ => Err(CompletionStatus::INVALID_OPCODE),
        }
    }

    fn zone_index(&self, slba: u64) -> Option<usize> {
        let size = self.config.zone_size?;
        usize::try_from(slba / size).ok()
    }

    fn execute_zoned(
        &self,
        zones: &mut [Zone],
        cmd: &NvmeCommand,
        buffer: Option<&mut DmaBuffer>,
    ) -> Result<u32, CompletionStatus> {
        let slba = cmd.slba().0;
        let index = self.zone_index(slba).filter(|&i| i < zones.len());

        match cmd.opc {
            opcode::ZONE_MGMT_RECV => {
                let buf = buffer.ok_or(CompletionStatus::INVALID_FIELD)?;
                if cmd.is_extended_report() && self.config.zdes == 0 {
                    return Err(CompletionStatus::INVALID_FIELD);
                }
                let zdes = if cmd.is_extended_report() { self.config.zdes } else { 0 };
                let first = index.ok_or(CompletionStatus::LBA_OUT_OF_RANGE)?;
                let descriptors: Vec<ZoneDescriptor> =
                    zones[first..].iter().map(Zone::descriptor).collect();
                let len = cmd.report_len().min(buf.len());
                encode_report(&mut buf.as_mut_slice()[..len], &descriptors, zdes);
                Ok(0)
            }
            opcode::ZONE_MGMT_SEND => {
                let zone = index.map(|i| &mut zones[i]).ok_or(CompletionStatus::LBA_OUT_OF_RANGE)?;
                if zone.start != slba {
                    return Err(CompletionStatus::INVALID_FIELD);
                }
                match (cmd.zone_send_action(), zone.state) {
                    (_, ZONE_STATE_OFFLINE) => Err(CompletionStatus::ZONE_IS_OFFLINE),
                    (_, ZONE_STATE_RONLY) => Err(CompletionStatus::ZONE_IS_READ_ONLY),
                    (ZSA_RESET, _) => {
                        zone.wp = zone.start;
                        zone.state = ZONE_STATE_EMPTY;
                        Ok(0)
                    }
                    (ZSA_FINISH, _) => {
                        zone.wp = zone.end();
                        zone.state = ZONE_STATE_FULL;
                        Ok(0)
                    }
                    (ZSA_OPEN, ZONE_STATE_FULL) | (ZSA_CLOSE, ZONE_STATE_FULL | ZONE_STATE_EMPTY) => {
                        Err(CompletionStatus::ZONE_INVALID_STATE_TRANSITION)
                    }
                    (ZSA_OPEN, _) => {
                        zone.state = ZONE_STATE_EOPEN;
                        Ok(0)
                    }
                    (ZSA_CLOSE, _) => {
                        zone.state = ZONE_STATE_CLOSED;
                        Ok(0)
                    }
                    _ => Err(CompletionStatus::INVALID_FIELD),
                }
            }
            opcode::WRITE | opcode::WRITE_ZEROES => {
                let nlb = if cmd.opc == opcode::WRITE {
                    self.check_transfer(cmd, buffer.as_deref())?
                } else {
                    u64::from(cmd.block_count())
                };
                let zone = index.map(|i| &mut zones[i]).ok_or(CompletionStatus::LBA_OUT_OF_RANGE)?;
                zone.check_write(slba, nlb)?;
                zone.advance(nlb);
                Ok(0)
            }
            opcode::ZONE_APPEND => {
                let nlb = self.check_transfer(cmd, buffer.as_deref())?;
                let zone = index.map(|i| &mut zones[i]).ok_or(CompletionStatus::LBA_OUT_OF_RANGE)?;
                if zone.start != slba {
                    return Err(CompletionStatus::INVALID_FIELD);
                }
                let assigned = zone.wp;
                zone.check_write(assigned, nlb)?;
                zone.advance(nlb);
                Ok(low_dword(assigned))
            }
            _ => self.execute_conventional(cmd, buffer.as_deref()),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn low_dword(v: u64) -> u32 {
    v as u32
}

impl DeviceSession for EmulatedSession {
    fn controllers(&self) -> &[ControllerInfo] {
        &self.controllers
    }

    fn namespaces(&self) -> &[NamespaceInfo] {
        &self.namespaces
    }

    fn alloc_io_qpair(&self, _ns: &NamespaceInfo) -> Result<Box<dyn QueuePair + '_>, DeviceError> {
        Ok(Box::new(EmulatedQueuePair { session: self, pending: VecDeque::new(), next_cid: 0 }))
    }

    fn alloc_controller_buffer(&self, _ns: &NamespaceInfo, len: usize) -> Option<DmaBuffer> {
        if len > self.config.cmb_size {
            return None;
        }
        DmaBuffer::alloc_controller(len).ok()
    }
}

struct Pending {
    cid: CommandId,
    cmd: NvmeCommand,
    buffer: Option<DmaBuffer>,
    done: Sender<Completion>,
}

struct EmulatedQueuePair<'a> {
    session: &'a EmulatedSession,
    pending: VecDeque<Pending>,
    next_cid: u16,
}

impl QueuePair for EmulatedQueuePair<'_> {
    fn submit(
        &mut self,
        cmd: NvmeCommand,
        buffer: Option<DmaBuffer>,
        done: &Sender<Completion>,
    ) -> Result<CommandId, DeviceError> {
        let cid = CommandId(self.next_cid);
        self.next_cid = self.next_cid.wrapping_add(1);
        self.pending.push_back(Pending { cid, cmd, buffer, done: done.clone() });
        Ok(cid)
    }

    fn process_completions(&mut self, max: u32) -> Result<u32, DeviceError> {
        let mut completed = 0;
        while max == 0 || completed < max {
            let Some(mut p) = self.pending.pop_front() else { break };
            let (status, dw0) = self.session.execute(&p.cmd, p.buffer.as_mut());
            debug!("Emulated {:#04x} {} -> {status}", p.cmd.opc, p.cid);
            // A dropped receiver means nobody waits for this completion
            let _ = p.done.send(Completion { cid: p.cid, status, dw0, buffer: p.buffer });
            completed += 1;
        }
        Ok(completed)
    }
}
