//! Linux NVMe passthrough session
//!
//! Namespaces are discovered from sysfs (`/sys/block/nvme*n*`) and commands
//! are issued with the kernel's `NVME_IOCTL_IO_CMD` / `NVME_IOCTL_ADMIN_CMD`
//! ioctls on the namespace block device. The ioctls are synchronous, so a
//! queue pair only records submissions and executes them on the next
//! `process_completions` call.

#![allow(unsafe_code)] // ioctl(2) on NVMe block devices

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use log::{debug, info, warn};
use nvtrace_common::opcode;
use nvtrace_common::zns::ZDES_UNIT;

use super::{
    Completion, CompletionStatus, ControllerInfo, DeviceSession, DmaBuffer, NamespaceInfo,
    NvmeCommand, QueuePair, ZoneGeometry,
};
use crate::domain::{CommandId, DeviceError, NamespaceId};

/// `_IO('N', 0x40)`: namespace id of the opened device
pub const NVME_IOCTL_ID: libc::Ioctl = 0x4E40 as libc::Ioctl;
/// `_IOWR('N', 0x41, struct nvme_passthru_cmd)`
pub const NVME_IOCTL_ADMIN_CMD: libc::Ioctl = 0xC048_4E41_u32 as libc::Ioctl;
/// `_IOWR('N', 0x43, struct nvme_passthru_cmd)`
pub const NVME_IOCTL_IO_CMD: libc::Ioctl = 0xC048_4E43_u32 as libc::Ioctl;

const IDENTIFY_LEN: usize = 4096;
const CNS_NAMESPACE: u32 = 0x00;
const CNS_CSI_NAMESPACE: u32 = 0x05;
const CSI_ZNS: u32 = 0x02;

/// Offset of FLBAS in Identify Namespace
const ID_NS_FLBAS: usize = 26;
/// Offset of the LBA format extensions in the ZNS Identify Namespace data
const ID_ZNS_LBAFE: usize = 2816;
const ID_ZNS_LBAFE_LEN: usize = 16;

/// `struct nvme_passthru_cmd` from `<linux/nvme_ioctl.h>`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct PassthruCmd {
    opcode: u8,
    flags: u8,
    rsvd1: u16,
    nsid: u32,
    cdw2: u32,
    cdw3: u32,
    metadata: u64,
    addr: u64,
    metadata_len: u32,
    data_len: u32,
    cdw10: u32,
    cdw11: u32,
    cdw12: u32,
    cdw13: u32,
    cdw14: u32,
    cdw15: u32,
    timeout_ms: u32,
    result: u32,
}

const _: () = assert!(std::mem::size_of::<PassthruCmd>() == 72);

impl PassthruCmd {
    fn new(cmd: &NvmeCommand, buffer: Option<&mut DmaBuffer>) -> Self {
        let (addr, data_len) = match buffer {
            Some(buf) => {
                let len = if cmd.opc == opcode::ZONE_MGMT_RECV {
                    cmd.report_len().min(buf.len())
                } else {
                    buf.len()
                };
                (buf.as_mut_ptr() as usize as u64, u32::try_from(len).unwrap_or(u32::MAX))
            }
            None => (0, 0),
        };
        Self {
            opcode: cmd.opc,
            nsid: cmd.nsid,
            addr,
            data_len,
            cdw10: cmd.cdw10,
            cdw11: cmd.cdw11,
            cdw12: cmd.cdw12,
            cdw13: cmd.cdw13,
            cdw14: cmd.cdw14,
            cdw15: cmd.cdw15,
            ..Self::default()
        }
    }
}

/// Issue one passthrough ioctl; a positive return is the NVMe status field
fn passthru(file: &File, request: libc::Ioctl, cmd: &mut PassthruCmd) -> io::Result<CompletionStatus> {
    // SAFETY: cmd is a valid nvme_passthru_cmd, and addr/data_len either
    // describe a live buffer owned by the caller or are zero.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request, cmd as *mut PassthruCmd) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    #[allow(clippy::cast_sign_loss)]
    let status = CompletionStatus::from_raw(rc as u32);
    Ok(status)
}

fn namespace_id(file: &File) -> io::Result<u32> {
    // SAFETY: NVME_IOCTL_ID takes no argument.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), NVME_IOCTL_ID) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    #[allow(clippy::cast_sign_loss)]
    let nsid = rc as u32;
    Ok(nsid)
}

/// A namespace found in sysfs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredNamespace {
    /// Block device name, e.g. `nvme0n1`
    pub block: String,
    /// Controller name, e.g. `nvme0`
    pub ctrl: String,
    pub nsid: u32,
    pub sector_size: u32,
    pub num_sectors: u64,
    pub host_managed: bool,
    /// Zone size in logical blocks (0 if not zoned)
    pub zone_size: u64,
    pub nr_zones: u64,
}

/// Split `nvme<C>n<N>` into its controller and namespace numbers.
/// Partitions (`nvme0n1p1`) and multipath paths (`nvme0c1n1`) are rejected.
#[must_use]
pub fn parse_block_name(name: &str) -> Option<(u32, u32)> {
    let rest = name.strip_prefix("nvme")?;
    let (ctrl, ns) = rest.split_once('n')?;
    if ctrl.is_empty() || ns.is_empty() || !ctrl.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !ns.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((ctrl.parse().ok()?, ns.parse().ok()?))
}

fn read_attr(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_num(path: &Path) -> Option<u64> {
    read_attr(path)?.parse().ok()
}

/// Scan `<sys_root>/block` for NVMe namespaces, optionally only `only`
///
/// # Errors
/// Returns an error if the block directory cannot be read.
pub fn discover(sys_root: &Path, only: Option<&str>) -> Result<Vec<DiscoveredNamespace>, DeviceError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(sys_root.join("block"))? {
        let entry = entry?;
        let block = entry.file_name().to_string_lossy().to_string();
        let Some((ctrl_num, parsed_nsid)) = parse_block_name(&block) else {
            continue;
        };
        if only.is_some_and(|name| name != block) {
            continue;
        }

        let dir = entry.path();
        let queue = dir.join("queue");
        let sector_size = read_num(&queue.join("logical_block_size")).unwrap_or(512);
        let sector_size = u32::try_from(sector_size).unwrap_or(512).max(512);
        let to_lbas = |sectors_512: u64| sectors_512 * 512 / u64::from(sector_size);

        let host_managed = read_attr(&queue.join("zoned")).is_some_and(|z| z == "host-managed");
        let nsid = read_num(&dir.join("nsid"))
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(parsed_nsid);

        found.push(DiscoveredNamespace {
            ctrl: format!("nvme{ctrl_num}"),
            nsid,
            sector_size,
            num_sectors: to_lbas(read_num(&dir.join("size")).unwrap_or(0)),
            host_managed,
            zone_size: if host_managed {
                to_lbas(read_num(&queue.join("chunk_sectors")).unwrap_or(0))
            } else {
                0
            },
            nr_zones: if host_managed { read_num(&queue.join("nr_zones")).unwrap_or(0) } else { 0 },
            block,
        });
    }
    found.sort_by(|a, b| a.block.cmp(&b.block));
    Ok(found)
}

fn controller_info(sys_root: &Path, ctrl: &str) -> ControllerInfo {
    let dir = sys_root.join("class/nvme").join(ctrl);
    ControllerInfo {
        name: ctrl.to_string(),
        model: read_attr(&dir.join("model")).unwrap_or_else(|| "unknown".into()),
        serial: read_attr(&dir.join("serial")).unwrap_or_else(|| "unknown".into()),
    }
}

/// Index of the active LBA format from Identify Namespace data
#[must_use]
pub fn active_format_index(id_ns: &[u8]) -> usize {
    let flbas = id_ns[ID_NS_FLBAS];
    usize::from(flbas & 0x0F) | (usize::from((flbas >> 5) & 0x03) << 4)
}

/// Zone size (LBAs) and descriptor extension size (bytes) for LBA format
/// `index`, from ZNS Identify Namespace data
#[must_use]
pub fn zns_format(id_zns: &[u8], index: usize) -> (u64, usize) {
    let at = ID_ZNS_LBAFE + index * ID_ZNS_LBAFE_LEN;
    let mut zsze = [0u8; 8];
    zsze.copy_from_slice(&id_zns[at..at + 8]);
    (u64::from_le_bytes(zsze), usize::from(id_zns[at + 8]) * ZDES_UNIT)
}

fn identify(file: &File, path: &Path, nsid: u32, cns: u32, csi: u32) -> Result<DmaBuffer, DeviceError> {
    let mut buf = DmaBuffer::alloc_host(IDENTIFY_LEN)?;
    let cmd = NvmeCommand {
        opc: opcode::ADMIN_IDENTIFY,
        nsid,
        cdw10: cns,
        cdw11: csi << 24,
        ..NvmeCommand::default()
    };
    let mut raw = PassthruCmd::new(&cmd, Some(&mut buf));
    raw.data_len = IDENTIFY_LEN as u32;
    let status = passthru(file, NVME_IOCTL_ADMIN_CMD, &mut raw)
        .map_err(|e| DeviceError::IdentifyFailed { path: path.to_path_buf(), error: e.to_string() })?;
    if !status.is_success() {
        return Err(DeviceError::IdentifyFailed { path: path.to_path_buf(), error: status.to_string() });
    }
    Ok(buf)
}

/// Zone geometry from Identify, falling back to the sysfs zone size
fn zone_geometry(file: &File, path: &Path, found: &DiscoveredNamespace) -> ZoneGeometry {
    let fallback = ZoneGeometry { zone_size: found.zone_size, num_zones: found.nr_zones, zdes: 0 };
    let ids = identify(file, path, found.nsid, CNS_NAMESPACE, 0).and_then(|id_ns| {
        let id_zns = identify(file, path, found.nsid, CNS_CSI_NAMESPACE, CSI_ZNS)?;
        Ok((id_ns, id_zns))
    });
    match ids {
        Ok((id_ns, id_zns)) => {
            let (zsze, zdes) = zns_format(id_zns.as_slice(), active_format_index(id_ns.as_slice()));
            let zone_size = if zsze > 0 { zsze } else { found.zone_size };
            ZoneGeometry { zone_size, num_zones: found.nr_zones, zdes }
        }
        Err(e) => {
            warn!("{e}; assuming no zone descriptor extension");
            fallback
        }
    }
}

/// Passthrough device session
#[derive(Debug)]
pub struct PassthruSession {
    controllers: Vec<ControllerInfo>,
    namespaces: Vec<NamespaceInfo>,
    /// Opened block devices, index-aligned with `namespaces`
    devices: Vec<(PathBuf, File)>,
}

impl PassthruSession {
    /// Discover all NVMe namespaces, or only the block device `device`
    ///
    /// # Errors
    /// Returns [`DeviceError::NoDevice`] if nothing is found and
    /// [`DeviceError::PermissionDenied`] if a device cannot be opened.
    pub fn discover(device: Option<&Path>) -> Result<Self, DeviceError> {
        let only = device.and_then(Path::file_name).map(|n| n.to_string_lossy().to_string());
        Self::discover_in(Path::new("/sys"), Path::new("/dev"), only.as_deref())
    }

    fn discover_in(sys_root: &Path, dev_root: &Path, only: Option<&str>) -> Result<Self, DeviceError> {
        let mut session = Self { controllers: Vec::new(), namespaces: Vec::new(), devices: Vec::new() };

        for found in discover(sys_root, only)? {
            let path = dev_root.join(&found.block);
            info!("Attaching to {}", path.display());
            let file = OpenOptions::new().read(true).write(true).open(&path).map_err(|e| {
                if e.kind() == io::ErrorKind::PermissionDenied {
                    DeviceError::PermissionDenied(path.clone())
                } else {
                    DeviceError::Io(e)
                }
            })?;

            match namespace_id(&file) {
                Ok(nsid) if nsid != found.nsid => {
                    warn!("{}: sysfs reports nsid {}, device {nsid}", found.block, found.nsid);
                }
                Ok(_) => {}
                Err(e) => debug!("{}: NVME_IOCTL_ID failed: {e}", found.block),
            }

            let ctrlr = match session.controllers.iter().position(|c| c.name == found.ctrl) {
                Some(i) => i,
                None => {
                    session.controllers.push(controller_info(sys_root, &found.ctrl));
                    session.controllers.len() - 1
                }
            };
            let zoned = found.host_managed.then(|| zone_geometry(&file, &path, &found));

            session.namespaces.push(NamespaceInfo {
                ctrlr,
                id: NamespaceId(found.nsid),
                sector_size: found.sector_size,
                num_sectors: found.num_sectors,
                zoned,
            });
            session.devices.push((path, file));
        }

        if session.namespaces.is_empty() {
            return Err(DeviceError::NoDevice);
        }
        Ok(session)
    }

    fn device_for(&self, ns: &NamespaceInfo) -> Result<&File, DeviceError> {
        self.namespaces
            .iter()
            .position(|n| n.ctrlr == ns.ctrlr && n.id == ns.id)
            .map(|i| &self.devices[i].1)
            .ok_or(DeviceError::NamespaceNotFound(ns.id))
    }
}

impl DeviceSession for PassthruSession {
    fn controllers(&self) -> &[ControllerInfo] {
        &self.controllers
    }

    fn namespaces(&self) -> &[NamespaceInfo] {
        &self.namespaces
    }

    fn alloc_io_qpair(&self, ns: &NamespaceInfo) -> Result<Box<dyn QueuePair + '_>, DeviceError> {
        let file = self.device_for(ns)?;
        Ok(Box::new(PassthruQueuePair { file, pending: VecDeque::new(), next_cid: 0 }))
    }
}

struct Pending {
    cid: CommandId,
    cmd: NvmeCommand,
    buffer: Option<DmaBuffer>,
    done: Sender<Completion>,
}

struct PassthruQueuePair<'a> {
    file: &'a File,
    pending: VecDeque<Pending>,
    next_cid: u16,
}

impl QueuePair for PassthruQueuePair<'_> {
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
            let mut raw = PassthruCmd::new(&p.cmd, p.buffer.as_mut());
            let status = match passthru(self.file, NVME_IOCTL_IO_CMD, &mut raw) {
                Ok(status) => status,
                Err(e) => {
                    warn!("Passthrough of {:#04x} failed: {e}", p.cmd.opc);
                    CompletionStatus::INTERNAL_PATH_ERROR
                }
            };
            // A dropped receiver means nobody waits for this completion
            let _ = p.done.send(Completion { cid: p.cid, status, dw0: raw.result, buffer: p.buffer });
            completed += 1;
        }
        Ok(completed)
    }
}
