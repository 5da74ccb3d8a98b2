//! Paginated zone report driver
//!
//! ```text
//! Idle ──issue──> ReportIssued ──poll──> ReportComplete ──more──> ReportIssued
//!   │                                          │
//!   └────────── nothing requested ─────────────┴──done──> Exhausted
//! ```

use std::io::Write;
use std::time::Duration;

use log::debug;
use nvtrace_common::opcode;
use nvtrace_common::zns::{zones_per_buffer, ZONE_DESCRIPTOR_SIZE, ZONE_REPORT_HEADER_SIZE};

use super::report::ZoneReport;
use crate::device::dma::dma_len;
use crate::device::{
    alloc_dma_buffer, CompletionWaiter, DeviceSession, DmaBuffer, NamespaceInfo, NvmeCommand,
    QueuePair, ZoneGeometry,
};
use crate::domain::{DeviceError, Lba, ZoneError};

/// Bytes requested per report command, unless one descriptor needs more
pub const REPORT_BUFFER_SIZE: usize = 4096;

/// Report page size for a format with `zdes` extension bytes per descriptor.
/// A page always holds the header and at least one descriptor.
#[must_use]
pub fn report_page_len(zdes: usize) -> usize {
    dma_len(REPORT_BUFFER_SIZE.max(ZONE_REPORT_HEADER_SIZE + ZONE_DESCRIPTOR_SIZE + zdes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportState {
    Idle,
    ReportIssued,
    ReportComplete,
    Exhausted,
}

/// Prints the zones of one namespace, one report page at a time
pub struct ZoneReportSession<'s, S: DeviceSession + ?Sized> {
    session: &'s S,
    ns: &'s NamespaceInfo,
    geometry: ZoneGeometry,
    page_len: usize,
    state: ReportState,
    slba: Lba,
    remaining: u64,
    printed: u64,
    timeout: Duration,
}

impl<'s, S: DeviceSession + ?Sized> ZoneReportSession<'s, S> {
    /// Report up to `max_zones` zones (all zones if `None`) starting at zone 0
    ///
    /// # Errors
    /// Returns [`ZoneError::NotZoned`] for conventional namespaces.
    pub fn new(
        session: &'s S,
        ns: &'s NamespaceInfo,
        max_zones: Option<u64>,
        timeout: Duration,
    ) -> Result<Self, ZoneError> {
        let geometry = ns.zoned.ok_or(ZoneError::NotZoned(ns.id))?;
        let remaining = max_zones.map_or(geometry.num_zones, |n| n.min(geometry.num_zones));
        Ok(Self {
            session,
            ns,
            geometry,
            page_len: report_page_len(geometry.zdes),
            state: ReportState::Idle,
            slba: Lba(0),
            remaining,
            printed: 0,
            timeout,
        })
    }

    #[must_use]
    pub fn state(&self) -> ReportState {
        self.state
    }

    /// Zones that fit in one report page for this namespace's format
    #[must_use]
    pub fn zones_per_page(&self) -> usize {
        zones_per_buffer(self.page_len, self.geometry.zdes)
    }

    /// Bytes requested per report command
    #[must_use]
    pub fn page_len(&self) -> usize {
        self.page_len
    }

    /// Drive the session to `Exhausted`, printing one line per zone.
    /// Returns the number of zones printed.
    ///
    /// # Errors
    /// Returns an error if a report command fails or times out, or if writing
    /// to `out` fails.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<u64, ZoneError> {
        let mut qpair = self.session.alloc_io_qpair(self.ns)?;
        let mut waiter = CompletionWaiter::new(1, self.timeout);
        let mut page: Option<DmaBuffer> = None;

        loop {
            match self.state {
                ReportState::Idle => {
                    if self.remaining == 0 {
                        self.state = ReportState::Exhausted;
                    } else {
                        self.issue(qpair.as_mut(), &mut waiter)?;
                    }
                }
                ReportState::ReportIssued => {
                    let Some(completion) = waiter.wait_one(qpair.as_mut())? else {
                        self.state = ReportState::Exhausted;
                        continue;
                    };
                    if !completion.status.is_success() {
                        return Err(ZoneError::ReportFailed(completion.status));
                    }
                    page = completion.buffer;
                    self.state = ReportState::ReportComplete;
                }
                ReportState::ReportComplete => {
                    let buf = page
                        .take()
                        .ok_or(DeviceError::MissingBuffer { opc: opcode::ZONE_MGMT_RECV })?;
                    let n = self.print_page(&buf, out)?;
                    // Release this page before the next one is allocated
                    drop(buf);
                    if n > 0 && self.remaining > 0 {
                        self.issue(qpair.as_mut(), &mut waiter)?;
                    } else {
                        self.state = ReportState::Exhausted;
                    }
                }
                ReportState::Exhausted => return Ok(self.printed),
            }
        }
    }

    fn issue(
        &mut self,
        qpair: &mut dyn QueuePair,
        waiter: &mut CompletionWaiter,
    ) -> Result<(), ZoneError> {
        let buf = alloc_dma_buffer(self.session, self.ns, self.page_len)?;
        let extended = self.geometry.zdes > 0;
        let cmd = NvmeCommand::zone_report(self.ns.id, self.slba, self.page_len, extended);
        debug!(
            "Zone report at {} ({}, {} zones left)",
            self.slba,
            if extended { "extended" } else { "plain" },
            self.remaining
        );
        waiter.submit(qpair, cmd, Some(buf))?;
        self.state = ReportState::ReportIssued;
        Ok(())
    }

    fn print_page<W: Write>(&mut self, buf: &DmaBuffer, out: &mut W) -> Result<u64, ZoneError> {
        let report = ZoneReport::new(&buf.as_slice()[..self.page_len], self.geometry.zdes)?;
        let available = report.nr_zones().min(report.capacity() as u64);
        let n = available.min(self.remaining);

        for index in 0..n {
            #[allow(clippy::cast_possible_truncation)]
            let zone = report.descriptor(index as usize)?;
            writeln!(out, "{zone}")?;
            if !zone.extension.is_empty() {
                let words: Vec<String> = zone.extension.iter().map(|w| format!("0x{w:016x}")).collect();
                writeln!(out, "  ZDE: {}", words.join(" "))?;
            }
        }

        self.printed += n;
        self.remaining -= n;
        self.slba = Lba(self.slba.0 + self.geometry.zone_size * n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{EmulatedConfig, EmulatedSession};
    use crate::domain::NamespaceId;
    use nvtrace_common::zns::{ZONE_STATE_FULL, ZONE_STATE_OFFLINE};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn output_lines(out: &[u8]) -> Vec<String> {
        String::from_utf8(out.to_vec()).unwrap().lines().map(String::from).collect()
    }

    #[test]
    fn test_conventional_namespace_is_rejected() {
        let session = EmulatedSession::new(EmulatedConfig::conventional(1 << 20));
        let ns = &session.namespaces()[0];
        let result = ZoneReportSession::new(&session, ns, None, TIMEOUT);
        assert!(matches!(result, Err(ZoneError::NotZoned(NamespaceId(1)))));
    }

    #[test]
    fn test_single_page() {
        let session = EmulatedSession::new(EmulatedConfig::zoned(8, 0x1000));
        session.set_zone_state(1, ZONE_STATE_FULL);
        session.set_zone_state(2, ZONE_STATE_OFFLINE);
        let ns = &session.namespaces()[0];

        let mut report = ZoneReportSession::new(&session, ns, Some(3), TIMEOUT).unwrap();
        assert_eq!(report.state(), ReportState::Idle);
        let mut out = Vec::new();
        assert_eq!(report.run(&mut out).unwrap(), 3);
        assert_eq!(report.state(), ReportState::Exhausted);

        let lines = output_lines(&out);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("ZS: Empty"));
        assert!(lines[1].contains("ZSLBA: 0x0000000000001000"));
        assert!(lines[1].contains("ZS: Full"));
        assert!(lines[2].contains("ZS: Offline"));
    }

    #[test]
    fn test_pages_advance_start_lba() {
        // 63 zones fit a plain page, so 100 zones take two reports
        let session = EmulatedSession::new(EmulatedConfig::zoned(100, 0x100));
        let ns = &session.namespaces()[0];
        let mut report = ZoneReportSession::new(&session, ns, None, TIMEOUT).unwrap();
        assert_eq!(report.zones_per_page(), 63);

        let mut out = Vec::new();
        assert_eq!(report.run(&mut out).unwrap(), 100);

        let reports: Vec<NvmeCommand> = session
            .command_log()
            .into_iter()
            .filter(|c| c.opc == opcode::ZONE_MGMT_RECV)
            .collect();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].slba(), Lba(0));
        assert_eq!(reports[1].slba(), Lba(63 * 0x100));

        let lines = output_lines(&out);
        assert!(lines[99].starts_with("ZSLBA: 0x0000000000006300"));
    }

    #[test]
    fn test_extended_report_when_format_has_extension() {
        let mut config = EmulatedConfig::zoned(4, 0x100);
        config.zdes = 64;
        let session = EmulatedSession::new(config);
        session.set_zone_extension(0, &[0xAB; 64]);
        let ns = &session.namespaces()[0];

        let mut report = ZoneReportSession::new(&session, ns, Some(2), TIMEOUT).unwrap();
        assert_eq!(report.zones_per_page(), 31);
        let mut out = Vec::new();
        report.run(&mut out).unwrap();

        let cmd = session.command_log()[0];
        assert!(cmd.is_extended_report());
        let lines = output_lines(&out);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("  ZDE: 0xabababababababab"));
    }

    #[test]
    fn test_large_extension_grows_the_page() {
        let mut config = EmulatedConfig::zoned(4, 0x100);
        config.zdes = 4096;
        let session = EmulatedSession::new(config);
        let ns = &session.namespaces()[0];

        let mut report = ZoneReportSession::new(&session, ns, Some(2), TIMEOUT).unwrap();
        assert_eq!(report.page_len(), 8192);
        assert_eq!(report.zones_per_page(), 1);
        let mut out = Vec::new();
        assert_eq!(report.run(&mut out).unwrap(), 2);

        let reports = session.command_log();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].report_len(), 8192);
        assert_eq!(reports[1].slba(), Lba(0x100));
        assert_eq!(output_lines(&out).len(), 2);
    }

    #[test]
    fn test_page_len_for_formats() {
        assert_eq!(report_page_len(0), REPORT_BUFFER_SIZE);
        assert_eq!(report_page_len(64), REPORT_BUFFER_SIZE);
        assert_eq!(report_page_len(255 * 64), 20480);
    }

    #[test]
    fn test_zero_requested_issues_nothing() {
        let session = EmulatedSession::new(EmulatedConfig::zoned(4, 0x100));
        let ns = &session.namespaces()[0];
        let mut report = ZoneReportSession::new(&session, ns, Some(0), TIMEOUT).unwrap();
        let mut out = Vec::new();
        assert_eq!(report.run(&mut out).unwrap(), 0);
        assert!(session.command_log().is_empty());
    }

    #[test]
    fn test_request_is_clamped_to_zone_count() {
        let session = EmulatedSession::new(EmulatedConfig::zoned(4, 0x100));
        let ns = &session.namespaces()[0];
        let mut report = ZoneReportSession::new(&session, ns, Some(50), TIMEOUT).unwrap();
        let mut out = Vec::new();
        assert_eq!(report.run(&mut out).unwrap(), 4);
    }
}
