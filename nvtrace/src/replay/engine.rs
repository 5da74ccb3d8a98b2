//! Replay of a decoded log against a device
//!
//! Each replayed command gets its own queue pair and data buffer, which are
//! released once the command completes and before the next one is issued.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use nvtrace_common::{opcode, BinRecord};

use super::pairing::{pair_records, RecordPair};
use super::translate::{translate, ReplayCommand, Translation};
use crate::device::{
    alloc_dma_buffer, BufferOrigin, CompletionStatus, CompletionWaiter, DeviceSession,
    NamespaceInfo, NvmeCommand, QueuePair,
};
use crate::domain::{Lba, ReplayError};

/// Default bound on every completion poll loop
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Issue commands at their recorded relative timestamps
    pub paced: bool,
    /// Reset a zone before a write that starts at its first LBA
    pub reset_zones: bool,
    pub poll_timeout: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self { paced: false, reset_zones: false, poll_timeout: DEFAULT_POLL_TIMEOUT }
    }
}

/// Counters for one replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub records: usize,
    pub issued: u64,
    /// Submit records that were not issued
    pub skipped: u64,
    /// Issued commands that completed with an error status
    pub failed: u64,
    /// Completions whose status differs from the recorded one
    pub status_mismatches: u64,
    pub zone_resets: u64,
    pub orphan_completions: usize,
    pub controller_buffers: u64,
    /// Recorded latency of paired commands, in ticks
    pub recorded_latency_ticks: u64,
    /// Live latency of the same commands
    pub live_latency: Duration,
    pub latency_samples: u64,
    pub tsc_rate: u64,
}

impl ReplayStats {
    /// Mean recorded latency, if any paired command was replayed
    #[must_use]
    pub fn mean_recorded_latency(&self) -> Option<Duration> {
        if self.latency_samples == 0 || self.tsc_rate == 0 {
            return None;
        }
        Some(ticks_to_duration(self.recorded_latency_ticks / self.latency_samples, self.tsc_rate))
    }

    #[must_use]
    pub fn mean_live_latency(&self) -> Option<Duration> {
        if self.latency_samples == 0 {
            return None;
        }
        let samples = u32::try_from(self.latency_samples).unwrap_or(u32::MAX);
        Some(self.live_latency / samples)
    }
}

impl fmt::Display for ReplayStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Records: {}", self.records)?;
        writeln!(f, "Issued: {}  Skipped: {}  Failed: {}", self.issued, self.skipped, self.failed)?;
        writeln!(f, "Status mismatches: {}", self.status_mismatches)?;
        writeln!(f, "Zone resets: {}", self.zone_resets)?;
        if self.orphan_completions > 0 {
            writeln!(f, "Unpaired completions: {}", self.orphan_completions)?;
        }
        match (self.mean_recorded_latency(), self.mean_live_latency()) {
            (Some(recorded), Some(live)) => {
                write!(f, "Mean latency: recorded {recorded:?}, replayed {live:?}")
            }
            (None, Some(live)) => write!(f, "Mean latency: replayed {live:?}"),
            _ => write!(f, "Mean latency: n/a"),
        }
    }
}

/// Convert ticks at `tsc_rate` ticks per second to a duration
#[must_use]
pub fn ticks_to_duration(ticks: u64, tsc_rate: u64) -> Duration {
    if tsc_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = u128::from(ticks) * 1_000_000_000 / u128::from(tsc_rate);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Scratch state of one replayed command
struct ReplayAttempt<'s> {
    qpair: Box<dyn QueuePair + 's>,
    waiter: CompletionWaiter,
    origin: Option<BufferOrigin>,
    pending: bool,
}

/// Replays records against one namespace
pub struct ReplayEngine<'s, S: DeviceSession + ?Sized> {
    session: &'s S,
    ns: &'s NamespaceInfo,
    options: ReplayOptions,
    stats: ReplayStats,
}

impl<'s, S: DeviceSession + ?Sized> ReplayEngine<'s, S> {
    pub fn new(session: &'s S, ns: &'s NamespaceInfo, options: ReplayOptions) -> Self {
        Self { session, ns, options, stats: ReplayStats::default() }
    }

    /// Replay every record in log order
    ///
    /// # Errors
    /// Buffer allocation failures and poll timeouts abort the replay. Commands
    /// that complete with an error status are counted and replay continues.
    pub fn replay(mut self, records: &[BinRecord]) -> Result<ReplayStats, ReplayError> {
        let pairing = pair_records(records);
        self.stats.records = records.len();
        self.stats.orphan_completions = pairing.orphan_completions;
        self.stats.tsc_rate = records.first().map_or(0, |r| r.tsc_rate);
        info!(
            "Replaying {} records ({} submits) on {}",
            records.len(),
            pairing.pairs.len(),
            self.ns.id
        );

        let start = Instant::now();
        for pair in &pairing.pairs {
            let rc = match translate(&pair.submit, self.ns) {
                Translation::Issue(rc) => rc,
                Translation::Skip(reason) => {
                    debug!("Skipping entry {}: {reason}", pair.index);
                    self.stats.skipped += 1;
                    continue;
                }
            };
            if self.options.paced {
                let due = ticks_to_duration(pair.submit.tsc_timestamp, pair.submit.tsc_rate);
                if let Some(wait) = due.checked_sub(start.elapsed()) {
                    thread::sleep(wait);
                }
            }
            self.replay_one(pair, rc)?;
        }
        Ok(self.stats)
    }

    fn replay_one(&mut self, pair: &RecordPair, rc: ReplayCommand) -> Result<(), ReplayError> {
        let mut attempt = ReplayAttempt {
            qpair: self.session.alloc_io_qpair(self.ns)?,
            waiter: CompletionWaiter::new(1, self.options.poll_timeout),
            origin: None,
            pending: false,
        };

        if self.options.reset_zones {
            self.reset_zone_for(&mut attempt, &rc.cmd)?;
        }

        let buffer = if rc.data_len > 0 {
            let buf = alloc_dma_buffer(self.session, self.ns, rc.data_len)?;
            attempt.origin = Some(buf.origin());
            if buf.origin() == BufferOrigin::ControllerMemory {
                self.stats.controller_buffers += 1;
            }
            Some(buf)
        } else {
            None
        };

        let issued_at = Instant::now();
        let cid = attempt.waiter.submit(attempt.qpair.as_mut(), rc.cmd, buffer)?;
        attempt.pending = true;
        debug!(
            "Entry {}: opc {:#04x} at {} as {cid} ({})",
            pair.index,
            rc.cmd.opc,
            rc.cmd.slba(),
            attempt.origin.map_or_else(|| "no data".to_string(), |o| o.to_string())
        );

        let Some(completion) = attempt.waiter.wait_one(attempt.qpair.as_mut())? else {
            return Ok(());
        };
        attempt.pending = false;
        let live = issued_at.elapsed();
        self.stats.issued += 1;

        if !completion.status.is_success() {
            self.stats.failed += 1;
        }
        if let Some(recorded) = pair.recorded_status() {
            if recorded != completion.status {
                self.stats.status_mismatches += 1;
                info!(
                    "Entry {}: recorded status {recorded}, replay returned {}",
                    pair.index, completion.status
                );
            }
        }
        if let Some(ticks) = pair.recorded_latency() {
            self.stats.recorded_latency_ticks += ticks;
            self.stats.live_latency += live;
            self.stats.latency_samples += 1;
        }
        debug_assert!(!attempt.pending);
        Ok(())
    }

    /// Reset the target zone when `cmd` writes from the start of a zone
    fn reset_zone_for(&mut self, attempt: &mut ReplayAttempt<'_>, cmd: &NvmeCommand) -> Result<(), ReplayError> {
        let Some(geometry) = self.ns.zoned else {
            return Ok(());
        };
        if !matches!(cmd.opc, opcode::WRITE | opcode::WRITE_ZEROES)
            || geometry.zone_size == 0
            || cmd.slba().0 % geometry.zone_size != 0
        {
            return Ok(());
        }

        let reset = NvmeCommand::zone_reset(self.ns.id, Lba(cmd.slba().0));
        attempt.waiter.submit(attempt.qpair.as_mut(), reset, None)?;
        attempt.pending = true;
        if let Some(completion) = attempt.waiter.wait_one(attempt.qpair.as_mut())? {
            attempt.pending = false;
            if completion.status == CompletionStatus::SUCCESS {
                self.stats.zone_resets += 1;
            } else {
                warn!("Zone reset at {} failed: {}", cmd.slba(), completion.status);
            }
        }
        Ok(())
    }
}
