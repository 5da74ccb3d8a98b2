//! Poll-to-progress completion tracking

use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::warn;

use super::{Completion, DmaBuffer, NvmeCommand, QueuePair};
use crate::domain::{CommandId, DeviceError};

/// Tracks outstanding commands on one queue pair and spins on
/// [`QueuePair::process_completions`] until they complete.
///
/// Every wait is bounded by `timeout`.
pub struct CompletionWaiter {
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    depth: u32,
    outstanding: u32,
    timeout: Duration,
}

impl CompletionWaiter {
    #[must_use]
    pub fn new(depth: u32, timeout: Duration) -> Self {
        let depth = depth.max(1);
        let (tx, rx) = bounded(depth as usize);
        Self { tx, rx, depth, outstanding: 0, timeout }
    }

    #[must_use]
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Submit `cmd` and count it as outstanding
    ///
    /// # Errors
    /// Returns [`DeviceError::QueueFull`] when `depth` commands are already
    /// outstanding, or the queue pair's submit error.
    pub fn submit(
        &mut self,
        qpair: &mut dyn QueuePair,
        cmd: NvmeCommand,
        buffer: Option<DmaBuffer>,
    ) -> Result<CommandId, DeviceError> {
        if self.outstanding >= self.depth {
            return Err(DeviceError::QueueFull { depth: self.depth });
        }
        let cid = qpair.submit(cmd, buffer, &self.tx)?;
        self.outstanding += 1;
        Ok(cid)
    }

    /// Poll until one command completes. Returns `None` if nothing is outstanding.
    ///
    /// A completion with an error status is logged and still returned; the
    /// outstanding count drops either way.
    ///
    /// # Errors
    /// Returns [`DeviceError::PollTimeout`] if nothing completes in time.
    pub fn wait_one(&mut self, qpair: &mut dyn QueuePair) -> Result<Option<Completion>, DeviceError> {
        if self.outstanding == 0 {
            return Ok(None);
        }
        let start = Instant::now();
        loop {
            match self.rx.try_recv() {
                Ok(completion) => {
                    self.outstanding -= 1;
                    if !completion.status.is_success() {
                        warn!("Command {} failed: {}", completion.cid, completion.status);
                    }
                    return Ok(Some(completion));
                }
                Err(TryRecvError::Empty) => {}
                // We hold a sender, so the channel cannot disconnect
                Err(TryRecvError::Disconnected) => return Ok(None),
            }

            qpair.process_completions(0)?;

            let elapsed = start.elapsed();
            if elapsed > self.timeout && self.rx.is_empty() {
                return Err(DeviceError::PollTimeout { elapsed, outstanding: self.outstanding });
            }
            std::hint::spin_loop();
        }
    }

    /// Poll until every outstanding command has completed
    ///
    /// # Errors
    /// Returns [`DeviceError::PollTimeout`] if a wait times out.
    pub fn wait_all(&mut self, qpair: &mut dyn QueuePair) -> Result<Vec<Completion>, DeviceError> {
        let mut done = Vec::with_capacity(self.outstanding as usize);
        while let Some(completion) = self.wait_one(qpair)? {
            done.push(completion);
        }
        Ok(done)
    }
}
