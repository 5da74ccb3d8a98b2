//! # nvtrace - NVMe I/O Trace Capture and Replay
//!
//! nvtrace turns the I/O submit/complete events of a storage application's
//! trace ring into a compact binary log of fixed 112-byte records, and later
//! replays that log against an NVMe device. For Zoned Namespace (ZNS) devices
//! it can also report the live state of every zone.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                Traced Application (trace ring)                  │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ trace snapshot
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  nvtrace record                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ TraceSource  │──▶│    Filter    │──▶│   Encoder    │──┐      │
//! │  └──────────────┘   └──────────────┘   └──────────────┘  │      │
//! └──────────────────────────────────────────────────────────┼──────┘
//!                                                            ▼
//!                                               ┌──────────────────┐
//!                                               │  binary log      │
//!                                               │  (112-byte recs) │
//!                                               └────────┬─────────┘
//!                                                        ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  nvtrace replay                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ BinLogReader │──▶│ ReplayEngine │──▶│ DeviceSession│         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │                     ┌──────────────┐          │                 │
//! │                     │ Zone report  │◀─────────┘                 │
//! │                     └──────────────┘                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`trace`]: trace sources, the I/O event filter, the record encoder and
//!   the capture driver
//! - [`binlog`]: binary log writer, reader and record dump
//! - [`device`]: the [`device::DeviceSession`] / [`device::QueuePair`] seams,
//!   DMA buffers, the Linux passthrough adapter and an in-memory emulated device
//! - [`zns`]: zone report decoding and the paginated report session
//! - [`replay`]: submit/complete pairing, command translation and the replay engine
//! - [`cli`]: command-line argument parsing
//! - [`domain`]: core domain types (`LaneId`, `CommandId`, `NamespaceId`, `Lba`) and errors
//!
//! The record layout itself lives in `nvtrace-common` so the capture and replay
//! halves always agree on it.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Capture a trace snapshot into a binary log
//! nvtrace record -f trace.json -o run.bin
//!
//! # Report zones of the first zoned namespace
//! sudo nvtrace replay -f run.bin --zone-report
//!
//! # Replay the log
//! sudo nvtrace replay -f run.bin --reset-zones
//! ```

pub mod binlog;
pub mod cli;
pub mod device;
pub mod domain;
pub mod preflight;
pub mod replay;
pub mod trace;
pub mod zns;
