//! Structured error types for nvtrace
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::path::PathBuf;
use std::time::Duration;

use nvtrace_common::NameTooLong;
use thiserror::Error;

use super::types::NamespaceId;
use crate::device::CompletionStatus;

/// Invalid flag combinations that clap's declarative rules cannot express
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid arguments: {0}")]
    Usage(String),
}

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to open trace source {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse trace snapshot: {0}")]
    ParseFailed(#[from] serde_json::Error),

    #[error("Trace entry references unknown tracepoint id {0}")]
    UnknownTpoint(u16),

    #[error("Tracepoint {name:?} does not fit the record: {source}")]
    NameTooLong {
        name: String,
        #[source]
        source: NameTooLong,
    },
}

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Failed to open binary log {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Truncated log: {len} bytes is not a multiple of the {record_size}-byte record")]
    TruncatedLog { len: u64, record_size: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Log(#[from] LogError),
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No NVMe namespaces found")]
    NoDevice,

    #[error("Namespace {0} not found")]
    NamespaceNotFound(NamespaceId),

    #[error("Permission denied opening {0}")]
    PermissionDenied(PathBuf),

    #[error("Failed to allocate a {len}-byte DMA buffer")]
    BufferAllocFailed { len: usize },

    #[error("Queue full: {depth} commands already outstanding")]
    QueueFull { depth: u32 },

    #[error("Timed out after {elapsed:?} with {outstanding} command(s) outstanding")]
    PollTimeout { elapsed: Duration, outstanding: u32 },

    #[error("Completion for {opc:#04x} did not return its data buffer")]
    MissingBuffer { opc: u8 },

    #[error("Identify failed for {path}: {error}")]
    IdentifyFailed { path: PathBuf, error: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ZoneError {
    #[error("Namespace {0} is not zoned")]
    NotZoned(NamespaceId),

    #[error("Report buffer of {len} bytes cannot hold zone descriptor {index}")]
    BufferTooShort { index: usize, len: usize },

    #[error("Zone report failed with status {0}")]
    ReportFailed(CompletionStatus),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Device(#[from] DeviceError),
}
