//! # nvtrace - Main Entry Point
//!
//! Two subcommands:
//! - **record**: capture a trace source into a binary log
//! - **replay**: replay a binary log, or report zones, against an NVMe device

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

use nvtrace::binlog::{dump_records, BinLogReader, BinLogWriter};
use nvtrace::cli::{Args, Command, RecordArgs, ReplayArgs};
use nvtrace::device::{
    DeviceSession, EmulatedConfig, EmulatedSession, NamespaceInfo, PassthruSession,
};
use nvtrace::domain::{CliError, DeviceError, LogError};
use nvtrace::preflight::{check_input_exists, run_replay_checks};
use nvtrace::replay::{ReplayEngine, ReplayOptions};
use nvtrace::trace::{capture, print_lane_sizes, SnapshotSource, TraceSource};
use nvtrace::zns::ZoneReportSession;
use nvtrace_common::BinRecord;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

// Shape of the --dry-run device
const DRY_RUN_ZONES: u64 = 64;
const DRY_RUN_ZONE_SIZE: u64 = 0x8000;

fn main() {
    env_logger::init();
    // clap exits with EXIT_USAGE on its own usage errors
    let args = Args::parse();
    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<CliError>().is_some() {
        return EXIT_USAGE;
    }
    if matches!(err.downcast_ref::<DeviceError>(), Some(DeviceError::PermissionDenied(_))) {
        return EXIT_NOPERM;
    }
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Record(args) => record(&args),
        Command::Replay(args) => replay(&args),
    }
}

fn record(args: &RecordArgs) -> Result<()> {
    let spec = args.source()?;
    let lane = args.lane()?;
    let output = args.output_path()?;
    let trace_path = spec.trace_path();
    check_input_exists(&trace_path, "Trace file")?;

    let mut source = SnapshotSource::open(&trace_path, lane)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "TSC Rate: {}", source.flags().tsc_rate)?;
    print_lane_sizes(&source, lane, &mut stdout)?;

    let mut writer = BinLogWriter::create(&output)?;
    let stats = capture(&mut source, &mut writer)?;
    let written = writer.finish()?;
    writeln!(stdout, "Output .bin file: {}", output.display())?;
    info!("{} of {} events written", written, stats.seen);

    if args.dump {
        let mut reader = BinLogReader::open(&output)?;
        dump_records(reader.records()?, &mut stdout)?;
    }
    Ok(())
}

/// Read the whole log; a truncated log is reported and its whole records kept
fn load_records(path: &Path) -> Result<Vec<BinRecord>> {
    let mut reader = match BinLogReader::open(path) {
        Ok(reader) => reader,
        Err(e @ LogError::TruncatedLog { .. }) => {
            warn!("{}: {e}", path.display());
            BinLogReader::open_lenient(path)?
        }
        Err(e) => return Err(e.into()),
    };
    let records = reader
        .read_all()
        .with_context(|| format!("Failed to read {}", path.display()))?;
    info!("{} records in {}", records.len(), path.display());
    Ok(records)
}

fn replay(args: &ReplayArgs) -> Result<()> {
    check_input_exists(&args.input, "Binary log")?;
    let records = load_records(&args.input)?;
    if args.dump {
        dump_records(records.iter().copied().map(Ok), &mut io::stdout().lock())?;
    }

    println!("Initializing NVMe Controllers");
    if args.dry_run {
        let session = EmulatedSession::new(EmulatedConfig::zoned(DRY_RUN_ZONES, DRY_RUN_ZONE_SIZE));
        drive(&session, args, &records)
    } else {
        run_replay_checks(&args.input, args.device.as_deref())?;
        let session = PassthruSession::discover(args.device.as_deref())?;
        drive(&session, args, &records)
    }
}

fn print_attached<S: DeviceSession + ?Sized>(session: &S) {
    for ctrlr in session.controllers() {
        println!("Attached to {}", ctrlr.label());
    }
    for ns in session.namespaces() {
        println!("  Namespace ID: {} size: {}GB", ns.id.0, ns.size_bytes() / 1_000_000_000);
    }
}

/// Namespace a replay runs on: the first one, or the first zoned one for a zone report
fn target_namespace<'s, S: DeviceSession + ?Sized>(
    session: &'s S,
    zone_report: bool,
) -> Result<&'s NamespaceInfo> {
    let mut namespaces = session.namespaces().iter();
    let ns = if zone_report {
        namespaces.find(|ns| ns.is_zoned()).or_else(|| session.namespaces().first())
    } else {
        namespaces.next()
    };
    Ok(ns.ok_or(DeviceError::NoDevice)?)
}

fn drive<S: DeviceSession + ?Sized>(session: &S, args: &ReplayArgs, records: &[BinRecord]) -> Result<()> {
    print_attached(session);
    let ns = target_namespace(session, args.zone_report)?;
    println!("Initialization complete.");

    let start = Instant::now();
    if args.zone_report {
        let mut report = ZoneReportSession::new(session, ns, args.zones, args.poll_timeout())?;
        let printed = report.run(&mut io::stdout().lock())?;
        info!("Reported {printed} zones of {}", ns.id);
        println!("Total time: {:.6} s", start.elapsed().as_secs_f64());
        return Ok(());
    }

    let options = ReplayOptions {
        paced: args.paced,
        reset_zones: args.reset_zones,
        poll_timeout: args.poll_timeout(),
    };
    let stats = ReplayEngine::new(session, ns, options).replay(records)?;
    println!("Total time: {:.6} s", start.elapsed().as_secs_f64());
    println!("{stats}");
    Ok(())
}
