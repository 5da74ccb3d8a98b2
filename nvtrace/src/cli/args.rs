//! CLI argument definitions

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Args as ClapArgs, Parser, Subcommand};
use nvtrace_common::MAX_LCORE;

use crate::domain::{CliError, LaneId};
use crate::trace::SourceSpec;

#[derive(Parser, Debug)]
#[command(
    name = "nvtrace",
    about = "Capture NVMe I/O traces and replay them against NVMe/ZNS devices",
    after_help = "\
EXAMPLES:
    nvtrace record -s nvmf -i 1                  Capture a live trace by shm id
    nvtrace record -f trace.json -o run.bin      Capture from a trace snapshot
    sudo nvtrace replay -f run.bin               Replay a log on the first namespace
    sudo nvtrace replay -f run.bin -z -n 8       Report the first 8 zones"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture I/O submit/complete events into a binary log
    Record(RecordArgs),
    /// Replay a binary log against an NVMe device
    Replay(ReplayArgs),
}

#[derive(ClapArgs, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["shm_name", "file"])))]
#[command(group(ArgGroup::new("shm_target").args(["shm_id", "pid"])))]
pub struct RecordArgs {
    /// Shared memory name of the traced application
    #[arg(short = 's', long, requires = "shm_target")]
    pub shm_name: Option<String>,

    /// Shared memory id of the traced application (with -s)
    #[arg(short = 'i', long, requires = "shm_name")]
    pub shm_id: Option<i32>,

    /// Process id of the traced application (with -s)
    #[arg(short, long, requires = "shm_name")]
    pub pid: Option<i32>,

    /// Trace snapshot file
    #[arg(short, long, value_name = "FILE", conflicts_with = "shm_name")]
    pub file: Option<PathBuf>,

    /// Only capture events of this lane
    #[arg(short = 'c', long, value_name = "LCORE")]
    pub lcore: Option<u32>,

    /// Binary log to write (default derived from the source)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print every written record after capture
    #[arg(long)]
    pub dump: bool,
}

impl RecordArgs {
    /// Trace source selected by the flags
    ///
    /// # Errors
    /// Returns [`CliError::Usage`] if no complete source was given.
    pub fn source(&self) -> Result<SourceSpec, CliError> {
        match (&self.shm_name, self.shm_id, self.pid, &self.file) {
            (Some(name), Some(id), None, None) => Ok(SourceSpec::Shm { name: name.clone(), id }),
            (Some(name), None, Some(pid), None) => Ok(SourceSpec::Pid { name: name.clone(), pid }),
            (None, None, None, Some(path)) => Ok(SourceSpec::File(path.clone())),
            _ => Err(CliError::Usage(
                "use -s NAME with exactly one of -i ID or -p PID, or -f FILE".into(),
            )),
        }
    }

    /// Lane filter, validated against the maximum lane count.
    /// `MAX_LCORE` itself selects every lane.
    ///
    /// # Errors
    /// Returns [`CliError::Usage`] if the lane exceeds the maximum.
    pub fn lane(&self) -> Result<Option<LaneId>, CliError> {
        match self.lcore {
            Some(lcore) if lcore > MAX_LCORE => Err(CliError::Usage(format!(
                "lcore {lcore} exceeds the maximum of {MAX_LCORE}"
            ))),
            Some(MAX_LCORE) | None => Ok(None),
            Some(lcore) => Ok(Some(LaneId(lcore))),
        }
    }

    /// Output path, explicit or derived from the source
    ///
    /// # Errors
    /// Returns [`CliError::Usage`] if no complete source was given.
    pub fn output_path(&self) -> Result<PathBuf, CliError> {
        match &self.output {
            Some(path) => Ok(path.clone()),
            None => Ok(self.source()?.default_output()),
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct ReplayArgs {
    /// Binary log to replay
    #[arg(short = 'f', long, value_name = "FILE")]
    pub input: PathBuf,

    /// Report zones instead of replaying
    #[arg(short = 'z', long)]
    pub zone_report: bool,

    /// Number of zones to report (default: all)
    #[arg(short = 'n', long, value_name = "N", requires = "zone_report")]
    pub zones: Option<u64>,

    /// Only use this NVMe block device
    #[arg(short, long, value_name = "DEV")]
    pub device: Option<PathBuf>,

    /// Replay against an in-memory zoned device instead of hardware
    #[arg(long, conflicts_with = "device")]
    pub dry_run: bool,

    /// Print the decoded records before replay
    #[arg(long)]
    pub dump: bool,

    /// Issue commands at their recorded relative timestamps
    #[arg(long)]
    pub paced: bool,

    /// Reset a zone before a write that starts at its first LBA
    #[arg(long)]
    pub reset_zones: bool,

    /// Upper bound on every completion poll loop
    #[arg(long, value_name = "MS", default_value = "5000")]
    pub poll_timeout_ms: u64,
}

impl ReplayArgs {
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("nvtrace").chain(argv.iter().copied()))
    }

    fn record(argv: &[&str]) -> RecordArgs {
        match parse(argv).unwrap().command {
            Command::Record(args) => args,
            Command::Replay(_) => panic!("expected record"),
        }
    }

    fn replay(argv: &[&str]) -> ReplayArgs {
        match parse(argv).unwrap().command {
            Command::Replay(args) => args,
            Command::Record(_) => panic!("expected replay"),
        }
    }

    #[test]
    fn test_record_shm_id() {
        let args = record(&["record", "-s", "nvmf", "-i", "1"]);
        assert_eq!(args.source().unwrap(), SourceSpec::Shm { name: "nvmf".into(), id: 1 });
        assert_eq!(args.output_path().unwrap(), PathBuf::from("nvmf_1.bin"));
    }

    #[test]
    fn test_record_pid_with_output() {
        let args = record(&["record", "-s", "app", "-p", "77", "-o", "out.bin"]);
        assert_eq!(args.source().unwrap(), SourceSpec::Pid { name: "app".into(), pid: 77 });
        assert_eq!(args.output_path().unwrap(), PathBuf::from("out.bin"));
    }

    #[test]
    fn test_record_file() {
        let args = record(&["record", "-f", "trace.json"]);
        assert_eq!(args.source().unwrap(), SourceSpec::File("trace.json".into()));
        assert_eq!(args.output_path().unwrap(), PathBuf::from("trace.json.bin"));
    }

    #[test]
    fn test_record_requires_a_source() {
        assert!(parse(&["record"]).is_err());
    }

    #[test]
    fn test_record_shm_and_file_conflict() {
        assert!(parse(&["record", "-s", "nvmf", "-i", "1", "-f", "trace.json"]).is_err());
    }

    #[test]
    fn test_record_shm_needs_id_or_pid() {
        assert!(parse(&["record", "-s", "nvmf"]).is_err());
        assert!(parse(&["record", "-s", "nvmf", "-i", "1", "-p", "2"]).is_err());
        assert!(parse(&["record", "-f", "t.json", "-i", "1"]).is_err());
    }

    #[test]
    fn test_record_lane_bound() {
        let args = record(&["record", "-f", "t.json", "-c", "127"]);
        assert_eq!(args.lane().unwrap(), Some(LaneId(127)));
        let args = record(&["record", "-f", "t.json", "-c", "128"]);
        assert_eq!(args.lane().unwrap(), None);
        let args = record(&["record", "-f", "t.json", "-c", "129"]);
        assert!(matches!(args.lane(), Err(CliError::Usage(_))));
    }

    #[test]
    fn test_replay_defaults() {
        let args = replay(&["replay", "-f", "run.bin"]);
        assert_eq!(args.input, PathBuf::from("run.bin"));
        assert!(!args.zone_report);
        assert_eq!(args.zones, None);
        assert_eq!(args.poll_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_replay_input_required() {
        assert!(parse(&["replay", "-z"]).is_err());
    }

    #[test]
    fn test_zone_count_requires_zone_report() {
        assert!(parse(&["replay", "-f", "run.bin", "-n", "4"]).is_err());
        let args = replay(&["replay", "-f", "run.bin", "-z", "-n", "4"]);
        assert_eq!(args.zones, Some(4));
    }

    #[test]
    fn test_dry_run_conflicts_with_device() {
        assert!(parse(&["replay", "-f", "run.bin", "--dry-run", "-d", "/dev/nvme0n1"]).is_err());
    }
}
