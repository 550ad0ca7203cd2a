pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod recorder;
pub mod runtime;
pub mod transport;
pub mod types;

use clap::{error::ErrorKind, Parser, Subcommand};
use config::{load_config, AppConfig, CliOverrides};
use errors::RunnerError;
use lifecycle::{dump_recording, ensure_facility, find_recording, start_recording, DumpContext};
use logging::RunLog;
use runtime::Runtime;
use serde_json::json;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use transport::ConnectionGuard;
use types::{Endpoint, RecordingId};

/// BSD `EX_USAGE`.
pub const EXIT_USAGE: i32 = 64;

#[derive(Debug, Clone, Parser)]
#[command(name = "flightrunner")]
#[command(about = "Start timed flight recordings on a remote process and download them")]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Transport scheme for the management endpoint (http or https).
    #[arg(long, global = true)]
    pub scheme: Option<String>,
    #[arg(long, global = true)]
    pub name: Option<String>,
    /// Event settings preset applied before the recording starts.
    #[arg(long, global = true)]
    pub preset: Option<String>,
    /// Fail instead of warning when the preset is not offered.
    #[arg(long, global = true, default_value_t = false)]
    pub require_preset: bool,
    #[arg(long, global = true)]
    pub poll_interval_ms: Option<u64>,
    /// Upper bound on the wait for a recording to finish.
    #[arg(long, global = true)]
    pub max_wait_ms: Option<u64>,
    /// Append JSONL run events to this file.
    #[arg(long, global = true)]
    pub run_log: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start a recording for `duration_ms` milliseconds and print its id.
    Start {
        /// Management endpoint as host:port.
        target: String,
        #[arg(value_parser = parse_positive)]
        duration_ms: u64,
    },
    /// Wait for a recording to finish and save its data to a local file.
    Dump {
        /// Management endpoint as host:port.
        target: String,
        #[arg(value_parser = parse_positive)]
        recording_id: u64,
        filename: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UsageFor {
    Start,
    Dump,
    Both,
}

fn parse_positive(value: &str) -> Result<u64, String> {
    match value.parse::<u64>() {
        Ok(0) => Err("must be greater than zero".to_string()),
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(e.to_string()),
    }
}

pub fn start_usage() -> String {
    [
        "Usage: flightrunner start <host:port> <duration_ms>",
        "   Connect to the management endpoint on 'host:port' to start recording for 'duration_ms' milliseconds",
    ]
    .join("\n")
}

pub fn dump_usage() -> String {
    [
        "Usage: flightrunner dump <host:port> <recording_id> <filename>",
        "   Connect to the management endpoint on 'host:port' and dump recording 'recording_id' to local filename 'filename'",
    ]
    .join("\n")
}

fn usage_text(which: UsageFor) -> String {
    match which {
        UsageFor::Start => start_usage(),
        UsageFor::Dump => dump_usage(),
        UsageFor::Both => format!("{}\n{}", start_usage(), dump_usage()),
    }
}

/// Global flags whose value is a separate argument unless written `--flag=value`.
const VALUE_FLAGS: &[&str] = &[
    "--config",
    "--scheme",
    "--name",
    "--preset",
    "--poll-interval-ms",
    "--max-wait-ms",
    "--run-log",
];

/// Index of the first argument that is neither a flag nor a flag's value.
fn command_position(args: &[OsString]) -> Option<usize> {
    let mut index = 1;
    while let Some(arg) = args.get(index) {
        let text = arg.to_string_lossy();
        if !text.starts_with('-') {
            return Some(index);
        }
        if text == "--" {
            return None;
        }
        index += if VALUE_FLAGS.contains(&text.as_ref()) { 2 } else { 1 };
    }
    None
}

/// Command names match case-insensitively, wherever the global flags put them.
fn normalize_command(args: &[OsString]) -> (Vec<OsString>, UsageFor) {
    let mut args = args.to_vec();
    let mut which = UsageFor::Both;
    if let Some(position) = command_position(&args) {
        let lowered = args[position].to_string_lossy().to_ascii_lowercase();
        match lowered.as_str() {
            "start" => which = UsageFor::Start,
            "dump" => which = UsageFor::Dump,
            _ => {}
        }
        if which != UsageFor::Both {
            args[position] = OsString::from(lowered);
        }
    }
    (args, which)
}

pub fn run() -> Result<i32, RunnerError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let runtime = Runtime::new();
    run_with_runtime(&args, &runtime)
}

pub fn run_with_runtime(args: &[OsString], runtime: &Runtime) -> Result<i32, RunnerError> {
    let (args, which) = normalize_command(args);
    let cli = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                runtime.terminal.write_line(error.to_string().trim_end())?;
                return Ok(0);
            }
            _ => {
                if args.len() > 1 {
                    runtime
                        .terminal
                        .write_diagnostic(error.to_string().trim_end())?;
                }
                runtime.terminal.write_diagnostic(&usage_text(which))?;
                return Ok(EXIT_USAGE);
            }
        },
    };

    let target = match &cli.command {
        Command::Start { target, .. } | Command::Dump { target, .. } => target,
    };
    let endpoint = match target.parse::<Endpoint>() {
        Ok(endpoint) => endpoint,
        Err(error) => {
            runtime.terminal.write_diagnostic(&error.to_string())?;
            runtime.terminal.write_diagnostic(&usage_text(which))?;
            return Ok(EXIT_USAGE);
        }
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        scheme: cli.scheme.clone(),
        recording_name: cli.name.clone(),
        preset: cli.preset.clone(),
        require_preset: cli.require_preset,
        poll_interval_ms: cli.poll_interval_ms,
        max_wait_ms: cli.max_wait_ms,
        run_log: cli.run_log.clone(),
    };
    let cfg = load_config(&overrides, runtime.file_system.as_ref())?;
    let log = RunLog::from_config(&cfg.log);

    let result = match &cli.command {
        Command::Start { duration_ms, .. } => {
            run_start(runtime, &cfg, &log, &endpoint, *duration_ms)
        }
        Command::Dump {
            recording_id,
            filename,
            ..
        } => run_dump(
            runtime,
            &cfg,
            &log,
            &endpoint,
            RecordingId(*recording_id),
            filename,
        ),
    };
    if let Err(error) = &result {
        log.error(
            "run.failed",
            json!({ "endpoint": endpoint.to_string(), "error": error.to_string() }),
        );
    }
    result
}

fn run_start(
    runtime: &Runtime,
    cfg: &AppConfig,
    log: &RunLog,
    endpoint: &Endpoint,
    duration_ms: u64,
) -> Result<i32, RunnerError> {
    runtime.terminal.write_diagnostic(&format!(
        "Attempting to connect to host {endpoint} to record for {duration_ms} milliseconds"
    ))?;
    log.info(
        "start.connecting",
        json!({ "endpoint": endpoint.to_string(), "duration_ms": duration_ms }),
    );

    let connection = ConnectionGuard::new(runtime.connector.connect(endpoint, &cfg.transport)?);
    let started = {
        let client = ensure_facility(&*connection, &cfg.facility, log)?;
        start_recording(
            &client,
            &cfg.recording,
            duration_ms,
            runtime.terminal.as_ref(),
            log,
        )?
    };
    connection.close()?;

    runtime.terminal.write_line(&started.id.to_string())?;
    Ok(0)
}

fn run_dump(
    runtime: &Runtime,
    cfg: &AppConfig,
    log: &RunLog,
    endpoint: &Endpoint,
    id: RecordingId,
    filename: &Path,
) -> Result<i32, RunnerError> {
    runtime.terminal.write_diagnostic(&format!(
        "Attempting to connect to host {endpoint} to dump recording id {id}; results will be stored to local file {}",
        filename.display()
    ))?;
    log.info(
        "dump.connecting",
        json!({
            "endpoint": endpoint.to_string(),
            "id": id.0,
            "path": filename.display().to_string(),
        }),
    );

    let connection = ConnectionGuard::new(runtime.connector.connect(endpoint, &cfg.transport)?);
    let summary = {
        let client = ensure_facility(&*connection, &cfg.facility, log)?;
        let lookup = find_recording(&client, id)?;
        let ctx = DumpContext {
            clock: runtime.clock.as_ref(),
            file_system: runtime.file_system.as_ref(),
            terminal: runtime.terminal.as_ref(),
            dump: &cfg.dump,
            log,
        };
        dump_recording(&client, lookup, id, filename, &ctx)?
    };
    connection.close()?;

    runtime.terminal.write_diagnostic(&format!(
        "Wrote {} bytes to {}",
        summary.bytes_written,
        summary.path.display()
    ))?;
    Ok(0)
}
