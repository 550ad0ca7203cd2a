use crate::config::{DumpConfig, FacilityConfig, RecordingConfig};
use crate::errors::RunnerError;
use crate::logging::RunLog;
use crate::recorder::FlightRecorderClient;
use crate::runtime::{Clock, FileSystem, Terminal};
use crate::transport::ManagementConnection;
use crate::types::{
    DumpSummary, Lookup, PresetOutcome, RecordingId, RecordingInfo, RecordingOptions,
    StartedRecording,
};
use serde_json::json;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

/// Grace added on top of a recording's own duration when no explicit wait
/// bound is configured.
pub const WAIT_GRACE: Duration = Duration::from_secs(5 * 60);
/// Wait bound for recordings that report no duration.
pub const UNBOUNDED_RECORDING_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Makes sure every required management object is registered, creating and
/// registering the missing ones, and returns a client for the recorder.
pub fn ensure_facility<'a>(
    connection: &'a dyn ManagementConnection,
    facility: &'a FacilityConfig,
    log: &RunLog,
) -> Result<FlightRecorderClient<'a>, RunnerError> {
    for object in facility.required_objects() {
        if connection.is_registered(&object.name)? {
            continue;
        }
        log.info(
            "facility.register.started",
            json!({ "name": object.name, "class": object.class }),
        );
        connection.create_object(&object.class, &object.name)?;
        connection.invoke(&object.name, &facility.register_operation, Vec::new())?;
        log.info("facility.register.done", json!({ "name": object.name }));
    }
    Ok(FlightRecorderClient::new(
        connection,
        facility.recorder.name.as_str(),
    ))
}

/// Applies the settings of the preset whose name or label is `wanted`
/// (exact, case-sensitive match). A missing preset is reported, not hidden.
pub fn apply_preset(
    client: &FlightRecorderClient<'_>,
    id: RecordingId,
    wanted: &str,
) -> Result<PresetOutcome, RunnerError> {
    let presets = client.presets()?;
    match presets.iter().find(|preset| preset.matches(wanted)) {
        Some(preset) => {
            client.set_event_settings(id, &preset.settings)?;
            Ok(PresetOutcome::Applied {
                name: preset.name.clone(),
                label: preset.label.clone(),
            })
        }
        None => Ok(PresetOutcome::NoMatch {
            wanted: wanted.to_string(),
            available: presets.into_iter().map(|preset| preset.name).collect(),
        }),
    }
}

pub fn start_recording(
    client: &FlightRecorderClient<'_>,
    recording: &RecordingConfig,
    duration_ms: u64,
    terminal: &dyn Terminal,
    log: &RunLog,
) -> Result<StartedRecording, RunnerError> {
    if duration_ms == 0 {
        return Err(RunnerError::Usage(
            "duration must be a positive number of milliseconds".to_string(),
        ));
    }

    let id = client.create_recording()?;
    log.info(
        "recording.created",
        json!({ "id": id.0, "name": recording.name }),
    );

    let defaults = client.recording_options(id)?;
    let mut options = defaults.with_duration_ms(duration_ms);
    options.set(RecordingOptions::NAME_KEY, recording.name.clone());
    client.set_recording_options(id, &options.changed_from(&defaults))?;

    let preset = apply_preset(client, id, &recording.preset)?;
    match &preset {
        PresetOutcome::Applied { name, label } => {
            let shown = label.as_deref().unwrap_or(name);
            terminal.write_diagnostic(&format!("Set event defaults to '{shown}' preset"))?;
            log.info("recording.preset.applied", json!({ "id": id.0, "preset": name }));
        }
        PresetOutcome::NoMatch { wanted, available } => {
            log.warn(
                "recording.preset.no_match",
                json!({ "id": id.0, "wanted": wanted, "available": available }),
            );
            if recording.require_preset {
                return Err(RunnerError::PresetNotFound(wanted.clone()));
            }
            terminal.write_diagnostic(&format!(
                "Warning: preset '{wanted}' not found (available: {}); keeping default event settings",
                available.join(", ")
            ))?;
        }
    }

    client.start(id)?;
    terminal.write_diagnostic("Started recording...")?;
    log.info(
        "recording.started",
        json!({ "id": id.0, "duration_ms": duration_ms }),
    );
    Ok(StartedRecording { id, preset })
}

/// Scans the facility's current recordings for `id`.
pub fn find_recording(
    client: &FlightRecorderClient<'_>,
    id: RecordingId,
) -> Result<Lookup, RunnerError> {
    Ok(client
        .recordings()?
        .into_iter()
        .find(|info| info.id == id)
        .map_or(Lookup::NotFound, Lookup::Found))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl WaitPolicy {
    pub fn for_recording(dump: &DumpConfig, info: &RecordingInfo) -> Self {
        let max_wait = if dump.max_wait_ms > 0 {
            Duration::from_millis(dump.max_wait_ms)
        } else {
            match info.duration_secs {
                Some(secs) => Duration::from_secs(secs).saturating_add(WAIT_GRACE),
                None => UNBOUNDED_RECORDING_WAIT,
            }
        };
        Self {
            poll_interval: Duration::from_millis(dump.poll_interval_ms),
            max_wait,
        }
    }
}

/// Polls at a fixed interval until the recording stops running. Returns the
/// final snapshot and the number of waits taken.
pub fn wait_for_completion(
    client: &FlightRecorderClient<'_>,
    initial: RecordingInfo,
    clock: &dyn Clock,
    policy: WaitPolicy,
    log: &RunLog,
) -> Result<(RecordingInfo, u64), RunnerError> {
    let started = clock.now();
    let mut current = initial;
    let mut polls = 0u64;

    while current.state.is_running() {
        let waited = clock
            .now()
            .duration_since(started)
            .unwrap_or(Duration::ZERO);
        if waited >= policy.max_wait {
            log.error(
                "dump.wait.timed_out",
                json!({ "id": current.id.0, "waited_ms": waited.as_millis() as u64 }),
            );
            return Err(RunnerError::WaitTimedOut {
                id: current.id.0,
                waited_ms: waited.as_millis() as u64,
            });
        }
        clock.sleep_until(clock.now() + policy.poll_interval)?;
        polls += 1;

        current = find_recording(client, current.id)?
            .found()
            .ok_or(RunnerError::RecordingNotFound(current.id.0))?;
        log.info(
            "dump.wait.poll",
            json!({ "id": current.id.0, "polls": polls, "state": current.state.as_str() }),
        );
    }

    Ok((current, polls))
}

/// Copies everything from `from` into `to` through a fixed-size buffer and
/// returns the byte count.
pub fn copy_stream(
    from: &mut dyn Read,
    to: &mut dyn Write,
    buffer_bytes: usize,
) -> io::Result<u64> {
    let mut buf = vec![0u8; buffer_bytes.max(1)];
    let mut total = 0u64;
    loop {
        let n = match from.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        to.write_all(&buf[..n])?;
        total += n as u64;
    }
    to.flush()?;
    Ok(total)
}

pub struct DumpContext<'a> {
    pub clock: &'a dyn Clock,
    pub file_system: &'a dyn FileSystem,
    pub terminal: &'a dyn Terminal,
    pub dump: &'a DumpConfig,
    pub log: &'a RunLog,
}

/// Waits for the recording to finish, then streams its data to `output`,
/// replacing any existing file.
pub fn dump_recording(
    client: &FlightRecorderClient<'_>,
    lookup: Lookup,
    requested: RecordingId,
    output: &Path,
    ctx: &DumpContext<'_>,
) -> Result<DumpSummary, RunnerError> {
    let Lookup::Found(info) = lookup else {
        ctx.log.error("dump.not_found", json!({ "id": requested.0 }));
        return Err(RunnerError::RecordingNotFound(requested.0));
    };

    let policy = WaitPolicy::for_recording(ctx.dump, &info);
    let (info, polls) = wait_for_completion(client, info, ctx.clock, policy, ctx.log)?;
    ctx.terminal.write_diagnostic(&format!(
        "Finished recording. Saving to {}",
        output.display()
    ))?;

    let mut stream = client.open_stream(info.id)?;
    let mut file = ctx.file_system.create(output)?;
    let bytes_written = copy_stream(&mut stream, file.as_mut(), ctx.dump.buffer_bytes)
        .map_err(|e| RunnerError::Io(format!("copying recording {}: {e}", info.id)))?;
    drop(file);
    stream.close()?;

    ctx.log.info(
        "dump.written",
        json!({
            "id": info.id.0,
            "path": output.display().to_string(),
            "bytes": bytes_written,
            "polls": polls,
        }),
    );
    Ok(DumpSummary {
        id: info.id,
        path: output.to_path_buf(),
        bytes_written,
        polls,
    })
}
