use flightrunner::config::AppConfig;
use flightrunner::errors::RunnerError;
use flightrunner::lifecycle::{ensure_facility, start_recording};
use flightrunner::logging::RunLog;
use flightrunner::runtime::{
    FakeClock, FakeConnector, FakeFileSystem, FakeTerminal, Runtime,
};
use flightrunner::transport::fake::FakeConnection;
use flightrunner::types::{PresetOutcome, RecordingId};
use std::ffi::OsString;
use std::sync::Arc;

const RECORDER: &str = "jdk.management.jfr:type=FlightRecorder";
const COORDINATOR: &str = "com.sun.management:type=MissionControl";

fn args(values: &[&str]) -> Vec<OsString> {
    std::iter::once("flightrunner")
        .chain(values.iter().copied())
        .map(OsString::from)
        .collect()
}

fn facility_with_profiling() -> FakeConnection {
    let connection = FakeConnection::with_registered(&[RECORDER]);
    connection.add_preset("default", Some("Continuous"), &[("jdk.CPULoad#period", "1 s")]);
    connection.add_preset(
        "profile",
        Some("Profiling"),
        &[
            ("jdk.ExecutionSample#period", "10 ms"),
            ("jdk.ThreadDump#period", "10 s"),
        ],
    );
    connection
}

fn runtime_for(connector: FakeConnector, terminal: FakeTerminal, fs: FakeFileSystem) -> Runtime {
    Runtime {
        clock: Arc::new(FakeClock::default()),
        file_system: Arc::new(fs),
        terminal: Arc::new(terminal),
        connector: Arc::new(connector),
    }
}

#[test]
fn start_prints_only_the_id_on_stdout() {
    let connection = facility_with_profiling();
    let connector = FakeConnector::new(connection.clone());
    let terminal = FakeTerminal::default();
    let runtime = runtime_for(connector.clone(), terminal.clone(), FakeFileSystem::default());

    let code = flightrunner::run_with_runtime(&args(&["start", "localhost:9999", "30000"]), &runtime)
        .expect("start succeeds");

    assert_eq!(code, 0);
    assert_eq!(terminal.written_lines(), vec!["1".to_string()]);
    assert_eq!(connector.endpoints(), vec!["localhost:9999".to_string()]);
    let diagnostics = terminal.diagnostics().join("\n");
    assert!(diagnostics.contains("Attempting to connect to host localhost:9999"));
    assert!(diagnostics.contains("Set event defaults to 'Profiling' preset"));
    assert!(diagnostics.contains("Started recording..."));
    assert_eq!(connection.close_count(), 1);
}

#[test]
fn started_recording_carries_duration_name_and_preset_settings() {
    let connection = facility_with_profiling();
    let cfg = AppConfig::default();
    let terminal = FakeTerminal::default();

    let client = ensure_facility(&connection, &cfg.facility, &RunLog::disabled()).expect("facility");
    let started = start_recording(&client, &cfg.recording, 30_000, &terminal, &RunLog::disabled())
        .expect("started");

    assert_eq!(started.id, RecordingId(1));
    assert_eq!(
        started.preset,
        PresetOutcome::Applied {
            name: "profile".to_string(),
            label: Some("Profiling".to_string()),
        }
    );
    let recording = connection.recording(1).expect("recording exists");
    assert_eq!(recording.state, "RUNNING");
    assert_eq!(recording.name, "My Recording");
    assert_eq!(recording.options.get("duration").map(String::as_str), Some("30000 ms"));
    assert_eq!(recording.options.get("disk").map(String::as_str), Some("true"));
    assert_eq!(
        recording.settings.get("jdk.ExecutionSample#period").map(String::as_str),
        Some("10 ms")
    );
}

#[test]
fn options_are_applied_before_the_recording_starts() {
    let connection = facility_with_profiling();
    let cfg = AppConfig::default();
    let client = ensure_facility(&connection, &cfg.facility, &RunLog::disabled()).expect("facility");
    start_recording(
        &client,
        &cfg.recording,
        1_000,
        &FakeTerminal::default(),
        &RunLog::disabled(),
    )
    .expect("started");

    let calls = connection.calls();
    let position = |op: &str| calls.iter().position(|c| c == op).expect(op);
    assert!(position("setRecordingOptions") < position("startRecording"));
    assert!(position("setRecordingSettings") < position("startRecording"));
}

#[test]
fn only_changed_options_are_sent_back_to_the_recorder() {
    let connection = facility_with_profiling();
    let cfg = AppConfig::default();
    let client = ensure_facility(&connection, &cfg.facility, &RunLog::disabled()).expect("facility");

    start_recording(
        &client,
        &cfg.recording,
        30_000,
        &FakeTerminal::default(),
        &RunLog::disabled(),
    )
    .expect("recorder accepts the options");

    let sent = connection.sent_options();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["duration", "name"]
    );
    let recording = connection.recording(1).expect("recording");
    assert_eq!(recording.options.get("maxAge").map(String::as_str), Some("0"));
    assert!(!recording.options.contains_key("destination"));
}

#[test]
fn recorder_rejects_echoed_defaults() {
    let connection = facility_with_profiling();
    let cfg = AppConfig::default();
    let client = ensure_facility(&connection, &cfg.facility, &RunLog::disabled()).expect("facility");
    let id = client.create_recording().expect("created");
    let everything = client.recording_options(id).expect("options");

    let err = client
        .set_recording_options(id, &everything.with_duration_ms(1_000))
        .expect_err("maxAge 0 and an empty destination are refused");
    assert!(matches!(
        err,
        RunnerError::Remote { status: 400, ref error_type, .. }
            if error_type == "java.lang.IllegalArgumentException"
    ));
}

#[test]
fn preset_is_found_by_configuration_name_too() {
    let connection = facility_with_profiling();
    let mut cfg = AppConfig::default();
    cfg.recording.preset = "default".to_string();
    let terminal = FakeTerminal::default();
    let client = ensure_facility(&connection, &cfg.facility, &RunLog::disabled()).expect("facility");

    let started = start_recording(&client, &cfg.recording, 1_000, &terminal, &RunLog::disabled())
        .expect("started");

    assert_eq!(
        started.preset,
        PresetOutcome::Applied {
            name: "default".to_string(),
            label: Some("Continuous".to_string()),
        }
    );
    assert_eq!(
        connection.recording(1).expect("recording").settings.get("jdk.CPULoad#period").map(String::as_str),
        Some("1 s")
    );
    assert!(terminal
        .diagnostics()
        .iter()
        .any(|line| line.contains("Set event defaults to 'Continuous' preset")));
}

#[test]
fn preset_names_match_case_sensitively() {
    let connection = FakeConnection::with_registered(&[RECORDER]);
    connection.add_preset("profiling", None, &[("jdk.ExecutionSample#period", "20 ms")]);
    let cfg = AppConfig::default();
    let terminal = FakeTerminal::default();
    let client = ensure_facility(&connection, &cfg.facility, &RunLog::disabled()).expect("facility");

    let started = start_recording(&client, &cfg.recording, 5_000, &terminal, &RunLog::disabled())
        .expect("missing preset is only a warning by default");

    match started.preset {
        PresetOutcome::NoMatch { wanted, available } => {
            assert_eq!(wanted, "Profiling");
            assert_eq!(available, vec!["profiling".to_string()]);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(connection.recording(1).expect("recording").settings.is_empty());
    assert_eq!(connection.recording(1).expect("recording").state, "RUNNING");
    assert!(terminal
        .diagnostics()
        .iter()
        .any(|line| line.contains("preset 'Profiling' not found")));
}

#[test]
fn required_preset_missing_fails_before_start_and_prints_no_id() {
    let connection = FakeConnection::with_registered(&[RECORDER]);
    let connector = FakeConnector::new(connection.clone());
    let terminal = FakeTerminal::default();
    let runtime = runtime_for(connector, terminal.clone(), FakeFileSystem::default());

    let err = flightrunner::run_with_runtime(
        &args(&["--require-preset", "start", "localhost:9999", "30000"]),
        &runtime,
    )
    .expect_err("preset required");

    assert!(matches!(err, RunnerError::PresetNotFound(name) if name == "Profiling"));
    assert!(terminal.written_lines().is_empty());
    assert!(!connection.calls().contains(&"startRecording".to_string()));
    assert_eq!(connection.close_count(), 1);
}

#[test]
fn missing_facility_objects_are_created_and_registered_once() {
    let connection = FakeConnection::with_registered(&[]);
    connection.allow_create(COORDINATOR);
    connection.allow_create(RECORDER);
    let mut cfg = AppConfig::default();
    cfg.facility.coordinator = Some(flightrunner::types::ManagedObject {
        name: COORDINATOR.to_string(),
        class: "com.sun.management.MissionControl".to_string(),
    });

    ensure_facility(&connection, &cfg.facility, &RunLog::disabled()).expect("first");
    ensure_facility(&connection, &cfg.facility, &RunLog::disabled()).expect("idempotent");

    assert_eq!(
        connection.created(),
        vec![COORDINATOR.to_string(), RECORDER.to_string()]
    );
    let registrations = connection
        .calls()
        .iter()
        .filter(|call| call.as_str() == "registerMBeans")
        .count();
    assert_eq!(registrations, 2);
}

#[test]
fn facility_creation_failure_propagates() {
    let connection = FakeConnection::with_registered(&[]);
    let cfg = AppConfig::default();
    let err = ensure_facility(&connection, &cfg.facility, &RunLog::disabled())
        .err()
        .expect("creation refused");
    assert!(matches!(err, RunnerError::Remote { status: 500, .. }));
}

#[test]
fn remote_failure_mid_workflow_closes_connection_and_prints_nothing() {
    let connection = facility_with_profiling();
    connection.fail_on("startRecording", "recorder disabled");
    let terminal = FakeTerminal::default();
    let runtime = runtime_for(
        FakeConnector::new(connection.clone()),
        terminal.clone(),
        FakeFileSystem::default(),
    );

    let err = flightrunner::run_with_runtime(&args(&["start", "localhost:9999", "30000"]), &runtime)
        .expect_err("start fails");

    assert!(matches!(err, RunnerError::Remote { .. }));
    assert!(terminal.written_lines().is_empty());
    assert_eq!(connection.close_count(), 1);
}

#[test]
fn invalid_duration_exits_64_without_connecting() {
    let connector = FakeConnector::new(facility_with_profiling());
    let terminal = FakeTerminal::default();
    let runtime = runtime_for(connector.clone(), terminal.clone(), FakeFileSystem::default());

    for duration in ["0", "-5", "soon"] {
        let code = flightrunner::run_with_runtime(
            &args(&["start", "localhost:9999", duration]),
            &runtime,
        )
        .expect("usage is not an error");
        assert_eq!(code, 64, "duration {duration}");
    }
    assert!(connector.endpoints().is_empty());
    assert!(terminal.written_lines().is_empty());
    assert!(terminal
        .diagnostics()
        .iter()
        .any(|line| line.contains("Usage: flightrunner start")));
}

#[test]
fn malformed_target_exits_64_without_connecting() {
    let connector = FakeConnector::new(facility_with_profiling());
    let runtime = runtime_for(connector.clone(), FakeTerminal::default(), FakeFileSystem::default());

    let code = flightrunner::run_with_runtime(&args(&["start", "localhost", "1000"]), &runtime)
        .expect("usage");
    assert_eq!(code, 64);
    assert!(connector.endpoints().is_empty());
}

#[test]
fn no_arguments_print_both_usages() {
    let terminal = FakeTerminal::default();
    let runtime = runtime_for(FakeConnector::default(), terminal.clone(), FakeFileSystem::default());

    let code = flightrunner::run_with_runtime(&args(&[]), &runtime).expect("usage");
    assert_eq!(code, 64);
    let text = terminal.diagnostics().join("\n");
    assert!(text.contains("Usage: flightrunner start"));
    assert!(text.contains("Usage: flightrunner dump"));
}

#[test]
fn uppercase_command_is_accepted() {
    let connection = facility_with_profiling();
    let terminal = FakeTerminal::default();
    let runtime = runtime_for(
        FakeConnector::new(connection),
        terminal.clone(),
        FakeFileSystem::default(),
    );

    let code = flightrunner::run_with_runtime(&args(&["START", "localhost:9999", "100"]), &runtime)
        .expect("start");
    assert_eq!(code, 0);
    assert_eq!(terminal.written_lines(), vec!["1".to_string()]);
}

#[test]
fn connection_refused_propagates_as_transport_error() {
    let connector = FakeConnector::default();
    connector.refuse_connections();
    let terminal = FakeTerminal::default();
    let runtime = runtime_for(connector, terminal.clone(), FakeFileSystem::default());

    let err = flightrunner::run_with_runtime(&args(&["start", "localhost:9999", "100"]), &runtime)
        .expect_err("refused");
    assert!(matches!(err, RunnerError::Transport(_)));
    assert!(terminal.written_lines().is_empty());
}
