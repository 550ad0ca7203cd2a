use crate::errors::RunnerError;
use crate::recorder::ops;
use crate::transport::ManagementConnection;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRecording {
    pub name: String,
    pub state: String,
    pub options: BTreeMap<String, String>,
    pub settings: BTreeMap<String, String>,
    pub data: Vec<u8>,
    /// Snapshots that still report RUNNING before the recording stops.
    pub running_snapshots: u32,
}

struct FakePreset {
    name: String,
    label: Option<String>,
    settings: BTreeMap<String, String>,
}

#[derive(Default)]
struct FakeState {
    registered: BTreeSet<String>,
    creatable: BTreeSet<String>,
    created: Vec<String>,
    calls: Vec<String>,
    default_options: BTreeMap<String, String>,
    presets: Vec<FakePreset>,
    sent_options: Vec<BTreeMap<String, String>>,
    recordings: BTreeMap<u64, FakeRecording>,
    next_id: u64,
    next_stream: u64,
    streams: BTreeMap<u64, (Vec<u8>, usize)>,
    closed_streams: Vec<u64>,
    chunk_bytes: usize,
    close_count: u32,
    fail_operation: Option<(String, String)>,
}

/// In-memory recording facility driven through the same operations the real
/// transport invokes.
#[derive(Default, Clone)]
pub struct FakeConnection {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnection {
    pub fn with_registered(names: &[&str]) -> Self {
        let this = Self::default();
        {
            let mut state = this.state.lock().expect("fake lock");
            state.registered = names.iter().map(|name| name.to_string()).collect();
            state.next_id = 1;
            state.chunk_bytes = 1_000;
            state.default_options = [
                ("name", "Recording"),
                ("duration", "0"),
                ("maxAge", "0"),
                ("maxSize", "0"),
                ("disk", "true"),
                ("dumpOnExit", "false"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        }
        this
    }

    pub fn allow_create(&self, name: &str) {
        self.state
            .lock()
            .expect("fake lock")
            .creatable
            .insert(name.to_string());
    }

    pub fn add_preset(&self, name: &str, label: Option<&str>, settings: &[(&str, &str)]) {
        let settings = settings
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state.lock().expect("fake lock").presets.push(FakePreset {
            name: name.to_string(),
            label: label.map(str::to_string),
            settings,
        });
    }

    pub fn add_recording(&self, id: u64, recording: FakeRecording) {
        let mut state = self.state.lock().expect("fake lock");
        state.recordings.insert(id, recording);
        state.next_id = state.next_id.max(id + 1);
    }

    pub fn set_chunk_bytes(&self, chunk_bytes: usize) {
        self.state.lock().expect("fake lock").chunk_bytes = chunk_bytes.max(1);
    }

    /// The next invocation of `operation` fails with a remote error.
    pub fn fail_on(&self, operation: &str, message: &str) {
        self.state.lock().expect("fake lock").fail_operation =
            Some((operation.to_string(), message.to_string()));
    }

    pub fn recording(&self, id: u64) -> Option<FakeRecording> {
        self.state
            .lock()
            .expect("fake lock")
            .recordings
            .get(&id)
            .cloned()
    }

    /// Every option map passed to setRecordingOptions, in order.
    pub fn sent_options(&self) -> Vec<BTreeMap<String, String>> {
        self.state.lock().expect("fake lock").sent_options.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().expect("fake lock").calls.clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().expect("fake lock").created.clone()
    }

    pub fn open_streams(&self) -> usize {
        self.state.lock().expect("fake lock").streams.len()
    }

    pub fn closed_streams(&self) -> Vec<u64> {
        self.state.lock().expect("fake lock").closed_streams.clone()
    }

    pub fn close_count(&self) -> u32 {
        self.state.lock().expect("fake lock").close_count
    }
}

fn remote(status: u16, error_type: &str, message: impl Into<String>) -> RunnerError {
    RunnerError::Remote {
        status,
        error_type: error_type.to_string(),
        message: message.into(),
    }
}

fn arg_u64(arguments: &[Value], index: usize) -> Result<u64, RunnerError> {
    arguments
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| remote(400, "java.lang.IllegalArgumentException", "expected long"))
}

fn arg_map(arguments: &[Value], index: usize) -> Result<BTreeMap<String, String>, RunnerError> {
    let object = arguments
        .get(index)
        .and_then(Value::as_object)
        .ok_or_else(|| remote(400, "java.lang.IllegalArgumentException", "expected map"))?;
    Ok(object
        .iter()
        .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
        .collect())
}

/// Mirrors the recorder's checks: time spans need a unit and must be
/// positive, and a destination must name a file.
fn validate_option(key: &str, value: &str) -> Result<(), RunnerError> {
    let valid = match key {
        "duration" | "maxAge" => {
            let digits = value.trim_end_matches(|c: char| c.is_ascii_alphabetic());
            let digits = digits.trim_end();
            digits.len() < value.len() && digits.parse::<u64>().is_ok_and(|n| n > 0)
        }
        "destination" => !value.is_empty(),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(remote(
            400,
            "java.lang.IllegalArgumentException",
            format!("invalid value '{value}' for option {key}"),
        ))
    }
}

/// Options as the recorder reports them; an unset destination is `null`.
fn options_value(map: &BTreeMap<String, String>) -> Value {
    let mut value = map_value(map);
    if let Value::Object(entries) = &mut value {
        entries.entry("destination").or_insert(Value::Null);
    }
    value
}

fn map_value(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<Map<_, _>>(),
    )
}

impl FakeState {
    fn recording_mut(&mut self, id: u64) -> Result<&mut FakeRecording, RunnerError> {
        self.recordings.get_mut(&id).ok_or_else(|| {
            remote(
                400,
                "java.lang.IllegalArgumentException",
                format!("No recording available with id {id}"),
            )
        })
    }

    fn snapshot(&mut self) -> Value {
        let mut rows = Vec::new();
        for (id, recording) in self.recordings.iter_mut() {
            if recording.state == "RUNNING" {
                if recording.running_snapshots == 0 {
                    recording.state = "STOPPED".to_string();
                } else {
                    recording.running_snapshots -= 1;
                }
            }
            rows.push(json!({
                "id": id,
                "name": recording.name,
                "state": recording.state,
                "duration": 0,
            }));
        }
        Value::Array(rows)
    }
}

impl ManagementConnection for FakeConnection {
    fn is_registered(&self, name: &str) -> Result<bool, RunnerError> {
        let mut state = self.state.lock().expect("fake lock");
        state.calls.push(format!("isRegistered {name}"));
        Ok(state.registered.contains(name))
    }

    fn create_object(&self, class: &str, name: &str) -> Result<(), RunnerError> {
        let mut state = self.state.lock().expect("fake lock");
        state.calls.push(format!("create {name}"));
        if !state.creatable.contains(name) {
            return Err(remote(
                500,
                "javax.management.ReflectionException",
                format!("class {class} not found"),
            ));
        }
        state.registered.insert(name.to_string());
        state.created.push(name.to_string());
        Ok(())
    }

    fn invoke(
        &self,
        name: &str,
        operation: &str,
        arguments: Vec<Value>,
    ) -> Result<Value, RunnerError> {
        let mut state = self.state.lock().expect("fake lock");
        state.calls.push(operation.to_string());
        if !state.registered.contains(name) {
            return Err(remote(404, "javax.management.InstanceNotFoundException", name));
        }
        if let Some((failing, message)) = state.fail_operation.clone() {
            if failing == operation {
                state.fail_operation = None;
                return Err(remote(500, "javax.management.MBeanException", message));
            }
        }

        match operation {
            "registerMBeans" => Ok(Value::Null),
            ops::NEW_RECORDING => {
                let id = state.next_id;
                state.next_id += 1;
                let options = state.default_options.clone();
                state.recordings.insert(
                    id,
                    FakeRecording {
                        name: format!("Recording-{id}"),
                        state: "NEW".to_string(),
                        options,
                        settings: BTreeMap::new(),
                        data: Vec::new(),
                        running_snapshots: 0,
                    },
                );
                Ok(json!(id))
            }
            ops::GET_RECORDING_OPTIONS => {
                let id = arg_u64(&arguments, 0)?;
                let options = state.recording_mut(id)?.options.clone();
                Ok(options_value(&options))
            }
            ops::SET_RECORDING_OPTIONS => {
                let id = arg_u64(&arguments, 0)?;
                let options = arg_map(&arguments, 1)?;
                state.sent_options.push(options.clone());
                for (key, value) in &options {
                    validate_option(key, value)?;
                }
                let recording = state.recording_mut(id)?;
                if recording.state != "NEW" {
                    return Err(remote(
                        400,
                        "java.lang.IllegalStateException",
                        "options cannot be changed once started",
                    ));
                }
                if let Some(name) = options.get("name") {
                    recording.name = name.clone();
                }
                recording.options.extend(options);
                Ok(Value::Null)
            }
            ops::GET_CONFIGURATIONS => Ok(Value::Array(
                state
                    .presets
                    .iter()
                    .map(|preset| {
                        json!({
                            "name": preset.name,
                            "label": preset.label,
                            "settings": map_value(&preset.settings),
                        })
                    })
                    .collect(),
            )),
            ops::SET_RECORDING_SETTINGS => {
                let id = arg_u64(&arguments, 0)?;
                let settings = arg_map(&arguments, 1)?;
                state.recording_mut(id)?.settings = settings;
                Ok(Value::Null)
            }
            ops::START_RECORDING => {
                let id = arg_u64(&arguments, 0)?;
                state.recording_mut(id)?.state = "RUNNING".to_string();
                Ok(Value::Null)
            }
            ops::GET_RECORDINGS => Ok(state.snapshot()),
            ops::OPEN_STREAM => {
                let id = arg_u64(&arguments, 0)?;
                let data = state.recording_mut(id)?.data.clone();
                let stream = state.next_stream;
                state.next_stream += 1;
                state.streams.insert(stream, (data, 0));
                Ok(json!(stream))
            }
            ops::READ_STREAM => {
                let stream = arg_u64(&arguments, 0)?;
                let chunk_bytes = state.chunk_bytes;
                let (data, offset) = state.streams.get_mut(&stream).ok_or_else(|| {
                    remote(400, "java.io.IOException", format!("unknown stream {stream}"))
                })?;
                if *offset >= data.len() {
                    return Ok(Value::Null);
                }
                let end = (*offset + chunk_bytes).min(data.len());
                let chunk = data[*offset..end]
                    .iter()
                    .map(|byte| *byte as i8)
                    .collect::<Vec<_>>();
                *offset = end;
                Ok(json!(chunk))
            }
            ops::CLOSE_STREAM => {
                let stream = arg_u64(&arguments, 0)?;
                state.streams.remove(&stream);
                state.closed_streams.push(stream);
                Ok(Value::Null)
            }
            other => Err(remote(
                400,
                "javax.management.ReflectionException",
                format!("no operation {other}"),
            )),
        }
    }

    fn close(&self) -> Result<(), RunnerError> {
        self.state.lock().expect("fake lock").close_count += 1;
        Ok(())
    }
}
