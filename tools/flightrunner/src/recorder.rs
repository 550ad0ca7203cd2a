use crate::errors::RunnerError;
use crate::transport::ManagementConnection;
use crate::types::{Preset, RecordingId, RecordingInfo, RecordingOptions, RecordingState};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::{self, Read};

pub mod ops {
    pub const NEW_RECORDING: &str = "newRecording";
    pub const GET_RECORDING_OPTIONS: &str = "getRecordingOptions";
    pub const SET_RECORDING_OPTIONS: &str = "setRecordingOptions";
    pub const GET_CONFIGURATIONS: &str = "getConfigurations";
    pub const SET_RECORDING_SETTINGS: &str = "setRecordingSettings";
    pub const START_RECORDING: &str = "startRecording";
    pub const GET_RECORDINGS: &str = "getRecordings";
    pub const OPEN_STREAM: &str = "openStream";
    pub const READ_STREAM: &str = "readStream";
    pub const CLOSE_STREAM: &str = "closeStream";
}

/// Typed recording operations on the registered recorder object.
pub struct FlightRecorderClient<'a> {
    connection: &'a dyn ManagementConnection,
    facility: &'a str,
}

impl<'a> FlightRecorderClient<'a> {
    pub fn new(connection: &'a dyn ManagementConnection, facility: &'a str) -> Self {
        Self {
            connection,
            facility,
        }
    }

    fn call(&self, operation: &str, arguments: Vec<Value>) -> Result<Value, RunnerError> {
        self.connection.invoke(self.facility, operation, arguments)
    }

    pub fn create_recording(&self) -> Result<RecordingId, RunnerError> {
        let value = self.call(ops::NEW_RECORDING, Vec::new())?;
        parse_u64(&value)
            .map(RecordingId)
            .ok_or_else(|| RunnerError::MalformedResponse(format!("recording id {value}")))
    }

    pub fn recording_options(&self, id: RecordingId) -> Result<RecordingOptions, RunnerError> {
        let value = self.call(ops::GET_RECORDING_OPTIONS, vec![json!(id.0)])?;
        parse_string_map(&value).map(RecordingOptions)
    }

    pub fn set_recording_options(
        &self,
        id: RecordingId,
        options: &RecordingOptions,
    ) -> Result<(), RunnerError> {
        self.call(
            ops::SET_RECORDING_OPTIONS,
            vec![json!(id.0), string_map_value(&options.0)],
        )?;
        Ok(())
    }

    pub fn presets(&self) -> Result<Vec<Preset>, RunnerError> {
        let value = self.call(ops::GET_CONFIGURATIONS, Vec::new())?;
        let Value::Array(rows) = value else {
            return Err(RunnerError::MalformedResponse(format!(
                "configurations were not a list: {value}"
            )));
        };
        rows.iter().map(parse_preset).collect()
    }

    pub fn set_event_settings(
        &self,
        id: RecordingId,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), RunnerError> {
        self.call(
            ops::SET_RECORDING_SETTINGS,
            vec![json!(id.0), string_map_value(settings)],
        )?;
        Ok(())
    }

    pub fn start(&self, id: RecordingId) -> Result<(), RunnerError> {
        self.call(ops::START_RECORDING, vec![json!(id.0)])?;
        Ok(())
    }

    pub fn recordings(&self) -> Result<Vec<RecordingInfo>, RunnerError> {
        let value = self.call(ops::GET_RECORDINGS, Vec::new())?;
        match value {
            Value::Array(rows) => rows.iter().map(parse_recording_info).collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(RunnerError::MalformedResponse(format!(
                "recordings were not a list: {other}"
            ))),
        }
    }

    pub fn open_stream(&self, id: RecordingId) -> Result<RecordingStream<'a>, RunnerError> {
        let value = self.call(ops::OPEN_STREAM, vec![json!(id.0), json!({})])?;
        let stream_id = parse_u64(&value)
            .ok_or_else(|| RunnerError::MalformedResponse(format!("stream id {value}")))?;
        Ok(RecordingStream {
            connection: self.connection,
            facility: self.facility,
            stream_id,
            pending: Vec::new(),
            position: 0,
            exhausted: false,
            closed: false,
        })
    }
}

/// Reads a finished recording chunk by chunk. The remote stream is closed on
/// drop if `close` was not called.
pub struct RecordingStream<'a> {
    connection: &'a dyn ManagementConnection,
    facility: &'a str,
    stream_id: u64,
    pending: Vec<u8>,
    position: usize,
    exhausted: bool,
    closed: bool,
}

impl RecordingStream<'_> {
    fn fetch_chunk(&mut self) -> Result<(), RunnerError> {
        let value = self.connection.invoke(
            self.facility,
            ops::READ_STREAM,
            vec![json!(self.stream_id)],
        )?;
        let chunk = decode_bytes(&value)?;
        if chunk.is_empty() {
            self.exhausted = true;
        }
        self.pending = chunk;
        self.position = 0;
        Ok(())
    }

    pub fn close(mut self) -> Result<(), RunnerError> {
        self.closed = true;
        self.connection.invoke(
            self.facility,
            ops::CLOSE_STREAM,
            vec![json!(self.stream_id)],
        )?;
        Ok(())
    }
}

impl Read for RecordingStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.position >= self.pending.len() {
            if self.exhausted {
                return Ok(0);
            }
            self.fetch_chunk()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        }
        let available = &self.pending[self.position..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}

impl Drop for RecordingStream<'_> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.connection.invoke(
                self.facility,
                ops::CLOSE_STREAM,
                vec![json!(self.stream_id)],
            );
        }
    }
}

fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Accepts a plain JSON object, the `{k: {"key": k, "value": v}}` tabular
/// rendering, or a list of key/value rows.
pub fn parse_string_map(value: &Value) -> Result<BTreeMap<String, String>, RunnerError> {
    match value {
        Value::Null => Ok(BTreeMap::new()),
        Value::Object(entries) => Ok(entries
            .iter()
            .map(|(key, entry)| {
                let text = match entry {
                    Value::Object(row) => row.get("value").map(scalar_string).unwrap_or_default(),
                    other => scalar_string(other),
                };
                (key.clone(), text)
            })
            .collect()),
        Value::Array(rows) => rows
            .iter()
            .map(|row| {
                let key = row.get("key").and_then(Value::as_str).ok_or_else(|| {
                    RunnerError::MalformedResponse(format!("map row without key: {row}"))
                })?;
                let text = row.get("value").map(scalar_string).unwrap_or_default();
                Ok((key.to_string(), text))
            })
            .collect(),
        other => Err(RunnerError::MalformedResponse(format!(
            "expected a map, got {other}"
        ))),
    }
}

fn string_map_value(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect(),
    )
}

fn parse_preset(value: &Value) -> Result<Preset, RunnerError> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RunnerError::MalformedResponse(format!("preset without name: {value}")))?;
    let settings = match value.get("settings") {
        Some(settings) => parse_string_map(settings)?,
        None => BTreeMap::new(),
    };
    Ok(Preset {
        name: name.to_string(),
        label: value
            .get("label")
            .and_then(Value::as_str)
            .map(str::to_string),
        settings,
    })
}

fn parse_recording_info(value: &Value) -> Result<RecordingInfo, RunnerError> {
    let id = value
        .get("id")
        .and_then(parse_u64)
        .ok_or_else(|| RunnerError::MalformedResponse(format!("recording without id: {value}")))?;
    let state = value
        .get("state")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            RunnerError::MalformedResponse(format!("recording {id} without state"))
        })?;
    Ok(RecordingInfo {
        id: RecordingId(id),
        name: value
            .get("name")
            .map(scalar_string)
            .unwrap_or_default(),
        state: RecordingState::parse(state),
        duration_secs: value
            .get("duration")
            .and_then(parse_u64)
            .filter(|secs| *secs > 0),
    })
}

/// Remote byte arrays arrive as signed or unsigned integers; `null` ends the
/// stream.
pub fn decode_bytes(value: &Value) -> Result<Vec<u8>, RunnerError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item.as_i64() {
                Some(byte @ -128..=-1) => Ok(byte as i8 as u8),
                Some(byte @ 0..=255) => Ok(byte as u8),
                _ => Err(RunnerError::MalformedResponse(format!(
                    "stream chunk holds a non-byte value {item}"
                ))),
            })
            .collect(),
        other => Err(RunnerError::MalformedResponse(format!(
            "stream chunk was not a byte list: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        decode_bytes, parse_preset, parse_recording_info, parse_string_map, FlightRecorderClient,
    };
    use crate::transport::fake::{FakeConnection, FakeRecording};
    use crate::types::{RecordingId, RecordingState};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::io::Read;

    const RECORDER: &str = "jdk.management.jfr:type=FlightRecorder";

    #[test]
    fn tabular_map_rendering_is_flattened() {
        let value = json!({
            "duration": {"key": "duration", "value": "60 s"},
            "disk": "true",
            "maxSize": 0
        });
        let map = parse_string_map(&value).expect("map");
        assert_eq!(map.get("duration").map(String::as_str), Some("60 s"));
        assert_eq!(map.get("disk").map(String::as_str), Some("true"));
        assert_eq!(map.get("maxSize").map(String::as_str), Some("0"));
    }

    #[test]
    fn key_value_rows_are_accepted() {
        let value = json!([{"key": "a", "value": "1"}, {"key": "b", "value": "2"}]);
        let map = parse_string_map(&value).expect("map");
        assert_eq!(map.len(), 2);
        assert!(parse_string_map(&json!([{"value": "x"}])).is_err());
    }

    #[test]
    fn preset_carries_its_label() {
        let preset = parse_preset(&json!({
            "name": "profile",
            "label": "Profiling",
            "description": "Low overhead configuration for profiling",
            "settings": {"jdk.ExecutionSample#period": {"key": "jdk.ExecutionSample#period", "value": "10 ms"}}
        }))
        .expect("preset");
        assert_eq!(preset.name, "profile");
        assert_eq!(preset.label.as_deref(), Some("Profiling"));
        assert!(preset.matches("Profiling"));
        assert_eq!(
            preset.settings.get("jdk.ExecutionSample#period").map(String::as_str),
            Some("10 ms")
        );

        let unlabeled = parse_preset(&json!({"name": "custom"})).expect("preset");
        assert_eq!(unlabeled.label, None);
    }

    #[test]
    fn signed_bytes_are_reinterpreted() {
        assert_eq!(
            decode_bytes(&json!([-1, 0, 127, -128, 200])).expect("bytes"),
            vec![255, 0, 127, 128, 200]
        );
        assert!(decode_bytes(&json!([300])).is_err());
        assert!(decode_bytes(&json!("abc")).is_err());
        assert!(decode_bytes(&json!(null)).expect("end").is_empty());
    }

    #[test]
    fn recording_info_accepts_string_ids_and_drops_zero_duration() {
        let info = parse_recording_info(&json!({
            "id": "42", "name": "nightly", "state": "STOPPED", "duration": 0
        }))
        .expect("info");
        assert_eq!(info.id, RecordingId(42));
        assert_eq!(info.state, RecordingState::Stopped);
        assert_eq!(info.duration_secs, None);
        assert!(parse_recording_info(&json!({"name": "x", "state": "NEW"})).is_err());
    }

    #[test]
    fn stream_reads_across_chunks_and_closes_on_drop() {
        let connection = FakeConnection::with_registered(&[RECORDER]);
        connection.set_chunk_bytes(3);
        connection.add_recording(
            5,
            FakeRecording {
                name: "r".to_string(),
                state: "STOPPED".to_string(),
                options: BTreeMap::new(),
                settings: BTreeMap::new(),
                data: b"0123456789".to_vec(),
                running_snapshots: 0,
            },
        );
        let client = FlightRecorderClient::new(&connection, RECORDER);
        {
            let mut stream = client.open_stream(RecordingId(5)).expect("open");
            let mut out = Vec::new();
            stream.read_to_end(&mut out).expect("read");
            assert_eq!(out, b"0123456789");
        }
        assert_eq!(connection.open_streams(), 0);
        assert_eq!(connection.closed_streams().len(), 1);
    }
}
