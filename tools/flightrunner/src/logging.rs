use crate::config::LogConfig;
use crate::errors::RunnerError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub ts_ms: u64,
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), RunnerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| RunnerError::Io(e.to_string()))?;
            }
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            ts_ms: event.ts_ms,
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| RunnerError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RunnerError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| RunnerError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| RunnerError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Run log for one invocation. Disabled when no path is configured; write
/// failures are swallowed so logging never aborts a workflow.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    logger: Option<JsonlLogger>,
}

impl RunLog {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &LogConfig) -> Self {
        let logger = cfg.path.as_ref().map(|path| {
            let mut logger = JsonlLogger::new(path);
            logger.max_payload_bytes = cfg.max_payload_bytes;
            logger
        });
        Self { logger }
    }

    pub fn event(&self, level: &str, event_type: &str, payload: Value) {
        let Some(logger) = &self.logger else {
            return;
        };
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let _ = logger.append(&LogEvent {
            ts_ms,
            level,
            event_type,
            payload,
        });
    }

    pub fn info(&self, event_type: &str, payload: Value) {
        self.event("info", event_type, payload);
    }

    pub fn warn(&self, event_type: &str, payload: Value) {
        self.event("warn", event_type, payload);
    }

    pub fn error(&self, event_type: &str, payload: Value) {
        self.event("error", event_type, payload);
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
