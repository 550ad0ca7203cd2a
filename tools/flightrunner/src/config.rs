use crate::errors::RunnerError;
use crate::runtime::FileSystem;
use crate::types::ManagedObject;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub scheme: Option<String>,
    pub recording_name: Option<String>,
    pub preset: Option<String>,
    pub require_preset: bool,
    pub poll_interval_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
    pub run_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub transport: TransportConfig,
    pub facility: FacilityConfig,
    pub recording: RecordingConfig,
    pub dump: DumpConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportConfig {
    pub scheme: String,
    pub path: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FacilityConfig {
    pub register_operation: String,
    /// Object that must exist before the recorder can be created. Current
    /// JVMs register the recorder at startup, so none is configured by
    /// default; older agents that ship one can name it here.
    pub coordinator: Option<ManagedObject>,
    pub recorder: ManagedObject,
}

impl FacilityConfig {
    /// Objects to ensure, in registration order.
    pub fn required_objects(&self) -> Vec<&ManagedObject> {
        self.coordinator
            .iter()
            .chain(std::iter::once(&self.recorder))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingConfig {
    pub name: String,
    pub preset: String,
    pub require_preset: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DumpConfig {
    pub poll_interval_ms: u64,
    pub max_wait_ms: u64,
    pub buffer_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig {
                scheme: "http".to_string(),
                path: "/jolokia/".to_string(),
                timeout_ms: 30_000,
            },
            facility: FacilityConfig {
                register_operation: "registerMBeans".to_string(),
                coordinator: None,
                recorder: ManagedObject {
                    name: "jdk.management.jfr:type=FlightRecorder".to_string(),
                    class: "jdk.management.jfr.FlightRecorderMXBeanImpl".to_string(),
                },
            },
            recording: RecordingConfig {
                name: "My Recording".to_string(),
                preset: "Profiling".to_string(),
                require_preset: false,
            },
            dump: DumpConfig {
                poll_interval_ms: 1_000,
                max_wait_ms: 0,
                buffer_bytes: 4_096,
            },
            log: LogConfig {
                path: None,
                max_payload_bytes: 4_096,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    transport: Option<PartialTransportConfig>,
    facility: Option<PartialFacilityConfig>,
    recording: Option<PartialRecordingConfig>,
    dump: Option<PartialDumpConfig>,
    log: Option<PartialLogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialTransportConfig {
    scheme: Option<String>,
    path: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialFacilityConfig {
    register_operation: Option<String>,
    coordinator: Option<ManagedObject>,
    recorder: Option<ManagedObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRecordingConfig {
    name: Option<String>,
    preset: Option<String>,
    require_preset: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDumpConfig {
    poll_interval_ms: Option<u64>,
    max_wait_ms: Option<u64>,
    buffer_bytes: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLogConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
}

pub fn load_config(
    overrides: &CliOverrides,
    fs: &dyn FileSystem,
) -> Result<AppConfig, RunnerError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| RunnerError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(transport) = partial.transport {
        if let Some(value) = transport.scheme {
            cfg.transport.scheme = value;
        }
        if let Some(value) = transport.path {
            cfg.transport.path = value;
        }
        if let Some(value) = transport.timeout_ms {
            cfg.transport.timeout_ms = value;
        }
    }

    if let Some(facility) = partial.facility {
        if let Some(value) = facility.register_operation {
            cfg.facility.register_operation = value;
        }
        if let Some(value) = facility.coordinator {
            cfg.facility.coordinator = Some(value);
        }
        if let Some(value) = facility.recorder {
            cfg.facility.recorder = value;
        }
    }

    if let Some(recording) = partial.recording {
        if let Some(value) = recording.name {
            cfg.recording.name = value;
        }
        if let Some(value) = recording.preset {
            cfg.recording.preset = value;
        }
        if let Some(value) = recording.require_preset {
            cfg.recording.require_preset = value;
        }
    }

    if let Some(dump) = partial.dump {
        if let Some(value) = dump.poll_interval_ms {
            cfg.dump.poll_interval_ms = value;
        }
        if let Some(value) = dump.max_wait_ms {
            cfg.dump.max_wait_ms = value;
        }
        if let Some(value) = dump.buffer_bytes {
            cfg.dump.buffer_bytes = value;
        }
    }

    if let Some(log) = partial.log {
        if let Some(path) = log.path {
            cfg.log.path = if path.as_os_str().is_empty() {
                None
            } else {
                Some(path)
            };
        }
        if let Some(value) = log.max_payload_bytes {
            cfg.log.max_payload_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(scheme) = &overrides.scheme {
        cfg.transport.scheme = scheme.clone();
    }
    if let Some(name) = &overrides.recording_name {
        cfg.recording.name = name.clone();
    }
    if let Some(preset) = &overrides.preset {
        cfg.recording.preset = preset.clone();
    }
    if overrides.require_preset {
        cfg.recording.require_preset = true;
    }
    if let Some(value) = overrides.poll_interval_ms {
        cfg.dump.poll_interval_ms = value;
    }
    if let Some(value) = overrides.max_wait_ms {
        cfg.dump.max_wait_ms = value;
    }
    if let Some(path) = &overrides.run_log {
        cfg.log.path = Some(path.clone());
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), RunnerError> {
    if !matches!(cfg.transport.scheme.as_str(), "http" | "https") {
        return Err(RunnerError::InvalidConfig(format!(
            "transport.scheme must be http or https, got '{}'",
            cfg.transport.scheme
        )));
    }

    for object in cfg.facility.required_objects() {
        if object.name.trim().is_empty() {
            return Err(RunnerError::InvalidConfig(
                "facility object names must not be empty".to_string(),
            ));
        }
    }

    if cfg.recording.preset.trim().is_empty() {
        return Err(RunnerError::InvalidConfig(
            "recording.preset must not be empty".to_string(),
        ));
    }

    if cfg.dump.poll_interval_ms == 0 {
        return Err(RunnerError::InvalidConfig(
            "dump.poll_interval_ms must be greater than zero".to_string(),
        ));
    }

    if cfg.dump.buffer_bytes == 0 {
        return Err(RunnerError::InvalidConfig(
            "dump.buffer_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}
