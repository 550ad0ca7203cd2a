use crate::errors::RunnerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A `host:port` pair naming the remote management endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl FromStr for Endpoint {
    type Err = RunnerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| RunnerError::Usage(format!("expected host:port, got '{value}'")))?;
        if host.is_empty() {
            return Err(RunnerError::Usage(format!("missing host in '{value}'")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| RunnerError::Usage(format!("invalid port in '{value}'")))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A remote management object that must be registered before recordings
/// can be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedObject {
    pub name: String,
    pub class: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordingId(pub u64);

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingState {
    New,
    Delayed,
    Running,
    Stopped,
    Closed,
    Other(String),
}

impl RecordingState {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "NEW" => Self::New,
            "DELAYED" => Self::Delayed,
            "RUNNING" => Self::Running,
            "STOPPED" => Self::Stopped,
            "CLOSED" => Self::Closed,
            _ => Self::Other(value.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::New => "NEW",
            Self::Delayed => "DELAYED",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Closed => "CLOSED",
            Self::Other(value) => value,
        }
    }

    /// Delayed recordings have been started but not begun capturing yet.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Delayed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingInfo {
    pub id: RecordingId,
    pub name: String,
    pub state: RecordingState,
    pub duration_secs: Option<u64>,
}

/// Session-level options applied to a recording before it starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingOptions(pub BTreeMap<String, String>);

impl RecordingOptions {
    pub const DURATION_KEY: &'static str = "duration";
    pub const NAME_KEY: &'static str = "name";

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Copies these options with the duration overridden.
    pub fn with_duration_ms(&self, duration_ms: u64) -> Self {
        let mut merged = self.clone();
        merged.set(Self::DURATION_KEY, format!("{duration_ms} ms"));
        merged
    }

    /// Entries whose value differs from `base`. The recorder keeps any key it
    /// is not sent, and rejects some of its own defaults when echoed back.
    pub fn changed_from(&self, base: &RecordingOptions) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(key, value)| base.get(key) != Some(value.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }
}

/// A named bundle of event-capture settings offered by the facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub name: String,
    /// Display name, e.g. `Profiling` for the `profile` configuration.
    pub label: Option<String>,
    pub settings: BTreeMap<String, String>,
}

impl Preset {
    /// Exact, case-sensitive match against the name or the label.
    pub fn matches(&self, wanted: &str) -> bool {
        self.name == wanted || self.label.as_deref() == Some(wanted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresetOutcome {
    Applied { name: String, label: Option<String> },
    NoMatch { wanted: String, available: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(RecordingInfo),
    NotFound,
}

impl Lookup {
    pub fn found(self) -> Option<RecordingInfo> {
        match self {
            Self::Found(info) => Some(info),
            Self::NotFound => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedRecording {
    pub id: RecordingId,
    pub preset: PresetOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpSummary {
    pub id: RecordingId,
    pub path: PathBuf,
    pub bytes_written: u64,
    pub polls: u64,
}

#[cfg(test)]
mod tests {
    use super::{Endpoint, Preset, RecordingOptions, RecordingState};

    #[test]
    fn endpoint_parses_host_and_port() {
        let endpoint: Endpoint = "localhost:9999".parse().expect("endpoint");
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 9999);
        assert_eq!(endpoint.to_string(), "localhost:9999");
    }

    #[test]
    fn endpoint_keeps_bracketed_ipv6_host() {
        let endpoint: Endpoint = "[::1]:7091".parse().expect("endpoint");
        assert_eq!(endpoint.host, "[::1]");
        assert_eq!(endpoint.port, 7091);
    }

    #[test]
    fn endpoint_rejects_missing_or_bad_port() {
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!(":9999".parse::<Endpoint>().is_err());
        assert!("localhost:http".parse::<Endpoint>().is_err());
        assert!("localhost:70000".parse::<Endpoint>().is_err());
    }

    #[test]
    fn delayed_and_running_count_as_running() {
        assert!(RecordingState::parse("RUNNING").is_running());
        assert!(RecordingState::parse("delayed").is_running());
        assert!(!RecordingState::parse("STOPPED").is_running());
        assert!(!RecordingState::parse("NEW").is_running());
        assert_eq!(RecordingState::parse("ODD").as_str(), "ODD");
    }

    #[test]
    fn duration_override_leaves_other_defaults_untouched() {
        let mut defaults = RecordingOptions::default();
        defaults.set("disk", "true");
        defaults.set("duration", "0");

        let merged = defaults.with_duration_ms(30_000);
        assert_eq!(merged.get("duration"), Some("30000 ms"));
        assert_eq!(merged.get("disk"), Some("true"));
        assert_eq!(defaults.get("duration"), Some("0"));
    }

    #[test]
    fn changed_from_keeps_only_overridden_entries() {
        let mut defaults = RecordingOptions::default();
        defaults.set("duration", "0");
        defaults.set("maxAge", "0");
        defaults.set("destination", "");
        let mut merged = defaults.with_duration_ms(5_000);
        merged.set("name", "nightly");

        let sent = merged.changed_from(&defaults);
        assert_eq!(sent.0.len(), 2);
        assert_eq!(sent.get("duration"), Some("5000 ms"));
        assert_eq!(sent.get("name"), Some("nightly"));
    }

    #[test]
    fn preset_matches_name_or_label_case_sensitively() {
        let preset = Preset {
            name: "profile".to_string(),
            label: Some("Profiling".to_string()),
            settings: Default::default(),
        };
        assert!(preset.matches("profile"));
        assert!(preset.matches("Profiling"));
        assert!(!preset.matches("profiling"));
    }
}
