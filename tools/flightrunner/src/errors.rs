use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("usage error: {0}")]
    Usage(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote error ({status}) {error_type}: {message}")]
    Remote {
        status: u16,
        error_type: String,
        message: String,
    },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("recording {0} not found")]
    RecordingNotFound(u64),
    #[error("preset '{0}' not offered by the recording facility")]
    PresetNotFound(String),
    #[error("recording {id} still running after {waited_ms}ms")]
    WaitTimedOut { id: u64, waited_ms: u64 },
}

impl RunnerError {
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}
