use crate::config::TransportConfig;
use crate::errors::RunnerError;
use crate::transport::fake::FakeConnection;
use crate::transport::jolokia::JolokiaConnection;
use crate::transport::ManagementConnection;
use crate::types::Endpoint;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep_until(&self, deadline: SystemTime) -> Result<(), RunnerError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, RunnerError>;
    /// Creates or truncates `path` for writing.
    fn create(&self, path: &Path) -> Result<Box<dyn Write>, RunnerError>;
}

/// Primary output carries only machine-readable results; everything a human
/// reads goes to the diagnostic stream.
pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), RunnerError>;
    fn write_diagnostic(&self, line: &str) -> Result<(), RunnerError>;
}

pub trait Connector: Send + Sync {
    fn connect(
        &self,
        endpoint: &Endpoint,
        transport: &TransportConfig,
    ) -> Result<Box<dyn ManagementConnection>, RunnerError>;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), RunnerError> {
        let now = SystemTime::now();
        if let Ok(duration) = deadline.duration_since(now) {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, RunnerError> {
        std::fs::read_to_string(path)
            .map_err(|e| RunnerError::Io(format!("{}: {e}", path.display())))
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Write>, RunnerError> {
        let file = std::fs::File::create(path)
            .map_err(|e| RunnerError::Io(format!("{}: {e}", path.display())))?;
        Ok(Box::new(file))
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), RunnerError> {
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| RunnerError::Io(e.to_string()))
    }

    fn write_diagnostic(&self, line: &str) -> Result<(), RunnerError> {
        let mut err = std::io::stderr();
        writeln!(err, "{line}").map_err(|e| RunnerError::Io(e.to_string()))
    }
}

pub struct ProductionConnector;

impl Connector for ProductionConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        transport: &TransportConfig,
    ) -> Result<Box<dyn ManagementConnection>, RunnerError> {
        Ok(Box::new(JolokiaConnection::connect(endpoint, transport)?))
    }
}

pub struct Runtime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub terminal: Arc<dyn Terminal>,
    pub connector: Arc<dyn Connector>,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionFileSystem),
            terminal: Arc::new(ProductionTerminal),
            connector: Arc::new(ProductionConnector),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<SystemTime>>,
    sleeps: Arc<Mutex<Vec<SystemTime>>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sleeps(&self) -> Vec<SystemTime> {
        self.sleeps.lock().expect("sleep lock").clone()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock lock")
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), RunnerError> {
        self.sleeps.lock().expect("sleep lock").push(deadline);
        *self.now.lock().expect("clock lock") = deadline;
        Ok(())
    }
}

type SharedFiles = Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>;

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: SharedFiles,
    fail_next: Arc<Mutex<Option<RunnerError>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let this = Self::default();
        let contents: String = contents.into();
        this.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into_bytes());
        this
    }

    pub fn set_fail_next(&self, error: RunnerError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    /// Every write through a created file fails after this is set.
    pub fn fail_writes(&self) {
        *self.fail_writes.lock().expect("fail lock") = true;
    }

    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().expect("files lock").get(path).cloned()
    }

    fn maybe_fail(&self) -> Result<(), RunnerError> {
        if let Some(err) = self.fail_next.lock().expect("fail lock").take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, RunnerError> {
        self.maybe_fail()?;
        let bytes = self
            .files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| RunnerError::Io(format!("missing file {}", path.display())))?;
        String::from_utf8(bytes).map_err(|e| RunnerError::Io(e.to_string()))
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Write>, RunnerError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(FakeFile {
            path: path.to_path_buf(),
            files: Arc::clone(&self.files),
            fail: *self.fail_writes.lock().expect("fail lock"),
        }))
    }
}

struct FakeFile {
    path: PathBuf,
    files: SharedFiles,
    fail: bool,
}

impl Write for FakeFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.files
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "files lock poisoned"))?
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    lines: Arc<Mutex<Vec<String>>>,
    diagnostics: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        self.lines.lock().expect("lines lock").clone()
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.lock().expect("diagnostics lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), RunnerError> {
        self.lines
            .lock()
            .expect("lines lock")
            .push(line.to_string());
        Ok(())
    }

    fn write_diagnostic(&self, line: &str) -> Result<(), RunnerError> {
        self.diagnostics
            .lock()
            .expect("diagnostics lock")
            .push(line.to_string());
        Ok(())
    }
}

/// Hands out clones of one shared `FakeConnection`.
#[derive(Default, Clone)]
pub struct FakeConnector {
    connection: FakeConnection,
    endpoints: Arc<Mutex<Vec<String>>>,
    refuse: Arc<Mutex<bool>>,
}

impl FakeConnector {
    pub fn new(connection: FakeConnection) -> Self {
        Self {
            connection,
            ..Self::default()
        }
    }

    pub fn refuse_connections(&self) {
        *self.refuse.lock().expect("refuse lock") = true;
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().expect("endpoints lock").clone()
    }
}

impl Connector for FakeConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        _transport: &TransportConfig,
    ) -> Result<Box<dyn ManagementConnection>, RunnerError> {
        self.endpoints
            .lock()
            .expect("endpoints lock")
            .push(endpoint.to_string());
        if *self.refuse.lock().expect("refuse lock") {
            return Err(RunnerError::Transport(format!(
                "connection refused: {endpoint}"
            )));
        }
        Ok(Box::new(self.connection.clone()))
    }
}
