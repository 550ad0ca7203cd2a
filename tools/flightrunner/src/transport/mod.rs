use crate::errors::RunnerError;
use serde_json::Value;
use std::ops::Deref;

pub mod fake;
pub mod jolokia;

/// An open channel to one remote management endpoint.
///
/// Objects are addressed by their well-known names; operations are invoked
/// by name with positional JSON arguments.
pub trait ManagementConnection: Send + Sync {
    fn is_registered(&self, name: &str) -> Result<bool, RunnerError>;
    fn create_object(&self, class: &str, name: &str) -> Result<(), RunnerError>;
    fn invoke(&self, name: &str, operation: &str, arguments: Vec<Value>)
        -> Result<Value, RunnerError>;
    fn close(&self) -> Result<(), RunnerError>;
}

/// Owns a connection for the length of one invocation and closes it on every
/// exit path.
pub struct ConnectionGuard {
    connection: Box<dyn ManagementConnection>,
    closed: bool,
}

impl ConnectionGuard {
    pub fn new(connection: Box<dyn ManagementConnection>) -> Self {
        Self {
            connection,
            closed: false,
        }
    }

    pub fn close(mut self) -> Result<(), RunnerError> {
        self.closed = true;
        self.connection.close()
    }
}

impl Deref for ConnectionGuard {
    type Target = dyn ManagementConnection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.connection.close();
        }
    }
}
