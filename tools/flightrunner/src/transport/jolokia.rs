use crate::config::TransportConfig;
use crate::errors::RunnerError;
use crate::transport::ManagementConnection;
use crate::types::Endpoint;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Management connection speaking the Jolokia JSON-over-HTTP protocol.
pub struct JolokiaConnection {
    agent: ureq::Agent,
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JolokiaResponse {
    pub status: u16,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JolokiaConnection {
    /// Opens the channel and checks the agent answers before any facility
    /// call is made.
    pub fn connect(endpoint: &Endpoint, transport: &TransportConfig) -> Result<Self, RunnerError> {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(transport.timeout_ms))
            .build();
        let connection = Self {
            agent,
            url: endpoint_url(endpoint, transport),
        };
        connection.request(json!({ "type": "version" }))?;
        Ok(connection)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, body: Value) -> Result<Value, RunnerError> {
        let response = match self.agent.post(&self.url).send_json(body) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                return match response.into_json::<JolokiaResponse>() {
                    Ok(envelope) => interpret_response(envelope),
                    Err(_) => Err(RunnerError::Transport(format!(
                        "{} answered http status {code}",
                        self.url
                    ))),
                };
            }
            Err(ureq::Error::Transport(error)) => {
                return Err(RunnerError::Transport(format!("{}: {error}", self.url)));
            }
        };
        let envelope = response
            .into_json::<JolokiaResponse>()
            .map_err(|e| RunnerError::MalformedResponse(format!("jolokia envelope: {e}")))?;
        interpret_response(envelope)
    }
}

impl ManagementConnection for JolokiaConnection {
    fn is_registered(&self, name: &str) -> Result<bool, RunnerError> {
        let value = self.request(search_request(name))?;
        match value {
            Value::Array(names) => Ok(!names.is_empty()),
            Value::Null => Ok(false),
            other => Err(RunnerError::MalformedResponse(format!(
                "search for {name} returned {other}"
            ))),
        }
    }

    fn create_object(&self, class: &str, name: &str) -> Result<(), RunnerError> {
        Err(RunnerError::Transport(format!(
            "cannot create {name} ({class}): jolokia exposes no object creation; register it on the target first"
        )))
    }

    fn invoke(
        &self,
        name: &str,
        operation: &str,
        arguments: Vec<Value>,
    ) -> Result<Value, RunnerError> {
        self.request(exec_request(name, operation, arguments))
    }

    fn close(&self) -> Result<(), RunnerError> {
        Ok(())
    }
}

pub fn endpoint_url(endpoint: &Endpoint, transport: &TransportConfig) -> String {
    let path = if transport.path.starts_with('/') {
        transport.path.clone()
    } else {
        format!("/{}", transport.path)
    };
    format!("{}://{}{}", transport.scheme, endpoint, path)
}

pub fn search_request(name: &str) -> Value {
    json!({ "type": "search", "mbean": name })
}

pub fn exec_request(name: &str, operation: &str, arguments: Vec<Value>) -> Value {
    json!({
        "type": "exec",
        "mbean": name,
        "operation": operation,
        "arguments": arguments,
    })
}

pub fn interpret_response(response: JolokiaResponse) -> Result<Value, RunnerError> {
    if response.status == 200 {
        return Ok(response.value);
    }
    Err(RunnerError::Remote {
        status: response.status,
        error_type: response
            .error_type
            .unwrap_or_else(|| "unknown".to_string()),
        message: response.error.unwrap_or_default(),
    })
}
