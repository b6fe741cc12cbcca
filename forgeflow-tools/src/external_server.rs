//! External protocol server connections: a configured
//! server process is started once, its tool list is cached, and calls are
//! forwarded over a line-delimited JSON request/response stream.

use std::collections::HashMap;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::ToolError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    tools: Vec<RemoteToolDescriptor>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub output_schema: serde_json::Value,
}

/// A live connection to one external protocol server. Namespacing remote
/// tool ids as `external_<server>_<tool>` happens at the registry layer.
pub struct ExternalServerHandle {
    name: String,
    _child: Child,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
}

impl ExternalServerHandle {
    pub async fn connect(config: &ExternalServerConfig) -> Result<Self, ToolError> {
        let mut command = Command::new(&config.command);
        command.args(&config.args).envs(&config.env).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null());

        let mut child = command
            .spawn()
            .map_err(|e| ToolError::ExternalServerUnavailable(format!("{}: {e}", config.name)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::ExternalServerUnavailable(format!("{}: no stdin handle", config.name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::ExternalServerUnavailable(format!("{}: no stdout handle", config.name)))?;

        Ok(Self { name: config.name.clone(), _child: child, stdin: Mutex::new(stdin), stdout: Mutex::new(BufReader::new(stdout)) })
    }

    async fn roundtrip(&self, request: &Request<'_>) -> Result<Response, ToolError> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| ToolError::ExternalServerUnavailable(format!("{}: {e}", self.name)))?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ToolError::ExternalServerUnavailable(format!("{}: write failed: {e}", self.name)))?;
        stdin
            .flush()
            .await
            .map_err(|e| ToolError::ExternalServerUnavailable(format!("{}: flush failed: {e}", self.name)))?;
        drop(stdin);

        let mut response_line = String::new();
        let mut stdout = self.stdout.lock().await;
        stdout
            .read_line(&mut response_line)
            .await
            .map_err(|e| ToolError::ExternalServerUnavailable(format!("{}: read failed: {e}", self.name)))?;
        if response_line.is_empty() {
            return Err(ToolError::ExternalServerUnavailable(format!("{}: connection closed", self.name)));
        }

        serde_json::from_str(&response_line)
            .map_err(|e| ToolError::ExternalServerUnavailable(format!("{}: malformed response: {e}", self.name)))
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteToolDescriptor>, ToolError> {
        let response = self.roundtrip(&Request { method: "list_tools", tool: None, args: None }).await?;
        Ok(response.tools)
    }

    pub async fn call_tool(&self, tool: &str, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let response = self.roundtrip(&Request { method: "call_tool", tool: Some(tool), args: Some(args) }).await?;
        if let Some(error) = response.error {
            return Err(ToolError::InvocationFailed { tool: tool.to_string(), exit_code: -1, stderr: error });
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }
}
