//! Tool Registry: discovery, semantic selection, duplicate
//! avoidance, and invocation dispatch wrapped by the interceptor chain.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use forgeflow_commons::template::render_template;
use forgeflow_config::ConfigResolver;
use forgeflow_llm::{BackendRouter, Embedder, GenerateOptions};
use forgeflow_memory::{Artifact, ArtifactKind, ArtifactMemory, CombinedRankWeights};
use hashbrown::HashMap;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::custom_code::CustomCodeRegistry;
use crate::error::ToolError;
use crate::external_server::{ExternalServerConfig, ExternalServerHandle};
use crate::interceptor::{InterceptorChain, InvocationContext};
use crate::spec_file::parse_tool_spec;
use crate::tool::{InvocationDescriptor, Tool};

/// Delegate implemented by the Workflow Executor (forgeflow-workflow) so
/// the registry can dispatch `ToolKind::Workflow` invocations without the
/// tools crate depending on the workflow crate ("workflow:
/// delegate to Workflow Executor on the referenced workflow").
#[async_trait::async_trait]
pub trait WorkflowDelegate: Send + Sync {
    async fn run_workflow(&self, workflow_ref: &str, inputs: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Similarity floor below which `best_tool_for` falls back to the
/// role-default model tool instead of a weak match.
pub const BEST_TOOL_MIN_SIMILARITY: f32 = 0.4;
/// Similarity floor for generalize→search duplicate avoidance.
pub const DUPLICATE_THRESHOLD: f32 = 0.85;

/// Output of the generalize step in the two-step generalize→search
/// duplicate-avoidance flow: a language-model call reduces a
/// concrete request to this shape before the registry searches for an
/// existing match.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GeneralizedToolRequest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub category: String,
}

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Tool>>,
    external_servers: RwLock<HashMap<String, Arc<ExternalServerHandle>>>,
    memory: Arc<ArtifactMemory>,
    embedder: Arc<Embedder>,
    router: Arc<BackendRouter>,
    resolver: Arc<ConfigResolver>,
    custom_code: Arc<CustomCodeRegistry>,
    interceptors: Arc<InterceptorChain>,
    workflow_delegate: RwLock<Option<Arc<dyn WorkflowDelegate>>>,
}

impl ToolRegistry {
    pub fn new(
        memory: Arc<ArtifactMemory>,
        embedder: Arc<Embedder>,
        router: Arc<BackendRouter>,
        resolver: Arc<ConfigResolver>,
        custom_code: Arc<CustomCodeRegistry>,
        interceptors: Arc<InterceptorChain>,
    ) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            external_servers: RwLock::new(HashMap::new()),
            memory,
            embedder,
            router,
            resolver,
            custom_code,
            interceptors,
            workflow_delegate: RwLock::new(None),
        }
    }

    /// Wire the Workflow Executor in after construction (the executor
    /// itself is constructed with a handle to this registry, so the two
    /// can't be built in one step).
    pub fn set_workflow_delegate(&self, delegate: Arc<dyn WorkflowDelegate>) {
        *self.workflow_delegate.write() = Some(delegate);
    }

    /// Load every `*.yaml`/`*.yml` file in `dir` as a tool spec, non-blocking: each file read is its own task.
    pub async fn load_spec_dir(&self, dir: &Path) -> Result<usize, ToolError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| ToolError::ToolNotFound(format!("{}: {e}", dir.display())))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| ToolError::ToolNotFound(e.to_string()))? {
            let path = entry.path();
            if matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")) {
                paths.push(path);
            }
        }

        let mut loaded = 0;
        let mut handles = Vec::new();
        for path in paths {
            handles.push(tokio::spawn(async move { tokio::fs::read_to_string(&path).await.map(|content| (path, content)) }));
        }
        for handle in handles {
            let (path, content) = handle
                .await
                .map_err(|e| ToolError::ToolNotFound(e.to_string()))?
                .map_err(|e| ToolError::ToolNotFound(e.to_string()))?;
            let tool = parse_tool_spec(&content).map_err(|e| ToolError::UnknownToolKind(format!("{}: {e}", path.display())))?;
            self.register_tool(tool).await?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Insert a tool locally and index it into Artifact Memory as a `tool`
    /// artifact for semantic search (discovery step (b)).
    pub async fn register_tool(&self, tool: Tool) -> Result<(), ToolError> {
        if self.tools.read().contains_key(&tool.name) {
            return Err(ToolError::DuplicateToolId(tool.name));
        }

        let embedding_text = format!("{} {}", tool.description, tool.tags.iter().cloned().collect::<Vec<_>>().join(" "));
        let embedding = self.embedder.embed(&embedding_text).await.ok();

        let mut artifact = Artifact::new(ArtifactKind::Tool, tool.name.clone(), tool.description.clone(), serialize_tool(&tool)?);
        // Keyed by tool_id (not a fresh artifact id) so `invoke` can increment
        // usage against this record without keeping a separate tool_id ->
        // artifact_id map ("track_usage").
        artifact.artifact_id = tool.tool_id.clone();
        artifact.tags = tool.tags.clone();
        artifact.embedding = embedding;
        artifact.embedding_model_id = Some(self.embedder.model_id().model_key.clone());
        self.memory.store(artifact).await?;

        self.tools.write().insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Open connections to every enabled external server in parallel and
    /// append their remote tool lists, namespaced
    /// `external_<server>_<tool>` (discovery step (c)).
    pub async fn connect_external_servers(&self, configs: &[ExternalServerConfig]) -> Result<(), ToolError> {
        let mut handles = Vec::new();
        for config in configs.iter().filter(|c| c.enabled).cloned() {
            handles.push(tokio::spawn(async move {
                let handle = ExternalServerHandle::connect(&config).await?;
                let remote_tools = handle.list_tools().await?;
                Ok::<_, ToolError>((config.name, Arc::new(handle), remote_tools))
            }));
        }

        for handle in handles {
            let (server_name, connection, remote_tools) = match handle.await {
                Ok(Ok(value)) => value,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "external protocol server connection failed");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "external protocol server connect task panicked");
                    continue;
                }
            };

            for remote in &remote_tools {
                let namespaced_name = format!("external_{server_name}_{}", remote.name);
                let tool = Tool::new(
                    namespaced_name.clone(),
                    remote.description.clone(),
                    InvocationDescriptor::ExternalProtocolServer { server_name: server_name.clone(), remote_tool_name: remote.name.clone() },
                    Default::default(),
                    remote.input_schema.clone(),
                    remote.output_schema.clone(),
                    Default::default(),
                    Default::default(),
                );
                if let Err(err) = self.register_tool(tool).await {
                    tracing::warn!(tool = %namespaced_name, error = %err, "failed to register remote tool");
                }
            }
            self.external_servers.write().insert(server_name, connection);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Tool, ToolError> {
        self.tools.read().get(name).cloned().ok_or_else(|| ToolError::ToolNotFound(name.to_string()))
    }

    /// `best_tool_for(task_description, k)`: top-ranked tool
    /// artifacts by description+tags similarity; falls back to
    /// `fallback_tool` when nothing clears the minimum threshold.
    pub async fn best_tool_for(&self, task_description: &str, k: usize, fallback_tool: Option<&str>) -> Result<Vec<Tool>, ToolError> {
        let embedding = self.embedder.embed(task_description).await?;
        let ranked = self
            .memory
            .find_similar(&embedding, Some(ArtifactKind::Tool), k, CombinedRankWeights::default())
            .await?;

        let mut tools: Vec<Tool> = Vec::new();
        for candidate in &ranked {
            if candidate.similarity < BEST_TOOL_MIN_SIMILARITY {
                continue;
            }
            if let Ok(tool) = deserialize_tool(&candidate.artifact.content) {
                tools.push(tool);
            }
        }

        if tools.is_empty() {
            if let Some(name) = fallback_tool {
                if let Ok(tool) = self.get(name) {
                    tools.push(tool);
                }
            }
        }
        Ok(tools)
    }

    /// Generalize→search duplicate avoidance: given the
    /// already-generalized `{name, description, category}`, return an
    /// existing tool if one clears `DUPLICATE_THRESHOLD`, incrementing its
    /// usage instead of letting the caller create a new one.
    pub async fn find_duplicate(&self, generalized: &GeneralizedToolRequest) -> Result<Option<Tool>, ToolError> {
        let embedding_text = format!("{} {} {}", generalized.name, generalized.description, generalized.category);
        let embedding = self.embedder.embed(&embedding_text).await?;
        let ranked = self.memory.find_similar(&embedding, Some(ArtifactKind::Tool), 1, CombinedRankWeights::default()).await?;

        if let Some(top) = ranked.into_iter().next() {
            if top.similarity >= DUPLICATE_THRESHOLD {
                self.memory.increment_usage(&top.artifact.artifact_id)?;
                return Ok(Some(deserialize_tool(&top.artifact.content)?));
            }
        }
        Ok(None)
    }

    /// Invoke a tool by name, dispatching on its kind and wrapping the
    /// call in the interceptor chain and its declared timeout.
    pub async fn invoke(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        request_id: &str,
        workflow_id: Option<String>,
        step_id: Option<String>,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self.get(tool_name)?;

        let mut context = InvocationContext::new(request_id, tool_name, args.to_string());
        context.workflow_id = workflow_id;
        context.step_id = step_id;
        self.interceptors.before(&mut context);

        let timeout = Duration::from_millis(tool.constraints.timeout_ms);
        let outcome = tokio::time::timeout(timeout, self.dispatch(&tool, args)).await;

        match outcome {
            Ok(Ok(result)) => {
                self.interceptors.after(&context, &result);
                if tool.metadata.track_usage {
                    if let Err(err) = self.memory.increment_usage(&tool.tool_id) {
                        tracing::warn!(tool = %tool.name, error = %err, "failed to record tool usage");
                    }
                }
                Ok(result)
            }
            Ok(Err(err)) => {
                if !self.interceptors.on_exception(&context, &err.to_string()) {
                    return Err(err);
                }
                Ok(serde_json::Value::Null)
            }
            Err(_) => {
                let err = ToolError::InvocationTimeout { tool: tool_name.to_string(), timeout_ms: tool.constraints.timeout_ms };
                self.interceptors.on_exception(&context, &err.to_string());
                Err(err)
            }
        }
    }

    async fn dispatch(&self, tool: &Tool, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        match &tool.invocation {
            InvocationDescriptor::LanguageModel { model_key, system_prompt, prompt_template, temperature, max_tokens } => {
                let bindings = args
                    .as_object()
                    .map(|map| map.iter().map(|(k, v)| (k.clone(), value_to_binding(v))).collect())
                    .unwrap_or_default();
                let rendered = prompt_template.as_deref().map(|t| render_template(t, &bindings)).unwrap_or_else(|| args.to_string());
                let prompt = match system_prompt {
                    Some(system) => format!("{system}\n\n{rendered}"),
                    None => rendered,
                };
                let meta = self.resolver.model_key_metadata(model_key).map_err(|e| ToolError::ToolNotFound(e.to_string()))?;
                let options = GenerateOptions { temperature: *temperature, max_tokens: *max_tokens, ..Default::default() };
                let text = self.router.generate(&meta.model_name, model_key, &prompt, &options).await?;
                Ok(serde_json::Value::String(text))
            }
            InvocationDescriptor::Executable { command, args: cli_args, .. } => {
                let mut child = Command::new(command)
                    .args(cli_args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| ToolError::InvocationFailed { tool: tool.name.clone(), exit_code: -1, stderr: e.to_string() })?;

                if let Some(mut stdin) = child.stdin.take() {
                    let payload = args.to_string();
                    stdin
                        .write_all(payload.as_bytes())
                        .await
                        .map_err(|e| ToolError::InvocationFailed { tool: tool.name.clone(), exit_code: -1, stderr: e.to_string() })?;
                }

                let output = child
                    .wait_with_output()
                    .await
                    .map_err(|e| ToolError::InvocationFailed { tool: tool.name.clone(), exit_code: -1, stderr: e.to_string() })?;

                if !output.status.success() {
                    return Err(ToolError::InvocationFailed {
                        tool: tool.name.clone(),
                        exit_code: output.status.code().unwrap_or(-1),
                        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    });
                }

                serde_json::from_slice(&output.stdout)
                    .map_err(|e| ToolError::InvocationFailed { tool: tool.name.clone(), exit_code: 0, stderr: format!("stdout was not JSON: {e}") })
            }
            InvocationDescriptor::Workflow { workflow_ref } => {
                let delegate = self
                    .workflow_delegate
                    .read()
                    .clone()
                    .ok_or_else(|| ToolError::ToolNotFound(format!("no workflow executor wired for '{workflow_ref}'")))?;
                delegate.run_workflow(workflow_ref, args).await
            }
            InvocationDescriptor::CustomCode { module, class, config } => self.custom_code.call(module, class, config, &args).await,
            InvocationDescriptor::ExternalProtocolServer { server_name, remote_tool_name } => {
                let handle = self
                    .external_servers
                    .read()
                    .get(server_name)
                    .cloned()
                    .ok_or_else(|| ToolError::ExternalServerUnavailable(server_name.clone()))?;
                handle.call_tool(remote_tool_name, args).await
            }
            InvocationDescriptor::ApiSpec { spec_path, .. } => {
                Err(ToolError::ToolNotFound(format!("api_spec tools require an HTTP caller bound to '{spec_path}' at startup")))
            }
        }
    }
}

fn value_to_binding(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn serialize_tool(tool: &Tool) -> Result<String, ToolError> {
    serde_json::to_string(tool).map_err(|e| ToolError::UnknownToolKind(format!("failed to serialize tool: {e}")))
}

fn deserialize_tool(content: &str) -> Result<Tool, ToolError> {
    serde_json::from_str(content).map_err(|e| ToolError::UnknownToolKind(format!("failed to deserialize tool: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_to_binding_unwraps_strings() {
        assert_eq!(value_to_binding(&serde_json::json!("hello")), "hello");
        assert_eq!(value_to_binding(&serde_json::json!(42)), "42");
    }
}
