//! End-to-end `WorkflowExecutor` runs against a real `ToolRegistry`,
//! covering dependency-ordered execution and step timeout/retry.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use forgeflow_config::{ConfigLayerEntry, ConfigLayerSource, ConfigLayerStack, ConfigResolver};
use forgeflow_llm::embedder::EmbeddingModelId;
use forgeflow_llm::{BackendRouter, Embedder};
use forgeflow_memory::{ArtifactMemory, InMemoryVectorBackend};
use forgeflow_tools::{
    Constraints, CustomCodeHandler, CustomCodeRegistry, InterceptorChain, InvocationDescriptor, Tool, ToolError, ToolMetadata, ToolRegistry,
};
use forgeflow_workflow::{InputDef, OutputDef, StepKind, WorkflowDependencies, WorkflowExecutor, WorkflowSpec, WorkflowStep};

struct FixedEmbeddingBackend;

#[async_trait]
impl forgeflow_llm::EmbeddingBackend for FixedEmbeddingBackend {
    async fn embed_raw(&self, _text: &str) -> Result<Vec<f32>, forgeflow_llm::RoutingError> {
        Ok(vec![0.1, 0.2, 0.3])
    }
}

fn resolver() -> Arc<ConfigResolver> {
    let mut stack = ConfigLayerStack::default();
    stack.push(ConfigLayerEntry::new(ConfigLayerSource::Workspace { file: "forgeflow.toml".into() }, toml::from_str("").unwrap()));
    Arc::new(ConfigResolver::from_layers(&stack, |_| None).unwrap())
}

fn registry(custom_code: Arc<CustomCodeRegistry>) -> Arc<ToolRegistry> {
    let memory = Arc::new(ArtifactMemory::new(Arc::new(InMemoryVectorBackend::new())));
    let embedder = Arc::new(Embedder::new(Arc::new(FixedEmbeddingBackend), EmbeddingModelId { model_key: "test-embed".into(), dimension: 3 }));
    let router = Arc::new(BackendRouter::new(resolver()));
    let interceptors = Arc::new(InterceptorChain::new(vec![]));
    Arc::new(ToolRegistry::new(memory, embedder, router, resolver, custom_code, interceptors))
}

fn registered_tool(name: &str, module: &str, class: &str) -> Tool {
    Tool::new(
        name,
        format!("test tool {name}"),
        InvocationDescriptor::CustomCode { module: module.to_string(), class: class.to_string(), config: serde_json::Value::Null },
        BTreeSet::new(),
        serde_json::json!({}),
        serde_json::json!({}),
        Constraints { timeout_ms: 5_000, ..Constraints::default() },
        ToolMetadata::default(),
    )
}

struct Outline;
#[async_trait]
impl CustomCodeHandler for Outline {
    async fn call(&self, _config: &serde_json::Value, args: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let topic = args.get("topic").and_then(|v| v.as_str()).unwrap_or("untitled");
        Ok(serde_json::json!({ "sections": [format!("{topic} intro"), format!("{topic} body")] }))
    }
}

struct Draft;
#[async_trait]
impl CustomCodeHandler for Draft {
    async fn call(&self, _config: &serde_json::Value, args: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let sections = args.get("sections").cloned().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::json!({ "draft": sections }))
    }
}

#[tokio::test]
async fn dependency_ordered_steps_see_upstream_outputs() {
    let custom_code = Arc::new(CustomCodeRegistry::new());
    custom_code.register("demo", "Outline", Arc::new(Outline));
    custom_code.register("demo", "Draft", Arc::new(Draft));
    let registry = registry(custom_code);
    registry.register_tool(registered_tool("outline_tool", "demo", "Outline")).await.unwrap();
    registry.register_tool(registered_tool("draft_tool", "demo", "Draft")).await.unwrap();

    let executor = WorkflowExecutor::new(Arc::clone(&registry), None);

    let mut draft_inputs = std::collections::HashMap::new();
    draft_inputs.insert("sections".to_string(), "steps.outline.sections".to_string());

    let mut outline_inputs = std::collections::HashMap::new();
    outline_inputs.insert("topic".to_string(), "inputs.topic".to_string());

    let spec = WorkflowSpec {
        workflow_id: "article-pipeline".into(),
        version: semver::Version::new(0, 1, 0),
        description: "outline then draft".into(),
        portable: false,
        inputs: vec![InputDef { name: "topic".into(), type_name: "string".into(), required: true, default: None, description: String::new() }],
        outputs: vec![OutputDef { name: "draft".into(), type_name: "object".into(), source_reference: "steps.draft.draft".into(), description: String::new() }],
        steps: vec![
            WorkflowStep {
                step_id: "outline".into(),
                kind: StepKind::RegisteredTool,
                description: String::new(),
                tool: "outline_tool".into(),
                prompt_template: None,
                input_mapping: outline_inputs,
                output_name: "outline_out".into(),
                timeout_ms: 2_000,
                retry_on_failure: false,
                max_retries: 0,
                parallel_group: None,
                depends_on: vec![],
                generate_tool: false,
            },
            WorkflowStep {
                step_id: "draft".into(),
                kind: StepKind::RegisteredTool,
                description: String::new(),
                tool: "draft_tool".into(),
                prompt_template: None,
                input_mapping: draft_inputs,
                output_name: "draft_out".into(),
                timeout_ms: 2_000,
                retry_on_failure: false,
                max_retries: 0,
                parallel_group: None,
                depends_on: vec!["outline".to_string()],
                generate_tool: false,
            },
        ],
        tool_definitions: vec![],
        bdd_specification: None,
        dependencies: WorkflowDependencies::default(),
        timeout_ms: None,
    };

    let report = executor.execute(&spec, serde_json::json!({"topic": "rust"}), "req-1").await.unwrap();
    assert!(report.succeeded);
    assert_eq!(report.step_outcomes["outline"].status, forgeflow_workflow::StepStatus::Completed);
    assert_eq!(report.step_outcomes["draft"].status, forgeflow_workflow::StepStatus::Completed);
    assert_eq!(
        report.outputs["draft"]["draft"],
        serde_json::json!(["rust intro", "rust body"])
    );
}

struct FlakyThenSucceeds {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl CustomCodeHandler for FlakyThenSucceeds {
    async fn call(&self, _config: &serde_json::Value, _args: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        if self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| if n > 0 { Some(n - 1) } else { None }).is_ok() {
            return Err(ToolError::InvocationFailed { tool: "flaky".into(), exit_code: 1, stderr: "transient failure".into() });
        }
        Ok(serde_json::json!({ "ok": true }))
    }
}

struct AlwaysSlow;
#[async_trait]
impl CustomCodeHandler for AlwaysSlow {
    async fn call(&self, _config: &serde_json::Value, _args: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        Ok(serde_json::json!({ "ok": true }))
    }
}

fn single_step_spec(tool: &str, timeout_ms: u64, retry_on_failure: bool, max_retries: u32) -> WorkflowSpec {
    WorkflowSpec {
        workflow_id: "single-step".into(),
        version: semver::Version::new(0, 1, 0),
        description: String::new(),
        portable: false,
        inputs: vec![],
        outputs: vec![OutputDef { name: "result".into(), type_name: "object".into(), source_reference: "steps.only.result".into(), description: String::new() }],
        steps: vec![WorkflowStep {
            step_id: "only".into(),
            kind: StepKind::RegisteredTool,
            description: String::new(),
            tool: tool.into(),
            prompt_template: None,
            input_mapping: std::collections::HashMap::new(),
            output_name: "only_out".into(),
            timeout_ms,
            retry_on_failure,
            max_retries,
            parallel_group: None,
            depends_on: vec![],
            generate_tool: false,
        }],
        tool_definitions: vec![],
        bdd_specification: None,
        dependencies: WorkflowDependencies::default(),
        timeout_ms: None,
    }
}

#[tokio::test]
async fn step_retries_past_transient_failures_then_succeeds() {
    let custom_code = Arc::new(CustomCodeRegistry::new());
    custom_code.register("demo", "Flaky", Arc::new(FlakyThenSucceeds { remaining_failures: AtomicU32::new(2) }));
    let registry = registry(custom_code);
    registry.register_tool(registered_tool("flaky_tool", "demo", "Flaky")).await.unwrap();

    let executor = WorkflowExecutor::new(Arc::clone(&registry), None);
    let spec = single_step_spec("flaky_tool", 2_000, true, 3);

    let report = executor.execute(&spec, serde_json::Value::Null, "req-2").await.unwrap();
    assert!(report.succeeded);
    let outcome = &report.step_outcomes["only"];
    assert_eq!(outcome.status, forgeflow_workflow::StepStatus::Completed);
    assert_eq!(outcome.attempts, 3);
}

#[tokio::test]
async fn workflow_level_timeout_cancels_the_run() {
    let custom_code = Arc::new(CustomCodeRegistry::new());
    custom_code.register("demo", "Slow", Arc::new(AlwaysSlow));
    let registry = registry(custom_code);
    registry.register_tool(registered_tool("slow_tool", "demo", "Slow")).await.unwrap();

    let executor = WorkflowExecutor::new(Arc::clone(&registry), None);
    let mut spec = single_step_spec("slow_tool", 5_000, false, 0);
    spec.timeout_ms = Some(50);

    let err = executor.execute(&spec, serde_json::Value::Null, "req-4").await.unwrap_err();
    assert!(matches!(err, forgeflow_workflow::WorkflowError::WorkflowTimeout));
}

#[tokio::test]
async fn step_exceeding_timeout_fails_and_is_reported() {
    let custom_code = Arc::new(CustomCodeRegistry::new());
    custom_code.register("demo", "Slow", Arc::new(AlwaysSlow));
    let registry = registry(custom_code);
    registry.register_tool(registered_tool("slow_tool", "demo", "Slow")).await.unwrap();

    let executor = WorkflowExecutor::new(Arc::clone(&registry), None);
    let spec = single_step_spec("slow_tool", 50, false, 0);

    let report = executor.execute(&spec, serde_json::Value::Null, "req-3").await.unwrap();
    assert!(!report.succeeded);
    let outcome = &report.step_outcomes["only"];
    assert_eq!(outcome.status, forgeflow_workflow::StepStatus::Failed);
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.error.as_ref().unwrap().contains("timeout"));
}
