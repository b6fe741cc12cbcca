//! C8 Workflow Executor: runs a validated `WorkflowSpec`'s
//! steps against the Tool Registry, respecting the dependency graph,
//! per-step timeouts and retries, and failure propagation, then resolves
//! declared outputs and (optionally) runs behavioral validation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use forgeflow_config::TrustedPackageAllowlist;
use forgeflow_tools::{ToolError, ToolRegistry, WorkflowDelegate};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::behavioral::{evaluate_scenario, ScenarioResult};
use crate::error::WorkflowError;
use crate::graph::DependencyGraph;
use crate::reference::SourceReference;
use crate::spec::WorkflowSpec;
use crate::validation::validate;

/// Independent steps are spawned together, bounded by this many at once
/// per round ("bounded parallelism").
const DEFAULT_MAX_CONCURRENCY: usize = 8;
const RETRY_BASE_DELAY_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    /// A step whose dependency chain never completed because an upstream
    /// step permanently failed ("not-yet-started steps are
    /// skipped").
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub status: StepStatus,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub workflow_id: String,
    pub succeeded: bool,
    pub outputs: serde_json::Value,
    pub step_outcomes: HashMap<String, StepOutcome>,
    pub scenario_results: Vec<ScenarioResult>,
}

pub struct WorkflowExecutor {
    registry: Arc<ToolRegistry>,
    allowlist: Option<Arc<TrustedPackageAllowlist>>,
    max_concurrency: usize,
    /// Sub-workflows this executor can dispatch to when a step's tool
    /// resolves to `InvocationDescriptor::Workflow` and the registry calls
    /// back through `WorkflowDelegate` (layering).
    workflows: RwLock<HashMap<String, WorkflowSpec>>,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<ToolRegistry>, allowlist: Option<Arc<TrustedPackageAllowlist>>) -> Self {
        Self { registry, allowlist, max_concurrency: DEFAULT_MAX_CONCURRENCY, workflows: RwLock::new(HashMap::new()) }
    }

    pub fn register_workflow(&self, spec: WorkflowSpec) {
        self.workflows.write().insert(spec.workflow_id.clone(), spec);
    }

    pub async fn execute(&self, spec: &WorkflowSpec, inputs: serde_json::Value, request_id: &str) -> Result<ExecutionReport, WorkflowError> {
        self.execute_with_cancellation(spec, inputs, request_id, None).await
    }

    pub async fn execute_with_cancellation(
        &self,
        spec: &WorkflowSpec,
        inputs: serde_json::Value,
        request_id: &str,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<ExecutionReport, WorkflowError> {
        match spec.timeout_ms {
            Some(timeout_ms) => {
                let cancel = cancel.unwrap_or_default();
                let timeout = Duration::from_millis(timeout_ms);
                match tokio::time::timeout(timeout, self.run_to_completion(spec, inputs, request_id, Some(Arc::clone(&cancel)))).await {
                    Ok(result) => result,
                    Err(_) => {
                        cancel.store(true, Ordering::SeqCst);
                        tracing::warn!(workflow = %spec.workflow_id, timeout_ms, "workflow exceeded its wall-clock timeout");
                        Err(WorkflowError::WorkflowTimeout)
                    }
                }
            }
            None => self.run_to_completion(spec, inputs, request_id, cancel).await,
        }
    }

    async fn run_to_completion(
        &self,
        spec: &WorkflowSpec,
        inputs: serde_json::Value,
        request_id: &str,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<ExecutionReport, WorkflowError> {
        let graph = validate(spec, self.allowlist.as_deref())?;

        let mut completed: HashMap<String, serde_json::Value> = HashMap::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut outcomes: HashMap<String, StepOutcome> = HashMap::new();
        let total_steps = spec.steps.len();

        loop {
            if completed.len() + failed.len() >= total_steps {
                break;
            }
            if let Some(flag) = &cancel {
                if flag.load(Ordering::SeqCst) {
                    return Err(WorkflowError::Cancelled);
                }
            }

            let completed_keys: HashSet<String> = completed.keys().cloned().collect();
            let blocked: HashSet<String> = failed.clone();
            let ready: Vec<String> = graph
                .ready_steps(&completed_keys, &HashSet::new())
                .into_iter()
                .filter(|id| !blocked.contains(id))
                .filter(|id| graph.dependencies_of(id).iter().all(|dep| !blocked.contains(dep)))
                .collect();

            if ready.is_empty() {
                // No progress possible: every remaining step is downstream
                // of a permanent failure. Mark them skipped and stop.
                for step in &spec.steps {
                    if !completed.contains_key(&step.step_id) && !failed.contains(&step.step_id) {
                        outcomes.insert(
                            step.step_id.clone(),
                            StepOutcome { status: StepStatus::Skipped, output: None, error: None, attempts: 0, duration_ms: 0 },
                        );
                    }
                }
                break;
            }

            let batch: Vec<String> = ready.into_iter().take(self.max_concurrency).collect();
            let mut join_set = tokio::task::JoinSet::new();
            for step_id in batch {
                let step = spec.step(&step_id).expect("ready step must exist in spec").clone();
                let registry = Arc::clone(&self.registry);
                let context = build_step_context(&inputs, &completed);
                let request_id = request_id.to_string();
                let workflow_id = spec.workflow_id.clone();
                join_set.spawn(async move {
                    let outcome = run_step_with_retry(&registry, &step, &context, &request_id, &workflow_id).await;
                    (step_id, outcome)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let (step_id, outcome) = joined.map_err(|e| WorkflowError::Validation(format!("step task panicked: {e}")))?;
                match &outcome.status {
                    StepStatus::Completed => {
                        completed.insert(step_id.clone(), outcome.output.clone().unwrap_or(serde_json::Value::Null));
                    }
                    StepStatus::Failed => {
                        failed.insert(step_id.clone());
                    }
                    StepStatus::Skipped => {}
                }
                outcomes.insert(step_id, outcome);
            }
        }

        let succeeded = failed.is_empty();
        let outputs = resolve_outputs(spec, &inputs, &completed);

        let scenario_results = match &spec.bdd_specification {
            Some(bdd) => {
                let context = serde_json::json!({ "inputs": inputs, "outputs": outputs, "metadata": { "succeeded": succeeded } });
                let results: Vec<ScenarioResult> = bdd.scenarios.iter().map(|scenario| evaluate_scenario(&context, scenario)).collect();
                if bdd.strict {
                    if let Some(failure) = results.iter().find(|r| !r.passed) {
                        return Err(WorkflowError::BehavioralValidationFailure {
                            scenario: failure.scenario.clone(),
                            reason: failure.failures.join("; "),
                        });
                    }
                }
                results
            }
            None => Vec::new(),
        };

        if !succeeded {
            let (failed_step, outcome) = outcomes
                .iter()
                .find(|(_, outcome)| outcome.status == StepStatus::Failed)
                .map(|(id, outcome)| (id.clone(), outcome.clone()))
                .expect("at least one step failed");
            tracing::warn!(workflow = %spec.workflow_id, step = %failed_step, error = ?outcome.error, "workflow completed with a failed step");
        }

        Ok(ExecutionReport { workflow_id: spec.workflow_id.clone(), succeeded, outputs, step_outcomes: outcomes, scenario_results })
    }
}

#[async_trait::async_trait]
impl WorkflowDelegate for WorkflowExecutor {
    async fn run_workflow(&self, workflow_ref: &str, inputs: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let spec = self
            .workflows
            .read()
            .get(workflow_ref)
            .cloned()
            .ok_or_else(|| ToolError::ToolNotFound(format!("sub-workflow '{workflow_ref}' is not registered")))?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let report = self
            .execute(&spec, inputs, &request_id)
            .await
            .map_err(|e| ToolError::InvocationFailed { tool: workflow_ref.to_string(), exit_code: -1, stderr: e.to_string() })?;

        if !report.succeeded {
            return Err(ToolError::InvocationFailed {
                tool: workflow_ref.to_string(),
                exit_code: -1,
                stderr: "sub-workflow failed: one or more steps did not complete".to_string(),
            });
        }
        Ok(report.outputs)
    }
}

/// `{"inputs": ..., "steps": {step_id: output_value}}`, used both to
/// resolve each step's `input_mapping` and (after the run) its outputs.
fn build_step_context(inputs: &serde_json::Value, completed: &HashMap<String, serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "inputs": inputs, "steps": completed })
}

fn resolve_reference(context: &serde_json::Value, reference: &str) -> Option<serde_json::Value> {
    match SourceReference::parse(reference)? {
        SourceReference::Input { name } => context.get("inputs").and_then(|v| v.get(&name)).cloned(),
        SourceReference::Step { step_id, output_field } => {
            let value = context.get("steps").and_then(|v| v.get(&step_id))?;
            Some(extract_field(value, &output_field))
        }
    }
}

/// Walk a dot path into `value`; if any segment is absent, fall back to
/// the whole value rather than erroring, since a step's result may be a
/// scalar rather than an object keyed by field name.
fn extract_field(value: &serde_json::Value, field: &str) -> serde_json::Value {
    let mut current = value;
    for segment in field.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return value.clone(),
        }
    }
    current.clone()
}

fn resolve_outputs(spec: &WorkflowSpec, inputs: &serde_json::Value, completed: &HashMap<String, serde_json::Value>) -> serde_json::Value {
    let context = build_step_context(inputs, completed);
    let mut map = serde_json::Map::new();
    for output in &spec.outputs {
        let value = resolve_reference(&context, &output.source_reference).unwrap_or(serde_json::Value::Null);
        map.insert(output.name.clone(), value);
    }
    serde_json::Value::Object(map)
}

async fn run_step_with_retry(
    registry: &Arc<ToolRegistry>,
    step: &crate::spec::WorkflowStep,
    context: &serde_json::Value,
    request_id: &str,
    workflow_id: &str,
) -> StepOutcome {
    let started = Instant::now();
    let mut args = serde_json::Map::new();
    for (var_name, reference) in &step.input_mapping {
        args.insert(var_name.clone(), resolve_reference(context, reference).unwrap_or(serde_json::Value::Null));
    }
    let args = serde_json::Value::Object(args);

    let max_attempts = if step.retry_on_failure { step.max_retries + 1 } else { 1 };
    let mut attempts = 0;
    let mut last_error = None;

    while attempts < max_attempts {
        attempts += 1;
        let timeout = Duration::from_millis(step.timeout_ms);
        let invocation = registry.invoke(&step.tool, args.clone(), request_id, Some(workflow_id.to_string()), Some(step.step_id.clone()));

        match tokio::time::timeout(timeout, invocation).await {
            Ok(Ok(output)) => {
                return StepOutcome {
                    status: StepStatus::Completed,
                    output: Some(output),
                    error: None,
                    attempts,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
            Ok(Err(err)) => last_error = Some(err.to_string()),
            Err(_) => last_error = Some(format!("step '{}' exceeded its {}ms timeout", step.step_id, step.timeout_ms)),
        }

        if attempts < max_attempts {
            use rand::Rng;
            let backoff = RETRY_BASE_DELAY_MS * 2u64.pow(attempts - 1);
            // Jitter avoids every retrying step in a parallel_group waking the
            // registry back up in lockstep.
            let jittered = backoff + rand::rng().random_range(0..=backoff / 4 + 1);
            tokio::time::sleep(Duration::from_millis(jittered)).await;
        }
    }

    StepOutcome { status: StepStatus::Failed, output: None, error: last_error, attempts, duration_ms: started.elapsed().as_millis() as u64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_field_falls_back_to_whole_value_when_path_missing() {
        let value = serde_json::json!("plain string output");
        assert_eq!(extract_field(&value, "nonexistent"), value);
    }

    #[test]
    fn extract_field_walks_nested_objects() {
        let value = serde_json::json!({"outline": {"sections": 3}});
        assert_eq!(extract_field(&value, "outline.sections"), serde_json::json!(3));
    }

    #[test]
    fn resolve_reference_reads_input_and_step_values() {
        let mut completed = HashMap::new();
        completed.insert("a".to_string(), serde_json::json!({"outline": "draft"}));
        let context = build_step_context(&serde_json::json!({"topic": "rust"}), &completed);

        assert_eq!(resolve_reference(&context, "inputs.topic"), Some(serde_json::json!("rust")));
        assert_eq!(resolve_reference(&context, "steps.a.outline"), Some(serde_json::json!("draft")));
        assert_eq!(resolve_reference(&context, "bogus"), None);
    }
}
