//! The Orchestrator: coordinates the reuse layer, generation
//! at the `overseer` role, validation, tool generalization, execution,
//! escalation, and auto-repair into the one end-to-end request flow. A
//! thin struct holding its collaborators with delegating async methods,
//! the same shape as `vtcode-core`'s `orchestrator::DistributedOrchestrator`
//! (scheduler + executor registry held by value, `new`/`Default`, a single
//! `#[cfg(test)] mod tests` block at the bottom) — generalized here from
//! "schedule work on a target" to "turn a request into an executed,
//! remembered workflow".

use std::path::PathBuf;
use std::sync::Arc;

use forgeflow_commons::{ErrorCategory, ErrorContext, ErrorEnvelope};
use forgeflow_config::{ConfigResolver, Role};
use forgeflow_llm::{BackendRouter, Embedder, GenerateOptions, RoutingError};
use forgeflow_memory::{
    best_fix_pattern, Artifact, ArtifactKind, ArtifactMemory, ClusterOptimizer, CombinedRankWeights, FixPattern, MemoryError, ReuseDecision,
    ReuseLayer, Scope,
};
use forgeflow_tools::{GeneralizedToolRequest, InvocationDescriptor, Tool, ToolError, ToolRegistry};
use forgeflow_workflow::{validate, ExecutionReport, WorkflowError, WorkflowExecutor, WorkflowSpec};
use serde::Deserialize;

use crate::promotion::PromotionHistory;

/// Generation complexity tier passed to `ConfigResolver::resolve_model`
/// when a role has no explicit mapping ("level's default
/// model_key").
const DEFAULT_LEVEL: &str = "standard";

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("overseer generation failed: {0}")]
    Generation(#[from] RoutingError),
    #[error("overseer response was not a valid workflow spec: {0}")]
    MalformedSpec(String),
    #[error(transparent)]
    Validation(#[from] WorkflowError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("escalation chain exhausted after {attempts} attempt(s): {last_error}")]
    EscalationExhausted { attempts: u32, last_error: String },
}

impl OrchestratorError {
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Generation(e) => match e {
                RoutingError::UnroutableModel(_) => "UnroutableModel",
                RoutingError::BackendUnavailable { .. } => "BackendUnavailable",
                RoutingError::BudgetExceeded { .. } => "BudgetExceeded",
                RoutingError::Config(_) => "Configuration",
            },
            OrchestratorError::MalformedSpec(_) => "ValidationError",
            OrchestratorError::Validation(_) => "ValidationError",
            OrchestratorError::Tool(_) => "Registry",
            OrchestratorError::Memory(_) => "Memory",
            OrchestratorError::EscalationExhausted { .. } => "WorkflowTimeout",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::Generation(RoutingError::BudgetExceeded { .. }) => ErrorCategory::BudgetExceeded,
            OrchestratorError::Generation(_) => ErrorCategory::ServiceUnavailable,
            OrchestratorError::MalformedSpec(_) | OrchestratorError::Validation(_) => ErrorCategory::Workflow,
            OrchestratorError::Tool(_) => ErrorCategory::Registry,
            OrchestratorError::Memory(_) => ErrorCategory::Memory,
            OrchestratorError::EscalationExhausted { .. } => ErrorCategory::Workflow,
        }
    }

    pub fn into_envelope(self, context: ErrorContext) -> ErrorEnvelope {
        let code = self.code();
        let category = self.category();
        ErrorEnvelope::new(code, category, self.to_string()).with_context(context)
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedToolSpec {
    name: String,
    description: String,
    invocation: InvocationDescriptor,
}

/// What a request resolved to: either an existing artifact reused
/// directly, or a freshly generated-and-executed workflow.
pub struct OrchestratorOutcome {
    pub report: ExecutionReport,
    pub reused: bool,
    pub similarity: Option<f32>,
    pub escalation_attempts: u32,
    pub auto_repaired: bool,
}

pub struct OrchestratorConfig {
    /// Maximum number of escalation-tier regenerate+execute attempts
    /// after the initial (overseer-role) attempt fails.
    pub escalation_budget: u32,
    /// Whether a persistent failure may trigger an auto-repair attempt.
    pub auto_repair_enabled: bool,
    pub promotion_history_path: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { escalation_budget: 2, auto_repair_enabled: true, promotion_history_path: PathBuf::from(".forgeflow/promotion_history.json") }
    }
}

pub struct Orchestrator {
    memory: Arc<ArtifactMemory>,
    embedder: Arc<Embedder>,
    router: Arc<BackendRouter>,
    resolver: Arc<ConfigResolver>,
    registry: Arc<ToolRegistry>,
    executor: Arc<WorkflowExecutor>,
    reuse: ReuseLayer,
    cluster_optimizer: ClusterOptimizer,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        memory: Arc<ArtifactMemory>,
        embedder: Arc<Embedder>,
        router: Arc<BackendRouter>,
        resolver: Arc<ConfigResolver>,
        registry: Arc<ToolRegistry>,
        executor: Arc<WorkflowExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        let reuse = ReuseLayer::new(Arc::clone(&memory));
        let cluster_optimizer = ClusterOptimizer::new(Arc::clone(&memory));
        Self { memory, embedder, router, resolver, registry, executor, reuse, cluster_optimizer, config }
    }

    /// Run the full flow for one request.
    pub async fn handle_request(&self, request_text: &str, inputs: serde_json::Value, request_id: &str) -> Result<OrchestratorOutcome, OrchestratorError> {
        let query_embedding = self.embedder.embed(request_text).await?;

        if let Some(outcome) = self.try_reuse(&query_embedding, &inputs, request_id).await? {
            return Ok(outcome);
        }

        let (level, options) = self.generation_options(None);
        let spec = self.generate_and_validate(Role::Overseer, &level, request_text, &options).await;

        match spec {
            Ok(spec) => match self.resolve_and_execute(&spec, inputs.clone(), request_id).await {
                Ok(report) if report.succeeded => {
                    self.remember_success(request_text, &query_embedding, &spec).await?;
                    Ok(OrchestratorOutcome { report, reused: false, similarity: None, escalation_attempts: 0, auto_repaired: false })
                }
                Ok(report) => self.on_failure(request_text, &query_embedding, request_id, &inputs, &spec, "workflow completed with a failed step").await.or(Ok(OrchestratorOutcome {
                    report,
                    reused: false,
                    similarity: None,
                    escalation_attempts: 0,
                    auto_repaired: false,
                })),
                Err(err) => self.on_failure(request_text, &query_embedding, request_id, &inputs, &spec, &err.to_string()).await,
            },
            Err(err) => self.escalate(request_text, &query_embedding, request_id, &inputs, &err.to_string()).await,
        }
    }

    async fn try_reuse(&self, query_embedding: &[f32], inputs: &serde_json::Value, request_id: &str) -> Result<Option<OrchestratorOutcome>, OrchestratorError> {
        match self.reuse.evaluate(query_embedding, Some(ArtifactKind::Workflow)).await? {
            ReuseDecision::Reuse { artifact, similarity } => {
                self.memory.increment_usage(&artifact.artifact_id)?;
                let spec: WorkflowSpec = serde_json::from_str(&artifact.content).map_err(|e| OrchestratorError::MalformedSpec(e.to_string()))?;
                let report = self.executor.execute(&spec, inputs.clone(), request_id).await?;
                Ok(Some(OrchestratorOutcome { report, reused: true, similarity: Some(similarity), escalation_attempts: 0, auto_repaired: false }))
            }
            ReuseDecision::GeneralizeExisting { .. } | ReuseDecision::CreateNew => Ok(None),
        }
    }

    fn generation_options(&self, budget: Option<f64>) -> (String, GenerateOptions) {
        (DEFAULT_LEVEL.to_string(), GenerateOptions { budget, ..GenerateOptions::default() })
    }

    async fn generate_and_validate(&self, role: Role, level: &str, request_text: &str, options: &GenerateOptions) -> Result<WorkflowSpec, OrchestratorError> {
        let raw = self.router.generate_for_role(role, level, request_text, options).await?;
        let spec: WorkflowSpec = serde_json::from_str(&raw).map_err(|e| OrchestratorError::MalformedSpec(e.to_string()))?;
        validate(&spec, None)?;
        Ok(spec)
    }

    /// Step (c): for any step referencing a tool the registry doesn't
    /// know, run generalize→duplicate-check, registering a synthesized
    /// tool only when no near-duplicate already exists.
    async fn resolve_unregistered_tools(&self, spec: &WorkflowSpec, request_text: &str) -> Result<(), OrchestratorError> {
        for step in &spec.steps {
            if self.registry.get(&step.tool).is_ok() {
                continue;
            }
            if !step.generate_tool {
                return Err(OrchestratorError::Tool(ToolError::ToolNotFound(step.tool.clone())));
            }

            let generalized = GeneralizedToolRequest {
                name: step.tool.clone(),
                description: if step.description.is_empty() { request_text.to_string() } else { step.description.clone() },
                category: format!("{:?}", step.kind),
            };

            if let Some(existing) = self.registry.find_duplicate(&generalized).await? {
                let mut alias = existing.clone();
                alias.name = step.tool.clone();
                alias.tool_id = uuid::Uuid::new_v4().to_string();
                self.registry.register_tool(alias).await?;
                continue;
            }

            let tool = self.synthesize_tool(&generalized).await?;
            self.registry.register_tool(tool).await?;
        }
        Ok(())
    }

    /// Ask the `generator` role to emit a full tool definition for a
    /// generalized request with no existing near-duplicate.
    async fn synthesize_tool(&self, generalized: &GeneralizedToolRequest) -> Result<Tool, OrchestratorError> {
        let (level, options) = self.generation_options(None);
        let prompt = format!(
            "Define a tool named '{}' in category '{}' that: {}. Respond with JSON {{name, description, invocation}}.",
            generalized.name, generalized.category, generalized.description
        );
        let raw = self.router.generate_for_role(Role::Generator, &level, &prompt, &options).await?;
        let generated: GeneratedToolSpec = serde_json::from_str(&raw).map_err(|e| OrchestratorError::MalformedSpec(e.to_string()))?;
        Ok(Tool::new(
            generated.name,
            generated.description,
            generated.invocation,
            Default::default(),
            serde_json::Value::Null,
            serde_json::Value::Null,
            Default::default(),
            Default::default(),
        ))
    }

    async fn resolve_and_execute(&self, spec: &WorkflowSpec, inputs: serde_json::Value, request_id: &str) -> Result<ExecutionReport, OrchestratorError> {
        self.resolve_unregistered_tools(spec, &spec.description).await?;
        self.executor.register_workflow(spec.clone());
        Ok(self.executor.execute(spec, inputs, request_id).await?)
    }

    async fn remember_success(&self, request_text: &str, query_embedding: &[f32], spec: &WorkflowSpec) -> Result<(), OrchestratorError> {
        let content = serde_json::to_string(spec).map_err(|e| OrchestratorError::MalformedSpec(e.to_string()))?;
        let mut artifact = Artifact::new(ArtifactKind::Workflow, spec.workflow_id.clone(), request_text.to_string(), content);
        artifact.embedding = Some(query_embedding.to_vec());
        artifact.embedding_model_id = Some(self.embedder.model_id().model_key.clone());
        self.memory.store(artifact).await?;
        Ok(())
    }

    /// Step (f): walk the `escalation` role's fallback chain, regenerating
    /// and re-executing from scratch, up to `escalation_budget` attempts.
    async fn escalate(
        &self,
        request_text: &str,
        query_embedding: &[f32],
        request_id: &str,
        inputs: &serde_json::Value,
        last_error: &str,
    ) -> Result<OrchestratorOutcome, OrchestratorError> {
        let mut last_error = last_error.to_string();
        for attempt in 1..=self.config.escalation_budget {
            let (level, options) = self.generation_options(Some(10.0 * attempt as f64));
            let options = GenerateOptions { retry: forgeflow_llm::RetryPolicy { max_retries: options.retry.max_retries + attempt, ..options.retry }, ..options };

            match self.generate_and_validate(Role::Escalation, &level, request_text, &options).await {
                Ok(spec) => match self.resolve_and_execute(&spec, inputs.clone(), request_id).await {
                    Ok(report) if report.succeeded => {
                        self.remember_success(request_text, query_embedding, &spec).await?;
                        return Ok(OrchestratorOutcome { report, reused: false, similarity: None, escalation_attempts: attempt, auto_repaired: false });
                    }
                    Ok(_) => last_error = "workflow completed with a failed step".to_string(),
                    Err(err) => last_error = err.to_string(),
                },
                Err(err) => last_error = err.to_string(),
            }
        }

        if self.config.auto_repair_enabled {
            if let Some(outcome) = self.try_auto_repair(request_text, query_embedding, request_id, inputs, &last_error).await? {
                return Ok(outcome);
            }
        }

        Err(OrchestratorError::EscalationExhausted { attempts: self.config.escalation_budget, last_error })
    }

    async fn on_failure(
        &self,
        request_text: &str,
        query_embedding: &[f32],
        request_id: &str,
        inputs: &serde_json::Value,
        _spec: &WorkflowSpec,
        reason: &str,
    ) -> Result<OrchestratorOutcome, OrchestratorError> {
        self.escalate(request_text, query_embedding, request_id, inputs, reason).await
    }

    /// Step (g): search fix patterns visible at global scope (the caller
    /// has no single failing tool_id at this granularity — a sub-workflow
    /// step failure is attributed to the whole request), apply the
    /// top-ranked fix, then require a full re-execution of the original
    /// (non-escalated) workflow with the patch applied before any
    /// promotion (resolution of the auto-repair Open Question).
    async fn try_auto_repair(
        &self,
        request_text: &str,
        query_embedding: &[f32],
        request_id: &str,
        inputs: &serde_json::Value,
        error_signature: &str,
    ) -> Result<Option<OrchestratorOutcome>, OrchestratorError> {
        let ranked = self.memory.find_similar(query_embedding, Some(ArtifactKind::Pattern), 10, CombinedRankWeights::default()).await?;
        let mut patterns = Vec::new();
        for candidate in &ranked {
            if let Ok(pattern) = serde_json::from_str::<FixPattern>(&candidate.artifact.content) {
                patterns.push(pattern);
            }
        }

        let Some(best) = best_fix_pattern(&patterns, "global", error_signature) else {
            return Ok(None);
        };

        let Ok(patched_tool) = serde_json::from_str::<Tool>(&best.fix_content) else {
            return Ok(None);
        };

        if self.registry.get(&patched_tool.name).is_ok() {
            // Best-effort: the registry has no in-place update, so a
            // repeated patch attempt against an already-patched tool is a
            // no-op rather than a hard failure.
            return Ok(None);
        }
        self.registry.register_tool(patched_tool).await?;

        let (level, options) = self.generation_options(None);
        let repaired_spec = match self.generate_and_validate(Role::Overseer, &level, request_text, &options).await {
            Ok(spec) => spec,
            Err(_) => return Ok(None),
        };

        // Mandatory full re-execution before promotion.
        let report = self.resolve_and_execute(&repaired_spec, inputs.clone(), request_id).await.ok();
        let succeeded = report.as_ref().is_some_and(|r| r.succeeded);

        let mut patched_pattern = best.clone();
        patched_pattern.record_outcome(succeeded);
        let pattern_content = serde_json::to_string(&patched_pattern).map_err(|e| OrchestratorError::MalformedSpec(e.to_string()))?;
        let mut artifact = Artifact::new(ArtifactKind::Pattern, patched_pattern.pattern_id.clone(), patched_pattern.fix_description.clone(), pattern_content);
        artifact.artifact_id = patched_pattern.pattern_id.clone();
        self.memory.store(artifact).await?;

        if !succeeded {
            return Ok(None);
        }

        self.remember_success(request_text, query_embedding, &repaired_spec).await?;
        Ok(Some(OrchestratorOutcome {
            report: report.expect("succeeded implies a report was produced"),
            reused: false,
            similarity: None,
            escalation_attempts: self.config.escalation_budget,
            auto_repaired: true,
        }))
    }

    /// Cluster maintenance: exposed so the caller (e.g. a
    /// scheduled background task) can run an optimization pass without
    /// the Orchestrator owning a cron schedule itself.
    pub fn cluster_optimizer(&self) -> &ClusterOptimizer {
        &self.cluster_optimizer
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn memory(&self) -> &Arc<ArtifactMemory> {
        &self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_stable_strings() {
        let err = OrchestratorError::MalformedSpec("bad json".to_string());
        assert_eq!(err.code(), "ValidationError");
        assert_eq!(err.category(), ErrorCategory::Workflow);
    }

    #[test]
    fn escalation_exhausted_carries_attempt_count() {
        let err = OrchestratorError::EscalationExhausted { attempts: 3, last_error: "boom".to_string() };
        assert!(err.to_string().contains("3 attempt"));
    }
}
