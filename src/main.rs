//! forgeflow - thin binary entry point.
//!
//! Full interactive-CLI argument parsing/terminal rendering is an explicit
//! Non-goal: this binary only wires every component together
//! from configuration/environment and drives one request end-to-end
//! through the Orchestrator, the way `vtcode`'s `src/main.rs` builds its
//! runtime and delegates to `vtcode_core` rather than embedding the agent
//! loop itself.

mod config_loader;
mod llm_backends;
mod orchestrator;
mod promotion;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use forgeflow_config::{Backend, ConfigResolver, Role, TrustedPackageAllowlist};
use forgeflow_llm::{BackendRouter, Embedder};
use forgeflow_llm::embedder::EmbeddingModelId;
use forgeflow_memory::{ArtifactMemory, InMemoryVectorBackend};
use forgeflow_scheduler::{run_monitor, run_outcome_listener, CallableRegistry, CronStore, Scheduler, SchedulerConfig};
use forgeflow_tools::{CustomCodeRegistry, ExceptionCaptureInterceptor, ExternalServerConfig, Interceptor, InterceptorChain, PerformanceBufferDumpInterceptor, PerformanceWindowInterceptor, ToolRegistry};
use forgeflow_workflow::WorkflowExecutor;

use llm_backends::{HttpBackendClient, HttpEmbeddingBackend, WireStyle};
use orchestrator::{Orchestrator, OrchestratorConfig};

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name).ok().map(|v| matches!(v.as_str(), "1" | "true" | "yes")).unwrap_or(default)
}

fn env_num<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Backend -> (base_url env, api_key env, wire style). Base URLs are
/// looked up by a fixed env var per backend; a backend with no base URL
/// set is simply never registered and requests routed to it fail with
/// `BackendUnavailable`, not a panic.
const BACKEND_ENV: &[(Backend, &str, &str, WireStyle)] = &[
    (Backend::Ollama, "OLLAMA_BASE_URL", "OLLAMA_API_KEY", WireStyle::OpenAiChat),
    (Backend::Openai, "OPENAI_BASE_URL", "OPENAI_API_KEY", WireStyle::OpenAiChat),
    (Backend::AzureOpenai, "AZURE_OPENAI_BASE_URL", "AZURE_OPENAI_API_KEY", WireStyle::OpenAiChat),
    (Backend::LmStudio, "LM_STUDIO_BASE_URL", "LM_STUDIO_API_KEY", WireStyle::OpenAiChat),
    (Backend::Anthropic, "ANTHROPIC_BASE_URL", "ANTHROPIC_API_KEY", WireStyle::AnthropicMessages),
];

fn build_router(resolver: Arc<ConfigResolver>) -> BackendRouter {
    let mut router = BackendRouter::new(resolver);
    for (backend, base_url_env, api_key_env, style) in BACKEND_ENV {
        if let Ok(base_url) = std::env::var(base_url_env) {
            let api_key = std::env::var(api_key_env).ok();
            router.register_backend(*backend, Arc::new(HttpBackendClient::new(backend.to_string(), base_url, api_key, *style)));
        }
    }
    router
}

fn build_embedder(resolver: &ConfigResolver) -> Result<Embedder> {
    let model_key = std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "default-embedding".to_string());
    let dimension: usize = env_num("EMBEDDING_DIMENSION", 768usize);
    let base_url = std::env::var("EMBEDDING_BASE_URL").unwrap_or_else(|_| {
        resolver
            .model_key_metadata(&model_key)
            .ok()
            .map(|m| m.model_name.clone())
            .unwrap_or_else(|| "http://localhost:11434/v1".to_string())
    });
    let api_key = std::env::var("EMBEDDING_API_KEY").ok();
    let backend = Arc::new(HttpEmbeddingBackend::new(model_key.clone(), base_url, api_key));
    Ok(Embedder::new(backend, EmbeddingModelId { model_key, dimension }))
}

fn build_interceptor_chain() -> InterceptorChain {
    let mut interceptors: Vec<Arc<dyn Interceptor>> = Vec::new();
    if env_flag("EXCEPTION_CAPTURE_ENABLED", true) {
        interceptors.push(Arc::new(ExceptionCaptureInterceptor::new(env_num("EXCEPTION_CAPTURE_CAPACITY", 256usize))));
    }
    if env_flag("PERF_CAPTURE_ENABLED", true) {
        let buffer_secs: u64 = env_num("BUFFER_DURATION", 30u64);
        let buffer = Arc::new(PerformanceBufferDumpInterceptor::new(std::time::Duration::from_secs(buffer_secs)));
        let window_size: usize = env_num("WINDOW_SIZE", 100usize);
        let min_samples: usize = env_num("MIN_SAMPLES", 10usize);
        let variance_threshold: f64 = env_num("VARIANCE_THRESHOLD", 0.2f64);
        interceptors.push(Arc::new(PerformanceWindowInterceptor::new(window_size, min_samples, variance_threshold, Arc::clone(&buffer))));
        interceptors.push(buffer);
    }
    InterceptorChain::new(interceptors)
}

async fn load_external_servers(path: &Path) -> Result<Vec<ExternalServerConfig>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_yaml::from_str(&raw).with_context(|| format!("parsing external server config {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).with_context(|| format!("reading external server config {}", path.display())),
    }
}

async fn load_allowlist(path: &Path) -> Result<Option<TrustedPackageAllowlist>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(TrustedPackageAllowlist::from_yaml(&raw).map_err(|e| anyhow::anyhow!(e.to_string()))?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading allowlist {}", path.display())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let project_root = std::env::current_dir().context("resolving project root")?;

    let layers = config_loader::load_config_layers(&project_root).await.context("loading config layers")?;
    let resolver = Arc::new(ConfigResolver::from_layers(&layers, |name| std::env::var(name).ok()).context("resolving config")?);

    let router = Arc::new(build_router(Arc::clone(&resolver)));
    let embedder = Arc::new(build_embedder(&resolver)?);

    // `VECTOR_BACKEND_URL`: a persistent backend is opted into by
    // building with the `qdrant` feature and wiring a `QdrantVectorBackend`
    // here; absent that feature this always falls back to the in-memory
    // index, which the rest of the system cannot distinguish from it.
    if std::env::var("VECTOR_BACKEND_URL").is_ok() {
        tracing::info!("VECTOR_BACKEND_URL set but no persistent vector backend compiled in; using in-memory fallback (degraded mode)");
    }
    let memory = Arc::new(ArtifactMemory::new(Arc::new(InMemoryVectorBackend::new())));

    let custom_code = Arc::new(CustomCodeRegistry::new());
    let interceptors = Arc::new(build_interceptor_chain());

    let registry = Arc::new(ToolRegistry::new(
        Arc::clone(&memory),
        Arc::clone(&embedder),
        Arc::clone(&router),
        Arc::clone(&resolver),
        custom_code,
        interceptors,
    ));

    let tool_spec_dir = project_root.join("tools");
    if tool_spec_dir.is_dir() {
        match registry.load_spec_dir(&tool_spec_dir).await {
            Ok(count) => tracing::info!(count, "loaded tool specs"),
            Err(err) => tracing::warn!(error = %err, "failed to load tool spec directory"),
        }
    }

    let external_servers = load_external_servers(&project_root.join(".forgeflow/external_servers.yaml")).await?;
    if !external_servers.is_empty() {
        registry.connect_external_servers(&external_servers).await.context("connecting external protocol servers")?;
    }

    let allowlist_path = std::env::var("TRUSTED_PACKAGES_PATH")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| project_root.join(".forgeflow/allowlist.yaml"));
    let allowlist = load_allowlist(&allowlist_path).await?.map(Arc::new);

    let executor = Arc::new(WorkflowExecutor::new(Arc::clone(&registry), allowlist));
    registry.set_workflow_delegate(Arc::clone(&executor) as Arc<dyn forgeflow_tools::WorkflowDelegate>);

    let callables = Arc::new(CallableRegistry::new());
    let scheduler = Scheduler::new(callables, SchedulerConfig::default());
    let (outcome_tx, outcome_rx) = tokio::sync::mpsc::unbounded_channel();
    let _workers = scheduler.run_workers(outcome_tx);

    let cron_store_path = project_root.join(".forgeflow/scheduled_tasks.json");
    let cron_store = Arc::new(CronStore::load(&cron_store_path).await.unwrap_or_default());
    cron_store.mirror_to_memory(&memory).await.ok();
    let _monitor = run_monitor(Arc::clone(&cron_store), Arc::clone(&scheduler), 30_000);
    let _outcome_listener = run_outcome_listener(Arc::clone(&cron_store), outcome_rx);

    let orchestrator_config = OrchestratorConfig { promotion_history_path: promotion::default_path(&project_root), ..OrchestratorConfig::default() };
    let orchestrator = Orchestrator::new(
        Arc::clone(&memory),
        Arc::clone(&embedder),
        Arc::clone(&router),
        Arc::clone(&resolver),
        Arc::clone(&registry),
        Arc::clone(&executor),
        orchestrator_config,
    );

    let request_text: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if request_text.is_empty() {
        eprintln!("usage: forgeflow <request text>");
        eprintln!("  roles configured: {:?}", [Role::Overseer, Role::Generator, Role::Evaluator, Role::Triage, Role::Escalation]);
        return Ok(());
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    match orchestrator.handle_request(&request_text, serde_json::json!({}), &request_id).await {
        Ok(outcome) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "reused": outcome.reused,
                    "similarity": outcome.similarity,
                    "escalation_attempts": outcome.escalation_attempts,
                    "auto_repaired": outcome.auto_repaired,
                    "report": outcome.report,
                }))?
            );
            scheduler.shutdown();
            cron_store.persist(&cron_store_path).await.ok();
            Ok(())
        }
        Err(err) => {
            scheduler.shutdown();
            Err(anyhow::anyhow!(err.to_string()))
        }
    }
}
