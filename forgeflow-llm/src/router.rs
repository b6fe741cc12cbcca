//! C2 Backend Router.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use forgeflow_config::{Backend, ConfigResolver, Role};

use crate::error::RoutingError;
use crate::types::GenerateOptions;

/// A client able to generate text for a model hosted by one backend.
/// Concrete implementations (ollama/anthropic/openai/azure_openai/
/// lm_studio HTTP clients) live outside this crate Non-goal
/// "the language-model servers themselves"; `BackendRouter` only needs the
/// trait object.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn generate(
        &self,
        model_name: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, RoutingError>;
}

/// Dispatches a text-generation request to the correct model backend
/// using the model_key's metadata; never infers backend from model name.
pub struct BackendRouter {
    resolver: Arc<ConfigResolver>,
    clients: HashMap<Backend, Arc<dyn BackendClient>>,
    /// Cumulative spend per role, reset externally between budget windows.
    spent_by_role: Mutex<HashMap<String, f64>>,
}

impl BackendRouter {
    pub fn new(resolver: Arc<ConfigResolver>) -> Self {
        Self {
            resolver,
            clients: HashMap::new(),
            spent_by_role: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_backend(&mut self, backend: Backend, client: Arc<dyn BackendClient>) {
        self.clients.insert(backend, client);
    }

    /// Core operation: route a single model_key to its backend and
    /// generate (single operation `generate`).
    pub async fn generate(
        &self,
        model_name: &str,
        model_key: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, RoutingError> {
        let backend = self
            .resolver
            .backend_of(model_key)
            .map_err(|_| RoutingError::UnroutableModel(model_key.to_string()))?;
        let client = self.clients.get(&backend).ok_or_else(|| {
            RoutingError::BackendUnavailable {
                backend: backend.to_string(),
                message: "no client registered for this backend".to_string(),
            }
        })?;

        let mut attempt = 0u32;
        loop {
            match tokio::time::timeout(
                Duration::from_secs(options.timeout_seconds),
                client.generate(model_name, prompt, options),
            )
            .await
            {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(err)) if attempt < options.retry.max_retries => {
                    tracing::warn!(backend = %backend, attempt, error = %err, "generate attempt failed, retrying");
                    tokio::time::sleep(Duration::from_millis(
                        options.retry.initial_backoff_ms * 2u64.pow(attempt),
                    ))
                    .await;
                    attempt += 1;
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(RoutingError::BackendUnavailable {
                        backend: backend.to_string(),
                        message: format!("timed out after {}s", options.timeout_seconds),
                    });
                }
            }
        }
    }

    /// Resolve `role` to its primary model_key and generate, walking the
    /// role's configured `fallback_tiers` on failure ("On
    /// failure of a tier, the router walks fallback_tiers ... in order")
    /// and enforcing a per-role cumulative budget if `options.budget` is
    /// set ("On budget exhaustion, fails with BudgetExceeded").
    pub async fn generate_for_role(
        &self,
        role: Role,
        level: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, RoutingError> {
        let primary = self.resolver.resolve_model(role, level)?;
        let mut tiers = vec![primary];
        tiers.extend(self.resolver.fallback_tiers(role));

        let mut last_err = None;
        for model_key in tiers {
            if let Some(budget) = options.budget {
                let spent = *self
                    .spent_by_role
                    .lock()
                    .entry(role.to_string())
                    .or_insert(0.0);
                if spent >= budget {
                    return Err(RoutingError::BudgetExceeded {
                        role: role.to_string(),
                        spent,
                        budget,
                    });
                }
            }
            let meta = match self.resolver.model_key_metadata(&model_key) {
                Ok(meta) => meta,
                Err(err) => {
                    last_err = Some(RoutingError::Config(err));
                    continue;
                }
            };
            let model_name = meta.model_name.clone();
            match self.generate(&model_name, &model_key, prompt, options).await {
                Ok(text) => {
                    if let Some(budget) = options.budget {
                        *self
                            .spent_by_role
                            .lock()
                            .entry(role.to_string())
                            .or_insert(0.0) += estimate_cost(&text);
                        let _ = budget;
                    }
                    return Ok(text);
                }
                Err(err) => {
                    tracing::warn!(role = %role, model_key = %model_key, error = %err, "tier failed, walking fallback chain");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| RoutingError::UnroutableModel(role.to_string())))
    }
}

/// Placeholder cost model: proportional to response length. A real
/// deployment would use the backend's reported token usage; this crate
/// has no network access to a live billing API, so a deterministic proxy
/// keeps the budget-exhaustion path exercisable in tests.
fn estimate_cost(text: &str) -> f64 {
    text.len() as f64 * 0.0001
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeflow_config::{ConfigLayerEntry, ConfigLayerSource, ConfigLayerStack};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl BackendClient for FlakyClient {
        async fn generate(
            &self,
            _model_name: &str,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<String, RoutingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(RoutingError::BackendUnavailable {
                    backend: "anthropic".to_string(),
                    message: "simulated outage".to_string(),
                })
            } else {
                Ok("ok".to_string())
            }
        }
    }

    fn resolver() -> Arc<ConfigResolver> {
        let mut stack = ConfigLayerStack::default();
        stack.push(ConfigLayerEntry::new(
            ConfigLayerSource::Workspace { file: "forgeflow.toml".into() },
            toml::from_str(
                r#"
                [roles.overseer]
                model_key = "big"
                fallback_tiers = ["small"]

                [model_keys.big]
                model_name = "claude-opus"
                backend = "anthropic"

                [model_keys.small]
                model_name = "claude-haiku"
                backend = "anthropic"
                "#,
            )
            .unwrap(),
        ));
        Arc::new(ConfigResolver::from_layers(&stack, |_| None).unwrap())
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let mut router = BackendRouter::new(resolver());
        router.register_backend(
            Backend::Anthropic,
            Arc::new(FlakyClient {
                failures_before_success: 1,
                calls: AtomicU32::new(0),
            }),
        );
        let result = router
            .generate("claude-opus", "big", "hello", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(result, "ok");
    }

    #[tokio::test]
    async fn unroutable_model_key_errors() {
        let router = BackendRouter::new(resolver());
        let err = router
            .generate("x", "missing-key", "hello", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::UnroutableModel(_)));
    }
}
