use forgeflow_commons::{ErrorCategory, ErrorContext, ErrorEnvelope};

/// Routing errors ("Routing" family).
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no backend metadata for model_key '{0}'")]
    UnroutableModel(String),

    #[error("backend '{backend}' unavailable: {message}")]
    BackendUnavailable { backend: String, message: String },

    #[error("cumulative budget exceeded for role '{role}': spent {spent}, budget {budget}")]
    BudgetExceeded { role: String, spent: f64, budget: f64 },

    #[error(transparent)]
    Config(#[from] forgeflow_config::ConfigError),
}

impl RoutingError {
    pub fn code(&self) -> &'static str {
        match self {
            RoutingError::UnroutableModel(_) => "UnroutableModel",
            RoutingError::BackendUnavailable { .. } => "BackendUnavailable",
            RoutingError::BudgetExceeded { .. } => "BudgetExceeded",
            RoutingError::Config(_) => "ConfigError",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            RoutingError::UnroutableModel(_) => ErrorCategory::Routing,
            RoutingError::BackendUnavailable { .. } => ErrorCategory::ServiceUnavailable,
            RoutingError::BudgetExceeded { .. } => ErrorCategory::BudgetExceeded,
            RoutingError::Config(_) => ErrorCategory::Configuration,
        }
    }
}

impl From<RoutingError> for ErrorEnvelope {
    fn from(err: RoutingError) -> Self {
        let code = err.code();
        let category = err.category();
        ErrorEnvelope::new(code, category, err.to_string()).with_context(ErrorContext::default())
    }
}
