use forgeflow_commons::{ErrorCategory, ErrorContext, ErrorEnvelope};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("a tool named '{0}' already exists")]
    DuplicateToolId(String),

    #[error("external protocol server unavailable: {0}")]
    ExternalServerUnavailable(String),

    #[error("unknown tool kind: {0}")]
    UnknownToolKind(String),

    #[error("invocation of '{tool}' timed out after {timeout_ms}ms")]
    InvocationTimeout { tool: String, timeout_ms: u64 },

    #[error("invocation of '{tool}' failed (exit {exit_code}): {stderr}")]
    InvocationFailed { tool: String, exit_code: i32, stderr: String },

    #[error("subprocess for '{tool}' exceeded resource limits: {detail}")]
    SubprocessResourceExceeded { tool: String, detail: String },

    #[error("artifact memory operation failed: {0}")]
    Memory(#[from] forgeflow_memory::MemoryError),

    #[error("backend routing operation failed: {0}")]
    Routing(#[from] forgeflow_llm::RoutingError),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::ToolNotFound(_) => "ToolNotFound",
            ToolError::DuplicateToolId(_) => "DuplicateToolId",
            ToolError::ExternalServerUnavailable(_) => "ExternalServerUnavailable",
            ToolError::UnknownToolKind(_) => "UnknownToolKind",
            ToolError::InvocationTimeout { .. } => "InvocationTimeout",
            ToolError::InvocationFailed { .. } => "InvocationFailed",
            ToolError::SubprocessResourceExceeded { .. } => "SubprocessResourceExceeded",
            ToolError::Memory(_) => "MemoryDependencyFailed",
            ToolError::Routing(_) => "RoutingDependencyFailed",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ToolError::ToolNotFound(_)
            | ToolError::DuplicateToolId(_)
            | ToolError::ExternalServerUnavailable(_)
            | ToolError::UnknownToolKind(_) => ErrorCategory::Registry,
            ToolError::InvocationTimeout { .. }
            | ToolError::InvocationFailed { .. }
            | ToolError::SubprocessResourceExceeded { .. } => ErrorCategory::Invocation,
            ToolError::Memory(_) => ErrorCategory::Memory,
            ToolError::Routing(_) => ErrorCategory::Routing,
        }
    }
}

impl From<ToolError> for ErrorEnvelope {
    fn from(err: ToolError) -> Self {
        let code = err.code();
        let category = err.category();
        ErrorEnvelope::new(code, category, err.to_string()).with_context(ErrorContext::default())
    }
}
