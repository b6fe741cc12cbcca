use forgeflow_commons::{ErrorCategory, ErrorContext, ErrorEnvelope};

/// Workflow errors ("Workflow" family).
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("workflow exceeded its wall-clock timeout")]
    WorkflowTimeout,

    #[error("step '{step_id}' failed: {source}")]
    StepFailure { step_id: String, #[source] source: forgeflow_tools::ToolError },

    #[error("behavioral validation failed for scenario '{scenario}': {reason}")]
    BehavioralValidationFailure { scenario: String, reason: String },

    #[error("workflow was cancelled")]
    Cancelled,
}

impl WorkflowError {
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::Validation(_) => "ValidationError",
            WorkflowError::WorkflowTimeout => "WorkflowTimeout",
            WorkflowError::StepFailure { .. } => "StepFailure",
            WorkflowError::BehavioralValidationFailure { .. } => "BehavioralValidationFailure",
            WorkflowError::Cancelled => "WorkflowCancelled",
        }
    }
}

impl From<WorkflowError> for ErrorEnvelope {
    fn from(err: WorkflowError) -> Self {
        let code = err.code();
        ErrorEnvelope::new(code, ErrorCategory::Workflow, err.to_string()).with_context(ErrorContext::default())
    }
}
