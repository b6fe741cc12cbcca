//! Canonical error categorization and the externally-visible error envelope.
//!
//! Every crate's `thiserror` error enum maps into one `ErrorCategory` so
//! callers get a consistent retry decision, and every error that crosses a
//! component boundary is wrapped in an `ErrorEnvelope` carrying the taxonomy
//! code from plus optional workflow/step/tool/request context.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical error category used for retry/escalation decisions across
/// forgeflow. Retryable categories are safe to hand to a backoff loop;
/// non-retryable categories should surface to the caller immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    // Retryable (transient)
    Network,
    Timeout,
    RateLimit,
    ServiceUnavailable,
    BudgetExceeded,
    // Non-retryable (permanent)
    Configuration,
    Routing,
    Registry,
    Invocation,
    Workflow,
    Memory,
    Scheduler,
}

impl ErrorCategory {
    /// Retryable categories are the ones an exponential-backoff retry loop
    /// (`retry_on_failure`) should act on; everything else is a
    /// permanent failure that should fail fast.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::RateLimit
                | ErrorCategory::ServiceUnavailable
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::ServiceUnavailable => "service_unavailable",
            ErrorCategory::BudgetExceeded => "budget_exceeded",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Routing => "routing",
            ErrorCategory::Registry => "registry",
            ErrorCategory::Invocation => "invocation",
            ErrorCategory::Workflow => "workflow",
            ErrorCategory::Memory => "memory",
            ErrorCategory::Scheduler => "scheduler",
        };
        write!(f, "{s}")
    }
}

/// Context attached to an error as it crosses a component boundary
/// ("every externally-emitted error carries a code, message, and
/// optional context (workflow_id, step_id, tool_id, request_id)").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    pub workflow_id: Option<String>,
    pub step_id: Option<String>,
    pub tool_id: Option<String>,
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_tool(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// The externally-visible error shape: a stable `code`, a human message,
/// and optional context. Every crate's leaf error type implements
/// `Into<ErrorEnvelope>` so callers at the orchestrator boundary can emit
/// a uniform payload regardless of which component raised it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default)]
    pub context: ErrorContext,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            category,
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorEnvelope {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_categories() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::RateLimit.is_retryable());
        assert!(!ErrorCategory::Configuration.is_retryable());
        assert!(!ErrorCategory::Workflow.is_retryable());
    }

    #[test]
    fn envelope_carries_context() {
        let envelope = ErrorEnvelope::new("ToolNotFound", ErrorCategory::Registry, "no such tool")
            .with_context(ErrorContext::default().with_workflow("wf-1").with_step("s1"));
        assert_eq!(envelope.context.workflow_id.as_deref(), Some("wf-1"));
        assert_eq!(envelope.to_string(), "[ToolNotFound] no such tool");
    }
}
