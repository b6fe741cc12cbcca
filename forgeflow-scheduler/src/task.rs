//! Priority levels, the submitted-task shape, and the registry of
//! callables a task name resolves to.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Smaller is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 0,
    High = 10,
    Normal = 50,
    Low = 90,
    Background = 100,
}

impl Priority {
    pub const ALL: [Priority; 5] = [Priority::Critical, Priority::High, Priority::Normal, Priority::Low, Priority::Background];
}

/// A callable a scheduled task dispatches to, resolved by name at submit
/// time (mirrors the registered-by-name indirection `forgeflow-tools`
/// uses for custom code, so the scheduler never holds a raw closure it
/// can't also persist/describe).
#[async_trait]
pub trait ScheduledCallable: Send + Sync {
    async fn call(&self, payload: serde_json::Value) -> Result<serde_json::Value, SchedulerError>;
}

#[derive(Default)]
pub struct CallableRegistry {
    callables: RwLock<HashMap<String, Arc<dyn ScheduledCallable>>>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, callable: Arc<dyn ScheduledCallable>) {
        self.callables.write().insert(name.into(), callable);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ScheduledCallable>, SchedulerError> {
        self.callables.read().get(name).cloned().ok_or_else(|| SchedulerError::CallableNotFound(name.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub priority: Priority,
    pub callable_reference: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub workflow_id: Option<String>,
}

impl Task {
    pub fn new(priority: Priority, callable_reference: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { task_id: uuid::Uuid::new_v4().to_string(), priority, callable_reference: callable_reference.into(), payload, workflow_id: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub succeeded: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_smaller_is_more_urgent() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert!(Priority::Low < Priority::Background);
    }

    struct Echo;
    #[async_trait]
    impl ScheduledCallable for Echo {
        async fn call(&self, payload: serde_json::Value) -> Result<serde_json::Value, SchedulerError> {
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn registry_resolves_registered_callables() {
        let registry = CallableRegistry::new();
        registry.register("echo", Arc::new(Echo));
        let callable = registry.resolve("echo").unwrap();
        let result = callable.call(serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
        assert!(matches!(registry.resolve("missing"), Err(SchedulerError::CallableNotFound(_))));
    }
}
