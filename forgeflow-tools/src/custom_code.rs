//! `custom_code` dispatch: a module+class reference resolves to a
//! registered handler rather than runtime reflection (design
//! note: "per-kind behavior lives in pure functions").

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::ToolError;

#[async_trait]
pub trait CustomCodeHandler: Send + Sync {
    async fn call(&self, config: &serde_json::Value, args: &serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

#[derive(Default)]
pub struct CustomCodeRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CustomCodeHandler>>>,
}

impl CustomCodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, module: &str, class: &str, handler: Arc<dyn CustomCodeHandler>) {
        self.handlers.write().insert(format!("{module}.{class}"), handler);
    }

    pub async fn call(
        &self,
        module: &str,
        class: &str,
        config: &serde_json::Value,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let key = format!("{module}.{class}");
        let handler = self
            .handlers
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| ToolError::ToolNotFound(key.clone()))?;
        handler.call(config, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl CustomCodeHandler for Echo {
        async fn call(&self, _config: &serde_json::Value, args: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
            Ok(args.clone())
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let registry = CustomCodeRegistry::new();
        registry.register("demo", "Echo", Arc::new(Echo));
        let result = registry.call("demo", "Echo", &serde_json::json!({}), &serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn unregistered_handler_is_tool_not_found() {
        let registry = CustomCodeRegistry::new();
        let err = registry.call("demo", "Missing", &serde_json::json!({}), &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::ToolNotFound(_)));
    }
}
