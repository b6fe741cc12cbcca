use forgeflow_commons::{ErrorCategory, ErrorContext, ErrorEnvelope};

/// Memory errors ("Memory" family).
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("vector backend unreachable, degrading to tag/rule-based retrieval: {0}")]
    StorageUnavailable(String),

    #[error("embedding model mismatch: record embedded with '{recorded}', current model is '{current}'")]
    EmbeddingModelMismatch { recorded: String, current: String },

    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("edge {child} -> {parent} would create a lineage cycle")]
    LineageCycle { child: String, parent: String },
}

impl MemoryError {
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::StorageUnavailable(_) => "StorageUnavailable",
            MemoryError::EmbeddingModelMismatch { .. } => "EmbeddingModelMismatch",
            MemoryError::NotFound(_) => "ArtifactNotFound",
            MemoryError::ClusterNotFound(_) => "ClusterNotFound",
            MemoryError::LineageCycle { .. } => "LineageCycle",
        }
    }
}

impl From<MemoryError> for ErrorEnvelope {
    fn from(err: MemoryError) -> Self {
        let code = err.code();
        ErrorEnvelope::new(code, ErrorCategory::Memory, err.to_string())
            .with_context(ErrorContext::default())
    }
}
