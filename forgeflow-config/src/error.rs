use forgeflow_commons::{ErrorCategory, ErrorContext, ErrorEnvelope};

/// Configuration errors ("Configuration" family).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("unknown model key: {0}")]
    UnknownModelKey(String),

    #[error("model key '{0}' has no backend mapping")]
    MissingBackend(String),

    #[error("invalid trusted package allowlist: {0}")]
    InvalidAllowlist(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::UnknownRole(_) => "UnknownRole",
            ConfigError::UnknownModelKey(_) => "UnknownModelKey",
            ConfigError::MissingBackend(_) => "MissingBackend",
            ConfigError::InvalidAllowlist(_) => "InvalidAllowlist",
            ConfigError::Io { .. } => "ConfigIoError",
            ConfigError::Parse { .. } => "ConfigParseError",
        }
    }
}

impl From<ConfigError> for ErrorEnvelope {
    fn from(err: ConfigError) -> Self {
        let code = err.code();
        ErrorEnvelope::new(code, ErrorCategory::Configuration, err.to_string())
            .with_context(ErrorContext::default())
    }
}
