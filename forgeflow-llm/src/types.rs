use serde::{Deserialize, Serialize};

/// Generation options carried through the Backend Router (/// "temperature, max_tokens, top_p, timeout_seconds, retry policy,
/// fallback chain").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-role cumulative budget limit in abstract cost units, if any
    /// ("if a cumulative budget is declared and exceeded...").
    #[serde(default)]
    pub budget: Option<f64>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature,
            max_tokens: default_max_tokens,
            top_p: default_top_p,
            timeout_seconds: default_timeout_seconds,
            retry: RetryPolicy::default(),
            budget: None,
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_top_p() -> f32 {
    1.0
}
fn default_timeout_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries,
            initial_backoff_ms: default_backoff_ms,
        }
    }
}

fn default_max_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    250
}
