//! Role and backend enumerations ("enumerated role names and
//! enumerated backend names" in place of dynamic configuration objects).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A logical name for a model use. Resolved per request to a concrete
/// model_key by the Config Resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Overseer,
    Generator,
    Evaluator,
    Triage,
    Escalation,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Overseer => "overseer",
            Role::Generator => "generator",
            Role::Evaluator => "evaluator",
            Role::Triage => "triage",
            Role::Escalation => "escalation",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overseer" => Ok(Role::Overseer),
            "generator" => Ok(Role::Generator),
            "evaluator" => Ok(Role::Evaluator),
            "triage" => Ok(Role::Triage),
            "escalation" => Ok(Role::Escalation),
            other => Err(other.to_string()),
        }
    }
}

/// Backend a model_key routes to (Tool, §4.2 Backend Router).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Ollama,
    Anthropic,
    Openai,
    AzureOpenai,
    LmStudio,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Backend::Ollama => "ollama",
            Backend::Anthropic => "anthropic",
            Backend::Openai => "openai",
            Backend::AzureOpenai => "azure_openai",
            Backend::LmStudio => "lm_studio",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ollama" => Ok(Backend::Ollama),
            "anthropic" => Ok(Backend::Anthropic),
            "openai" => Ok(Backend::Openai),
            "azure_openai" => Ok(Backend::AzureOpenai),
            "lm_studio" => Ok(Backend::LmStudio),
            other => Err(other.to_string()),
        }
    }
}

/// Per-role model_key with a fallback chain (`fallback_tiers`):
/// the primary model_key to use for the role, and an ordered list of
/// progressively cheaper/more-available model_keys to fall back to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDefaults {
    pub role: Role,
    pub model_key: String,
    #[serde(default)]
    pub fallback_tiers: Vec<String>,
}
