//! The `Tool` record and its kind-tagged invocation descriptors.
//!
//! Dispatch is sealed on `ToolKind`/`InvocationDescriptor` rather than on
//! any runtime attribute presence: adding a new kind means adding a
//! variant and a match arm, not a new inheritance layer.

use std::collections::BTreeSet;

use forgeflow_commons::hashing::definition_hash_of;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    LanguageModel,
    Executable,
    Workflow,
    CustomCode,
    ExternalProtocolServer,
    ApiSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CostTier {
    Free,
    Low,
    Medium,
    High,
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeedTier {
    VeryFast,
    Fast,
    Medium,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Basic,
    Good,
    Excellent,
    Perfect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraints {
    pub timeout_ms: u64,
    pub max_memory_mb: u64,
    pub max_cpu_percent: u8,
}

impl Default for Constraints {
    fn default() -> Self {
        Self { timeout_ms: 30_000, max_memory_mb: 512, max_cpu_percent: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub cost_tier: CostTier,
    pub speed_tier: SpeedTier,
    pub quality_tier: QualityTier,
    /// 0..200, smaller is not more urgent here; this is a selection
    /// weight, unrelated to the scheduler's priority numbers.
    pub priority: u16,
    #[serde(default = "default_track_usage")]
    pub track_usage: bool,
}

fn default_track_usage() -> bool {
    true
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self {
            cost_tier: CostTier::Medium,
            speed_tier: SpeedTier::Medium,
            quality_tier: QualityTier::Good,
            priority: 100,
            track_usage: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationDescriptor {
    LanguageModel {
        model_key: String,
        #[serde(default)]
        system_prompt: Option<String>,
        #[serde(default)]
        prompt_template: Option<String>,
        #[serde(default = "default_temperature")]
        temperature: f32,
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
    },
    Executable {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        stdin_mode: StdinMode,
    },
    Workflow {
        workflow_ref: String,
    },
    CustomCode {
        module: String,
        class: String,
        #[serde(default)]
        config: serde_json::Value,
    },
    ExternalProtocolServer {
        server_name: String,
        remote_tool_name: String,
    },
    ApiSpec {
        spec_path: String,
        #[serde(default)]
        base_url_override: Option<String>,
        #[serde(default)]
        auth_config: Option<serde_json::Value>,
    },
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StdinMode {
    #[default]
    Json,
    Raw,
    None,
}

impl InvocationDescriptor {
    pub fn kind(&self) -> ToolKind {
        match self {
            InvocationDescriptor::LanguageModel { .. } => ToolKind::LanguageModel,
            InvocationDescriptor::Executable { .. } => ToolKind::Executable,
            InvocationDescriptor::Workflow { .. } => ToolKind::Workflow,
            InvocationDescriptor::CustomCode { .. } => ToolKind::CustomCode,
            InvocationDescriptor::ExternalProtocolServer { .. } => ToolKind::ExternalProtocolServer,
            InvocationDescriptor::ApiSpec { .. } => ToolKind::ApiSpec,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub tool_id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub output_schema: serde_json::Value,
    pub invocation: InvocationDescriptor,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub metadata: ToolMetadata,
    pub definition_hash: String,
    pub version: semver::Version,
}

impl Tool {
    /// Build a tool, computing its `definition_hash` over the behavior-
    /// affecting fields (everything but `tool_id`/`version`, which are
    /// identity, not content).
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        invocation: InvocationDescriptor,
        tags: BTreeSet<String>,
        input_schema: serde_json::Value,
        output_schema: serde_json::Value,
        constraints: Constraints,
        metadata: ToolMetadata,
    ) -> Self {
        let name = name.into();
        let description = description.into();
        let hash_input = serde_json::json!({
            "name": name,
            "description": description,
            "invocation": invocation,
            "tags": tags,
            "input_schema": input_schema,
            "output_schema": output_schema,
            "constraints": constraints,
        });
        Self {
            tool_id: uuid::Uuid::new_v4().to_string(),
            name,
            description,
            tags,
            input_schema,
            output_schema,
            invocation,
            constraints,
            metadata,
            definition_hash: definition_hash_of(&hash_input),
            version: semver::Version::new(0, 1, 0),
        }
    }

    pub fn kind(&self) -> ToolKind {
        self.invocation.kind
    }

    /// Recompute the content hash and bump `version` if behavior-affecting
    /// fields changed (Tool invariant).
    pub fn refresh_hash_and_version(&mut self) {
        let hash_input = serde_json::json!({
            "name": self.name,
            "description": self.description,
            "invocation": self.invocation,
            "tags": self.tags,
            "input_schema": self.input_schema,
            "output_schema": self.output_schema,
            "constraints": self.constraints,
        });
        let new_hash = definition_hash_of(&hash_input);
        if new_hash != self.definition_hash {
            self.version.patch += 1;
            self.definition_hash = new_hash;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_bumps_only_when_hash_changes() {
        let mut tool = Tool::new(
            "echo",
            "echoes input",
            InvocationDescriptor::Executable { command: "echo".into(), args: vec![], stdin_mode: StdinMode::Json },
            BTreeSet::new(),
            serde_json::json!({}),
            serde_json::json!({}),
            Constraints::default(),
            ToolMetadata::default(),
        );
        let original_version = tool.version.clone();
        tool.refresh_hash_and_version();
        assert_eq!(tool.version, original_version);

        tool.description = "echoes input back, verbatim".into();
        tool.refresh_hash_and_version();
        assert_eq!(tool.version.patch, original_version.patch + 1);
    }
}
