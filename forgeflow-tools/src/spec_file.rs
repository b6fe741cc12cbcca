//! Parsing for tool specification files: one YAML document per
//! tool, kind-specific blocks selected by `type`.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::error::ToolError;
use crate::tool::{Constraints, CostTier, InvocationDescriptor, QualityTier, SpeedTier, StdinMode, Tool, ToolMetadata};

#[derive(Debug, Deserialize)]
struct RawConstraints {
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_memory_mb")]
    max_memory_mb: u64,
    #[serde(default = "default_cpu_percent")]
    max_cpu_percent: u8,
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_memory_mb() -> u64 {
    512
}
fn default_cpu_percent() -> u8 {
    100
}

impl Default for RawConstraints {
    fn default() -> Self {
        Self { timeout_ms: default_timeout_ms, max_memory_mb: default_memory_mb, max_cpu_percent: default_cpu_percent() }
    }
}

#[derive(Debug, Deserialize)]
struct RawExecutableBlock {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    stdin_mode: StdinMode,
}

#[derive(Debug, Deserialize)]
struct RawLlmBlock {
    model_key: String,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    prompt_template: Option<String>,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}

#[derive(Debug, Deserialize)]
struct RawCustomBlock {
    module: String,
    class: String,
    #[serde(default)]
    config: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawOpenapiBlock {
    spec_path: String,
    #[serde(default)]
    base_url_override: Option<String>,
    #[serde(default)]
    auth_config: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawToolSpec {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    description: String,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    input_schema: serde_json::Value,
    #[serde(default)]
    output_schema: serde_json::Value,
    #[serde(default)]
    constraints: RawConstraints,
    #[serde(default = "default_cost_tier")]
    cost_tier: CostTier,
    #[serde(default = "default_speed_tier")]
    speed_tier: SpeedTier,
    #[serde(default = "default_quality_tier")]
    quality_tier: QualityTier,
    #[serde(default = "default_priority")]
    priority: u16,
    #[serde(default = "default_track_usage")]
    track_usage: bool,
    #[serde(default)]
    executable: Option<RawExecutableBlock>,
    #[serde(default)]
    llm: Option<RawLlmBlock>,
    #[serde(default)]
    custom: Option<RawCustomBlock>,
    #[serde(default)]
    openapi: Option<RawOpenapiBlock>,
}

fn default_cost_tier() -> CostTier {
    CostTier::Medium
}
fn default_speed_tier() -> SpeedTier {
    SpeedTier::Medium
}
fn default_quality_tier() -> QualityTier {
    QualityTier::Good
}
fn default_priority() -> u16 {
    100
}
fn default_track_usage() -> bool {
    true
}

/// Parse one tool-spec YAML document into a `Tool`.
pub fn parse_tool_spec(yaml: &str) -> Result<Tool, ToolError> {
    let raw: RawToolSpec =
        serde_yaml::from_str(yaml).map_err(|e| ToolError::UnknownToolKind(format!("malformed tool spec: {e}")))?;

    let invocation = match raw.kind.as_str() {
        "language_model" => {
            let block = raw.llm.ok_or_else(|| ToolError::UnknownToolKind("language_model tool missing 'llm' block".into()))?;
            InvocationDescriptor::LanguageModel {
                model_key: block.model_key,
                system_prompt: block.system_prompt,
                prompt_template: block.prompt_template,
                temperature: block.temperature,
                max_tokens: block.max_tokens,
            }
        }
        "executable" => {
            let block = raw.executable.ok_or_else(|| ToolError::UnknownToolKind("executable tool missing 'executable' block".into()))?;
            InvocationDescriptor::Executable { command: block.command, args: block.args, stdin_mode: block.stdin_mode }
        }
        "workflow" => InvocationDescriptor::Workflow { workflow_ref: raw.name.clone() },
        "custom_code" => {
            let block = raw.custom.ok_or_else(|| ToolError::UnknownToolKind("custom_code tool missing 'custom' block".into()))?;
            InvocationDescriptor::CustomCode { module: block.module, class: block.class, config: block.config }
        }
        "api_spec" => {
            let block = raw.openapi.ok_or_else(|| ToolError::UnknownToolKind("api_spec tool missing 'openapi' block".into()))?;
            InvocationDescriptor::ApiSpec { spec_path: block.spec_path, base_url_override: block.base_url_override, auth_config: block.auth_config }
        }
        "external_protocol_server" => {
            return Err(ToolError::UnknownToolKind(
                "external_protocol_server tools come from server discovery, not spec files".into(),
            ));
        }
        other => return Err(ToolError::UnknownToolKind(other.to_string())),
    };

    let metadata = ToolMetadata {
        cost_tier: raw.cost_tier,
        speed_tier: raw.speed_tier,
        quality_tier: raw.quality_tier,
        priority: raw.priority,
        track_usage: raw.track_usage,
    };
    let constraints = Constraints {
        timeout_ms: raw.constraints.timeout_ms,
        max_memory_mb: raw.constraints.max_memory_mb,
        max_cpu_percent: raw.constraints.max_cpu_percent,
    };

    Ok(Tool::new(raw.name, raw.description, invocation, raw.tags, raw.input_schema, raw.output_schema, constraints, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_executable_tool_spec() {
        let yaml = r#"
name: grep-files
type: executable
description: search files for a pattern
tags: [search, files]
cost_tier: free
speed_tier: fast
quality_tier: good
priority: 50
executable:
  command: grep
  args: ["-r"]
  stdin_mode: json
"#;
        let tool = parse_tool_spec(yaml).unwrap();
        assert_eq!(tool.name, "grep-files");
        assert!(matches!(tool.invocation, InvocationDescriptor::Executable { .. }));
    }

    #[test]
    fn rejects_language_model_tool_missing_llm_block() {
        let yaml = "name: bad\ntype: language_model\ndescription: oops\n";
        assert!(parse_tool_spec(yaml).is_err());
    }
}
