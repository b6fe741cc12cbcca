//! The `WorkflowSpec`/`WorkflowStep` data model (file format).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::behavioral::BddSpecification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    LanguageModelCall,
    ExecutableTool,
    SubWorkflow,
    RegisteredTool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// `inputs.X` or `steps.Y.Z`.
    pub source_reference: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipPackage {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDependencies {
    #[serde(default)]
    pub required_tool_names: Vec<String>,
    #[serde(default)]
    pub pip_packages: Vec<PipPackage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_id: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default)]
    pub description: String,
    /// Name of a registered `Tool`, or (for `sub_workflow`) the name of a
    /// `Tool` whose invocation descriptor is `Workflow { .. }`.
    pub tool: String,
    #[serde(default)]
    pub prompt_template: Option<String>,
    /// `template_var -> "inputs.X" | "steps.Y.Z"`.
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,
    pub output_name: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_on_failure: bool,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub parallel_group: Option<i64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub generate_tool: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub workflow_id: String,
    pub version: semver::Version,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub portable: bool,
    #[serde(default)]
    pub inputs: Vec<InputDef>,
    #[serde(default)]
    pub outputs: Vec<OutputDef>,
    pub steps: Vec<WorkflowStep>,
    /// Embedded tool definitions, populated only when `portable`.
    #[serde(default)]
    pub tool_definitions: Vec<forgeflow_tools::Tool>,
    #[serde(default)]
    pub bdd_specification: Option<BddSpecification>,
    #[serde(default)]
    pub dependencies: WorkflowDependencies,
    /// Wall-clock budget for the whole run, start to completion (/// "on expiry, all remaining steps are cancelled and the workflow is
    /// marked failed with reason WorkflowTimeout"). `None` means unbounded.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl WorkflowSpec {
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let spec = WorkflowSpec {
            workflow_id: "wf-1".into(),
            version: semver::Version::new(1, 0, 0),
            description: "demo".into(),
            portable: false,
            inputs: vec![InputDef { name: "topic".into(), type_name: "string".into(), required: true, default: None, description: String::new() }],
            outputs: vec![OutputDef { name: "result".into(), type_name: "string".into(), source_reference: "steps.a.out".into(), description: String::new() }],
            steps: vec![WorkflowStep {
                step_id: "a".into(),
                kind: StepKind::RegisteredTool,
                description: String::new(),
                tool: "echo".into(),
                prompt_template: None,
                input_mapping: HashMap::new(),
                output_name: "out".into(),
                timeout_ms: 1000,
                retry_on_failure: false,
                max_retries: 0,
                parallel_group: None,
                depends_on: vec![],
                generate_tool: false,
            }],
            tool_definitions: vec![],
            bdd_specification: None,
            dependencies: WorkflowDependencies::default(),
            timeout_ms: None,
        };

        let json = serde_json::to_string(&spec).unwrap();
        let parsed: WorkflowSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.workflow_id, spec.workflow_id);
        assert_eq!(parsed.steps.len(), 1);
    }
}
