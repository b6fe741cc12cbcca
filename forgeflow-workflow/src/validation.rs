//! Pre-execution validation: the six invariants checked
//! before a `WorkflowSpec` is handed to the executor.

use std::collections::{HashMap, HashSet};

use forgeflow_config::TrustedPackageAllowlist;

use crate::error::WorkflowError;
use crate::graph::DependencyGraph;
use crate::reference::SourceReference;
use crate::spec::WorkflowSpec;

/// Run all six validation checks. Returns the built dependency graph so
/// callers (the executor) don't have to rebuild it.
pub fn validate(spec: &WorkflowSpec, allowlist: Option<&TrustedPackageAllowlist>) -> Result<DependencyGraph, WorkflowError> {
    unique_step_ids?;
    unique_output_names?;
    let graph = DependencyGraph::build();
    references_resolve(spec, &graph)?;
    if !graph.is_acyclic() {
        return Err(WorkflowError::Validation("dependency graph contains a cycle".to_string()));
    }
    parallel_groups_independent(spec, &graph)?;
    inputs_satisfiable?;
    if let Some(allowlist) = allowlist {
        trusted_packages(spec, allowlist)?;
    }
    Ok(graph)
}

fn unique_step_ids(spec: &WorkflowSpec) -> Result<(), WorkflowError> {
    let mut seen = HashSet::new();
    for step in &spec.steps {
        if !seen.insert(step.step_id.clone()) {
            return Err(WorkflowError::Validation(format!("duplicate step_id '{}'", step.step_id)));
        }
    }
    Ok(())
}

fn unique_output_names(spec: &WorkflowSpec) -> Result<(), WorkflowError> {
    let mut seen = HashSet::new();
    for step in &spec.steps {
        if !seen.insert(step.output_name.clone()) {
            return Err(WorkflowError::Validation(format!("duplicate output_name '{}'", step.output_name)));
        }
    }
    Ok(())
}

/// Invariant (ii): every `input_mapping` reference resolves to either a
/// declared input name or a step_id present in the workflow. (Whether that
/// step_id has actually completed by the time it's read is an execution-
/// time concern, not a validation-time one.)
fn references_resolve(spec: &WorkflowSpec, graph: &DependencyGraph) -> Result<(), WorkflowError> {
    let input_names: HashSet<&str> = spec.inputs.iter().map(|i| i.name.as_str()).collect();

    let check = |reference: &str| -> Result<(), WorkflowError> {
        match SourceReference::parse(reference) {
            Some(SourceReference::Input { name }) if input_names.contains(name.as_str()) => Ok(()),
            Some(SourceReference::Step { step_id, .. }) if graph.contains(&step_id) => Ok(()),
            _ => Err(WorkflowError::Validation(format!("dangling reference '{reference}'"))),
        }
    };

    for step in &spec.steps {
        for reference in step.input_mapping.values() {
            check(reference)?;
        }
        for dep in &step.depends_on {
            if !graph.contains(dep) {
                return Err(WorkflowError::Validation(format!("step '{}' depends_on unknown step '{dep}'", step.step_id)));
            }
        }
    }
    for output in &spec.outputs {
        check(&output.source_reference)?;
    }
    Ok(())
}

/// Invariant (iv): two steps sharing a `parallel_group` must have no
/// reference chain between them.
fn parallel_groups_independent(spec: &WorkflowSpec, graph: &DependencyGraph) -> Result<(), WorkflowError> {
    let mut groups: HashMap<i64, Vec<&str>> = HashMap::new();
    for step in &spec.steps {
        if let Some(group) = step.parallel_group {
            groups.entry(group).or_default.push(&step.step_id);
        }
    }
    for (group, members) in groups {
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                if graph.connected(members[i], members[j]) {
                    return Err(WorkflowError::Validation(format!(
                        "steps '{}' and '{}' share parallel_group {group} but reference each other",
                        members[i], members[j]
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Invariant (v): each declared input is either required-and-provided-
/// later (checked at run time against the caller's inputs map) or has a
/// default. Validation here only checks the static shape: a required
/// input with no default is fine, it just means the caller must supply
/// it; the only static defect is a non-required input with no default
/// and no declared default type, which is harmless — so this check only
/// flags inputs that are simultaneously not required and carry no type.
fn inputs_satisfiable(spec: &WorkflowSpec) -> Result<(), WorkflowError> {
    for input in &spec.inputs {
        if input.type_name.trim().is_empty() {
            return Err(WorkflowError::Validation(format!("input '{}' has no declared type", input.name)));
        }
    }
    Ok(())
}

/// Invariant (vi): every `pip_packages` entry appears in the trusted
/// allowlist.
fn trusted_packages(spec: &WorkflowSpec, allowlist: &TrustedPackageAllowlist) -> Result<(), WorkflowError> {
    for package in &spec.dependencies.pip_packages {
        if !allowlist.permits(&package.name, &package.version) {
            return Err(WorkflowError::Validation(format!(
                "package '{}@{}' is not in the trusted allowlist",
                package.name, package.version
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{InputDef, StepKind, WorkflowDependencies, WorkflowStep};
    use std::collections::HashMap as Map;

    fn minimal_step(id: &str) -> WorkflowStep {
        WorkflowStep {
            step_id: id.into(),
            kind: StepKind::RegisteredTool,
            description: String::new(),
            tool: "noop".into(),
            prompt_template: None,
            input_mapping: Map::new(),
            output_name: format!("{id}_out"),
            timeout_ms: 1000,
            retry_on_failure: false,
            max_retries: 0,
            parallel_group: None,
            depends_on: vec![],
            generate_tool: false,
        }
    }

    fn minimal_spec() -> WorkflowSpec {
        WorkflowSpec {
            workflow_id: "wf".into(),
            version: semver::Version::new(0, 1, 0),
            description: String::new(),
            portable: false,
            inputs: vec![],
            outputs: vec![],
            steps: vec![minimal_step("a")],
            tool_definitions: vec![],
            bdd_specification: None,
            dependencies: WorkflowDependencies::default(),
            timeout_ms: None,
        }
    }

    #[test]
    fn accepts_a_minimal_valid_spec() {
        assert!(validate(&minimal_spec, None).is_ok());
    }

    #[test]
    fn rejects_duplicate_step_ids() {
        let mut spec = minimal_spec;
        spec.steps.push(minimal_step("a"));
        assert!(validate(&spec, None).is_err());
    }

    #[test]
    fn rejects_dangling_reference() {
        let mut spec = minimal_spec;
        spec.steps[0].input_mapping.insert("x".to_string(), "steps.missing.field".to_string());
        assert!(validate(&spec, None).is_err());
    }

    #[test]
    fn rejects_parallel_group_with_dependency_between_members() {
        let mut a = minimal_step("a");
        a.parallel_group = Some(1);
        let mut b = minimal_step("b");
        b.parallel_group = Some(1);
        b.depends_on = vec!["a".to_string()];
        let mut spec = minimal_spec;
        spec.steps = vec![a, b];
        assert!(validate(&spec, None).is_err());
    }

    #[test]
    fn rejects_input_with_no_type() {
        let mut spec = minimal_spec;
        spec.inputs.push(InputDef { name: "x".into(), type_name: String::new(), required: false, default: None, description: String::new() });
        assert!(validate(&spec, None).is_err());
    }

    #[test]
    fn rejects_untrusted_package() {
        let mut spec = minimal_spec;
        spec.dependencies.pip_packages.push(crate::spec::PipPackage { name: "evil".into(), version: "1.0.0".into() });
        let allowlist = TrustedPackageAllowlist::default();
        assert!(validate(&spec, Some(&allowlist)).is_err());
    }
}
