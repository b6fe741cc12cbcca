//! Dependency graph construction over a `WorkflowSpec`'s steps: explicit
//! `depends_on` plus implicit references from `input_mapping` and
//! `prompt_template` placeholders, cycle detection, and
//! parallel-group independence checking.

use std::collections::{HashMap, HashSet};

use forgeflow_commons::template::placeholder_names;
use petgraph::algo::{has_path_connecting, is_cyclic_directed};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::reference::SourceReference;
use crate::spec::WorkflowSpec;

/// A DAG over step_ids: an edge `dependency -> dependent` means
/// `dependent` cannot start until `dependency` has completed.
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index_of: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph. Unknown references (pointing at a step_id that
    /// doesn't exist) are skipped here — that's a validation error caught
    /// separately by `validate` so this constructor never fails.
    pub fn build(spec: &WorkflowSpec) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        for step in &spec.steps {
            let idx = graph.add_node(step.step_id.clone());
            index_of.insert(step.step_id.clone(), idx);
        }

        for step in &spec.steps {
            let dependent = index_of[&step.step_id];
            let mut deps: HashSet<String> = step.depends_on.iter().cloned().collect();

            for reference in step.input_mapping.values() {
                if let Some(SourceReference::Step { step_id, .. }) = SourceReference::parse(reference) {
                    deps.insert(step_id);
                }
            }
            if let Some(template) = &step.prompt_template {
                for name in placeholder_names(template) {
                    if let Some(SourceReference::Step { step_id, .. }) = SourceReference::parse(&name) {
                        deps.insert(step_id);
                    }
                }
            }

            for dep in deps {
                if let Some(&dep_idx) = index_of.get(&dep) {
                    graph.add_edge(dep_idx, dependent, ());
                }
            }
        }

        Self { graph, index_of }
    }

    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.index_of.contains_key(step_id)
    }

    pub fn dependencies_of(&self, step_id: &str) -> Vec<String> {
        let Some(&idx) = self.index_of.get(step_id) else { return Vec::new() };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// Whether a reference chain connects `a` and `b` in either direction
    /// (parallel-group members must be mutually
    /// independent).
    pub fn connected(&self, a: &str, b: &str) -> bool {
        let (Some(&a_idx), Some(&b_idx)) = (self.index_of.get(a), self.index_of.get(b)) else { return false };
        has_path_connecting(&self.graph, a_idx, b_idx, None) || has_path_connecting(&self.graph, b_idx, a_idx, None)
    }

    /// Steps whose dependencies have all completed and that aren't
    /// already completed or in flight.
    pub fn ready_steps(&self, completed: &HashSet<String>, in_flight: &HashSet<String>) -> Vec<String> {
        self.index_of
            .keys()
            .filter(|step_id| !completed.contains(*step_id) && !in_flight.contains(*step_id))
            .filter(|step_id| self.dependencies_of(step_id).iter().all(|dep| completed.contains(dep)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{StepKind, WorkflowDependencies, WorkflowStep};
    use std::collections::HashMap as Map;

    fn step(id: &str, depends_on: Vec<&str>) -> WorkflowStep {
        WorkflowStep {
            step_id: id.into(),
            kind: StepKind::RegisteredTool,
            description: String::new(),
            tool: "noop".into(),
            prompt_template: None,
            input_mapping: Map::new(),
            output_name: "out".into(),
            timeout_ms: 1000,
            retry_on_failure: false,
            max_retries: 0,
            parallel_group: None,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            generate_tool: false,
        }
    }

    fn spec(steps: Vec<WorkflowStep>) -> WorkflowSpec {
        WorkflowSpec {
            workflow_id: "wf".into(),
            version: semver::Version::new(0, 1, 0),
            description: String::new(),
            portable: false,
            inputs: vec![],
            outputs: vec![],
            steps,
            tool_definitions: vec![],
            bdd_specification: None,
            dependencies: WorkflowDependencies::default(),
            timeout_ms: None,
        }
    }

    #[test]
    fn detects_cycle() {
        let graph = DependencyGraph::build(&spec(vec![step("a", vec!["b"]), step("b", vec!["a"])]));
        assert!(!graph.is_acyclic());
    }

    #[test]
    fn ready_steps_respect_dependencies() {
        let graph = DependencyGraph::build(&spec(vec![step("a", vec![]), step("b", vec!["a"])]));
        let completed = HashSet::new();
        let in_flight = HashSet::new();
        assert_eq!(graph.ready_steps(&completed, &in_flight), vec!["a".to_string()]);
    }

    #[test]
    fn connected_detects_transitive_chain() {
        let graph = DependencyGraph::build(&spec(vec![step("a", vec![]), step("b", vec!["a"]), step("c", vec!["b"])]));
        assert!(graph.connected("a", "c"));
        assert!(graph.connected("c", "a"));
    }

    #[test]
    fn implicit_reference_from_input_mapping_creates_edge() {
        let mut b = step("b", vec![]);
        b.input_mapping.insert("outline".to_string(), "steps.a.outline".to_string());
        let graph = DependencyGraph::build(&spec(vec![step("a", vec![]), b]));
        assert_eq!(graph.dependencies_of("b"), vec!["a".to_string()]);
    }
}
