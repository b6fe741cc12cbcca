//! C7 Workflow Spec and C8 Workflow Executor: declarative step
//! graphs over registered tools, dependency/parallelism semantics, and
//! optional behavioral validation.

pub mod behavioral;
pub mod error;
pub mod executor;
pub mod graph;
pub mod reference;
pub mod spec;
pub mod validation;

pub use behavioral::{evaluate_assertion, evaluate_scenario, BddSpecification, Scenario, ScenarioResult};
pub use error::WorkflowError;
pub use executor::{ExecutionReport, StepOutcome, StepStatus, WorkflowExecutor};
pub use graph::DependencyGraph;
pub use reference::SourceReference;
pub use spec::{InputDef, OutputDef, PipPackage, StepKind, WorkflowDependencies, WorkflowSpec, WorkflowStep};
pub use validation::validate;
