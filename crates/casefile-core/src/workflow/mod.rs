//! Workflow definitions and run results.
//!
//! A workflow is a declarative multi-step operation graph. Step parameters
//! may carry deferred references (`${steps.<id>.<field>}`, `${context.<key>}`)
//! that the engine substitutes at execution time.

pub mod model;
pub mod result;

pub use model::{ErrorHandling, ExecutionMode, WorkflowDefinition, WorkflowStep};
pub use result::{StepResult, StepStatus, WorkflowResult, WorkflowStatus};
