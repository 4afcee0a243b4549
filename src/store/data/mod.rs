mod graph;
mod run;
mod step;
mod workflow;

pub use graph::Graph;
pub use run::{Run, RunStatus};
pub use step::{Step, StepOutcome};
pub use workflow::Workflow;
