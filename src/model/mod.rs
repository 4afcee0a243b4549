mod edge;
mod node;
mod workflow;

pub use edge::EdgeModel;
pub use node::NodeModel;
pub use workflow::{GraphModel, WorkflowModel};
