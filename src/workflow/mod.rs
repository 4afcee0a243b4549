pub mod actions;
pub mod condition;
pub mod consts;
pub mod edge;
mod graph;
pub mod node;
pub mod template;

pub use graph::Graph;
