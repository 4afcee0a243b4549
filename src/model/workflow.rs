use serde::{Deserialize, Serialize};

use crate::{
    FlowError, Result,
    model::{EdgeModel, NodeModel},
};

/// Flat node and edge lists keyed by id, as drawn in the editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphModel {
    #[serde(default)]
    pub nodes: Vec<NodeModel>,
    #[serde(default)]
    pub edges: Vec<EdgeModel>,
}

/// Workflow as submitted by the editor: metadata plus its draft graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowModel {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_template: bool,
    #[serde(flatten)]
    pub graph: GraphModel,
}

impl GraphModel {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str::<GraphModel>(s).map_err(|e| FlowError::Workflow(format!("{}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn node(
        mut self,
        node: NodeModel,
    ) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(
        mut self,
        edge: EdgeModel,
    ) -> Self {
        self.edges.push(edge);
        self
    }
}

impl WorkflowModel {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str::<WorkflowModel>(s).map_err(|e| FlowError::Workflow(format!("{}", e)))
    }
}
