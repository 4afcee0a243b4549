//! Workflow edge definitions for connecting nodes.
//!
//! Edges leaving a condition node carry a `true` / `false` branch label;
//! every other edge is unlabeled.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{FlowError, Result, model::EdgeModel, workflow::node::NodeId};

/// Unique identifier for an edge within a workflow.
pub type EdgeId = String;

/// Branch selected by a condition node.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BranchLabel {
    True,
    False,
}

impl From<bool> for BranchLabel {
    fn from(value: bool) -> Self {
        if value {
            BranchLabel::True
        } else {
            BranchLabel::False
        }
    }
}

/// Runtime edge representation connecting two nodes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Edge {
    /// Unique edge identifier.
    pub id: EdgeId,
    /// ID of the source node.
    pub source: NodeId,
    /// ID of the target node.
    pub target: NodeId,
    /// Branch this edge is taken on, condition sources only.
    pub label: Option<BranchLabel>,
}

impl Edge {
    pub fn new(model: &EdgeModel) -> Result<Self> {
        let label = match model.label.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(
                BranchLabel::from_str(&text.to_ascii_lowercase())
                    .map_err(|_| FlowError::validation(format!("edge {} has unknown label '{}'", model.id, text), Some(&model.from_node)))?,
            ),
        };

        Ok(Self {
            id: model.id.clone(),
            source: model.from_node.clone(),
            target: model.to_node.clone(),
            label,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parsing() {
        assert_eq!(Edge::new(&EdgeModel::labeled("e", "c", "x", "true")).unwrap().label, Some(BranchLabel::True));
        assert_eq!(Edge::new(&EdgeModel::labeled("e", "c", "x", "False")).unwrap().label, Some(BranchLabel::False));
        assert_eq!(Edge::new(&EdgeModel::labeled("e", "c", "x", "")).unwrap().label, None);
        assert_eq!(Edge::new(&EdgeModel::new("e", "c", "x")).unwrap().label, None);

        let err = Edge::new(&EdgeModel::labeled("e", "c", "x", "maybe")).unwrap_err();
        assert_eq!(err.node_id(), Some("c"));
    }
}
