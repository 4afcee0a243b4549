use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeModel {
    pub id: String,
    #[serde(alias = "source")]
    pub from_node: String,
    #[serde(alias = "target")]
    pub to_node: String,
    /// `true` / `false` on edges leaving a condition node, absent otherwise
    #[serde(default, alias = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl EdgeModel {
    pub fn new(
        id: &str,
        from_node: &str,
        to_node: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            from_node: from_node.to_string(),
            to_node: to_node.to_string(),
            label: None,
        }
    }

    pub fn labeled(
        id: &str,
        from_node: &str,
        to_node: &str,
        label: &str,
    ) -> Self {
        Self {
            label: Some(label.to_string()),
            ..Self::new(id, from_node, to_node)
        }
    }
}
