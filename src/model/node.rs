use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeModel {
    pub id: String,
    /// one of `trigger`, `email`, `slack`, `webhook`, `condition`, `delay`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// kind-specific config, the wire contract with the editor
    #[serde(default)]
    pub config: serde_json::Value,
}

impl NodeModel {
    pub fn new(
        id: &str,
        kind: &str,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            title: None,
            config,
        }
    }
}
