use std::collections::HashMap;

use serde_json::{Value as JsonValue, json};

use crate::{
    Result,
    store::{data::Run, db::mem::DbDocument},
};

impl DbDocument for Run {
    fn id(&self) -> &str {
        &self.id
    }

    fn doc(&self) -> Result<HashMap<String, JsonValue>> {
        let mut map = HashMap::new();
        map.insert("id".to_string(), json!(self.id.clone()));
        map.insert("wid".to_string(), json!(self.wid.clone()));
        map.insert("graph_version".to_string(), json!(self.graph_version));
        map.insert("status".to_string(), json!(self.status.as_ref()));
        map.insert("trigger".to_string(), json!(self.trigger.clone()));
        map.insert("entity_id".to_string(), json!(self.entity_id.clone()));
        map.insert("current_node_id".to_string(), json!(self.current_node_id.clone()));
        map.insert("attempt".to_string(), json!(self.attempt));
        map.insert("resumes_at".to_string(), json!(self.resumes_at));
        map.insert("claimed_by".to_string(), json!(self.claimed_by.clone()));
        map.insert("claimed_until".to_string(), json!(self.claimed_until));
        map.insert("revision".to_string(), json!(self.revision));
        map.insert("created_at".to_string(), json!(self.created_at));
        map.insert("updated_at".to_string(), json!(self.updated_at));
        map.insert("ended_at".to_string(), json!(self.ended_at));
        Ok(map)
    }
}
