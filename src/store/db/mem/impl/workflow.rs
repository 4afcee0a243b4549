use std::collections::HashMap;

use serde_json::{Value as JsonValue, json};

use crate::{
    Result,
    store::{data::Workflow, db::mem::DbDocument},
};

impl DbDocument for Workflow {
    fn id(&self) -> &str {
        &self.id
    }

    fn doc(&self) -> Result<HashMap<String, JsonValue>> {
        let mut map = HashMap::new();
        map.insert("id".to_string(), json!(self.id.clone()));
        map.insert("name".to_string(), json!(self.name.clone()));
        map.insert("graph_version".to_string(), json!(self.graph_version));
        map.insert("is_active".to_string(), json!(self.is_active));
        map.insert("is_template".to_string(), json!(self.is_template));
        map.insert("deleted".to_string(), json!(self.deleted));
        map.insert("revision".to_string(), json!(self.revision));
        map.insert("created_at".to_string(), json!(self.created_at));
        map.insert("updated_at".to_string(), json!(self.updated_at));
        Ok(map)
    }
}
