use std::collections::HashMap;

use serde_json::{Value as JsonValue, json};

use crate::{
    Result,
    store::{data::Step, db::mem::DbDocument},
};

impl DbDocument for Step {
    fn id(&self) -> &str {
        &self.id
    }

    fn doc(&self) -> Result<HashMap<String, JsonValue>> {
        let mut map = HashMap::new();
        map.insert("id".to_string(), json!(self.id.clone()));
        map.insert("run_id".to_string(), json!(self.run_id.clone()));
        map.insert("seq".to_string(), json!(self.seq));
        map.insert("node_id".to_string(), json!(self.node_id.clone()));
        map.insert("attempt".to_string(), json!(self.attempt));
        map.insert("outcome".to_string(), json!(self.outcome.as_ref()));
        map.insert("started_at".to_string(), json!(self.started_at));
        map.insert("finished_at".to_string(), json!(self.finished_at));
        Ok(map)
    }
}
