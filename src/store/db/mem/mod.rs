mod collect;
mod r#impl;

use std::{collections::HashMap, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;

use crate::{
    Result,
    store::{DbCollection, DbStore, Store, data::*},
};
pub use collect::Collect;

#[derive(Debug, Clone)]
pub struct MemStore {
    workflows: Arc<Collect<Workflow>>,
    graphs: Arc<Collect<Graph>>,
    runs: Arc<Collect<Run>>,
    steps: Arc<Collect<Step>>,
}

/// Queryable projection of a record: the columns filters and sorts can see.
pub(crate) trait DbDocument: Serialize + DeserializeOwned {
    fn id(&self) -> &str;
    fn doc(&self) -> Result<HashMap<String, JsonValue>>;
}

impl DbStore for MemStore {
    fn init(
        &self,
        s: &Store,
    ) -> Result<()> {
        s.register(self.workflows());
        s.register(self.graphs());
        s.register(self.runs());
        s.register(self.steps());
        Ok(())
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        let workflows = Collect::new("workflows");
        let graphs = Collect::new("graphs");
        let runs = Collect::new("runs");
        let steps = Collect::new("steps");

        Self {
            workflows: Arc::new(workflows),
            graphs: Arc::new(graphs),
            runs: Arc::new(runs),
            steps: Arc::new(steps),
        }
    }

    pub fn workflows(&self) -> Arc<dyn DbCollection<Item = Workflow> + Send + Sync> {
        self.workflows.clone()
    }

    pub fn graphs(&self) -> Arc<dyn DbCollection<Item = Graph> + Send + Sync> {
        self.graphs.clone()
    }

    pub fn runs(&self) -> Arc<dyn DbCollection<Item = Run> + Send + Sync> {
        self.runs.clone()
    }

    pub fn steps(&self) -> Arc<dyn DbCollection<Item = Step> + Send + Sync> {
        self.steps.clone()
    }
}
