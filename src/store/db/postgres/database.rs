use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing::info;

use crate::{
    Result,
    store::{DbCollection, DbStore, Store, data::*, map_db_err},
};

use super::{DbInit, collection::*, synclient::SynClient};

pub struct PostgresStore {
    workflows: Arc<WorkflowCollection>,
    graphs: Arc<GraphCollection>,
    runs: Arc<RunCollection>,
    steps: Arc<StepCollection>,
}

impl DbStore for PostgresStore {
    fn init(
        &self,
        s: &Store,
    ) -> Result<()> {
        self.workflows.init()?;
        self.graphs.init()?;
        self.runs.init()?;
        self.steps.init()?;

        s.register(self.workflows());
        s.register(self.graphs());
        s.register(self.runs());
        s.register(self.steps());
        Ok(())
    }
}

impl PostgresStore {
    pub fn new(
        db_url: &str,
        runtime: Arc<Runtime>,
    ) -> Result<Self> {
        let conn = Arc::new(SynClient::connect(db_url, runtime).map_err(map_db_err)?);
        info!("connected to postgres store");

        Ok(Self {
            workflows: Arc::new(WorkflowCollection::new(&conn)),
            graphs: Arc::new(GraphCollection::new(&conn)),
            runs: Arc::new(RunCollection::new(&conn)),
            steps: Arc::new(StepCollection::new(&conn)),
        })
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
