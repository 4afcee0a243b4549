use std::{
    any::Any,
    collections::HashMap,
    convert::AsRef,
    sync::{Arc, RwLock},
};

use tracing::trace;

use crate::{
    FlowError, Result, ShareLock,
    model::{GraphModel, WorkflowModel},
    utils,
};

use super::{
    DbCollection, DbCollectionIden, StoreIden,
    data::*,
    query::{Cond, Query},
};

#[derive(Clone)]
pub struct DynDbSetRef<T>(Arc<dyn DbCollection<Item = T>>);

pub struct Store {
    collections: ShareLock<HashMap<StoreIden, Arc<dyn Any + Send + Sync + 'static>>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn collection<DATA>(&self) -> Arc<dyn DbCollection<Item = DATA>>
    where
        DATA: DbCollectionIden + Send + Sync + 'static,
    {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());

        #[allow(clippy::expect_fun_call)]
        let collection = collections.get(&DATA::iden()).expect(&format!("fail to get collection: {}", DATA::iden().as_ref()));

        #[allow(clippy::expect_fun_call)]
        collection.downcast_ref::<DynDbSetRef<DATA>>().map(|v| v.0.clone()).expect(&format!("fail to get collection: {}", DATA::iden().as_ref()))
    }

    pub fn register<DATA>(
        &self,
        collection: Arc<dyn DbCollection<Item = DATA> + Send + Sync + 'static>,
    ) where
        DATA: DbCollectionIden + 'static,
    {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        collections.insert(DATA::iden(), Arc::new(DynDbSetRef::<DATA>(collection)));
    }

    pub fn workflows(&self) -> Arc<dyn DbCollection<Item = Workflow>> {
        self.collection()
    }

    pub fn graphs(&self) -> Arc<dyn DbCollection<Item = Graph>> {
        self.collection()
    }

    pub fn runs(&self) -> Arc<dyn DbCollection<Item = Run>> {
        self.collection()
    }

    pub fn steps(&self) -> Arc<dyn DbCollection<Item = Step>> {
        self.collection()
    }

    pub fn create_workflow(
        &self,
        model: &WorkflowModel,
    ) -> Result<Workflow> {
        let id = if model.id.is_empty() {
            utils::longid()
        } else {
            model.id.clone()
        };
        trace!("store::create_workflow({})", id);
        let now = utils::time::time_millis();
        let data = Workflow {
            id: id.clone(),
            name: model.name.clone(),
            description: model.description.clone(),
            graph_version: 0,
            is_active: model.is_active,
            is_template: model.is_template,
            draft: model.graph.to_json()?,
            deleted: false,
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        if !self.workflows().create(&data)? {
            return Err(FlowError::Conflict(format!("workflow {} already exists", id)));
        }
        Ok(data)
    }

    /// Live (not soft-deleted) workflow.
    pub fn workflow(
        &self,
        wid: &str,
    ) -> Result<Workflow> {
        let workflow = self.workflows().find(wid)?;
        if workflow.deleted {
            return Err(FlowError::NotFound(format!("workflow {}", wid)));
        }
        Ok(workflow)
    }

    /// Applies `f` to the live workflow and writes it back if nobody else wrote in between.
    pub fn modify_workflow<F>(
        &self,
        wid: &str,
        f: F,
    ) -> Result<Workflow>
    where
        F: FnOnce(&mut Workflow) -> Result<()>,
    {
        trace!("store::modify_workflow({})", wid);
        let current = self.workflow(wid)?;
        let mut next = current.clone();
        f(&mut next)?;
        next.revision = current.revision + 1;
        next.updated_at = utils::time::time_millis();
        if !self.workflows().update_if(&next, "revision", &Cond::eq(current.revision))? {
            return Err(FlowError::Conflict(format!("workflow {} was modified concurrently", wid)));
        }
        Ok(next)
    }

    /// Stores `graph` as the next immutable version and makes it current.
    ///
    /// The graph must already be validated. Either both the version record
    /// and the workflow pointer are written, or neither is.
    pub fn publish(
        &self,
        wid: &str,
        graph: &GraphModel,
    ) -> Result<i32> {
        let current = self.workflow(wid)?;
        let version = current.graph_version + 1;
        trace!("store::publish({}@{})", wid, version);

        let record = Graph {
            id: Graph::key(wid, version),
            wid: wid.to_string(),
            version,
            data: graph.to_json()?,
            created_at: utils::time::time_millis(),
        };
        if !self.graphs().create(&record)? {
            return Err(FlowError::Conflict(format!("workflow {} version {} is already published", wid, version)));
        }

        let mut next = current.clone();
        next.graph_version = version;
        next.revision = current.revision + 1;
        next.updated_at = record.created_at;
        match self.workflows().update_if(&next, "revision", &Cond::eq(current.revision)) {
            Ok(true) => Ok(version),
            Ok(false) => {
                self.graphs().delete(&record.id)?;
                Err(FlowError::Conflict(format!("workflow {} was modified concurrently", wid)))
            }
            Err(err) => {
                self.graphs().delete(&record.id)?;
                Err(err)
            }
        }
    }

    pub fn graph(
        &self,
        wid: &str,
        version: i32,
    ) -> Result<Graph> {
        self.graphs().find(&Graph::key(wid, version))
    }

    pub fn list_workflows(
        &self,
        include_templates: bool,
    ) -> Result<Vec<Workflow>> {
        let mut q = Query::new().filter("deleted", Cond::eq(false)).sort("created_at", false);
        if !include_templates {
            q = q.filter("is_template", Cond::eq(false));
        }
        Ok(self.workflows().query(&q)?.rows)
    }

    /// Published, active, non-template workflows an event may start.
    pub fn triggerable_workflows(&self) -> Result<Vec<Workflow>> {
        let q = Query::new()
            .filter("deleted", Cond::eq(false))
            .filter("is_active", Cond::eq(true))
            .filter("is_template", Cond::eq(false))
            .filter("graph_version", Cond::gt(0))
            .sort("created_at", false);
        Ok(self.workflows().query(&q)?.rows)
    }

    pub fn has_active_runs(
        &self,
        wid: &str,
    ) -> Result<bool> {
        let q = Query::new().filter("wid", Cond::eq(wid)).filter("status", Cond::is_in(RunStatus::active().map(|s| s.as_ref().to_string()))).set_limit(1);
        Ok(self.runs().query(&q)?.count > 0)
    }

    pub fn delete_workflow(
        &self,
        wid: &str,
    ) -> Result<()> {
        trace!("store::delete_workflow({})", wid);
        if self.has_active_runs(wid)? {
            return Err(FlowError::Conflict(format!("workflow {} has runs in progress", wid)));
        }
        let mut was_active = false;
        let deleted = self.modify_workflow(wid, |w| {
            was_active = w.is_active;
            w.deleted = true;
            w.is_active = false;
            Ok(())
        })?;

        // a trigger that listed the workflow before the write may have added a run
        if self.has_active_runs(wid)? {
            let mut restored = deleted.clone();
            restored.deleted = false;
            restored.is_active = was_active;
            restored.revision = deleted.revision + 1;
            restored.updated_at = utils::time::time_millis();
            self.workflows().update_if(&restored, "revision", &Cond::eq(deleted.revision))?;
            return Err(FlowError::Conflict(format!("workflow {} has runs in progress", wid)));
        }
        Ok(())
    }

    /// Writes `run` over the stored copy whose revision is `run.revision - 1`.
    pub fn save_run(
        &self,
        run: &Run,
    ) -> Result<bool> {
        self.runs().update_if(run, "revision", &Cond::eq(run.revision - 1))
    }

    /// Step records of a run in visiting order.
    pub fn steps_of(
        &self,
        run_id: &str,
    ) -> Result<Vec<Step>> {
        let q = Query::new().filter("run_id", Cond::eq(run_id)).sort("seq", false);
        Ok(self.steps().query(&q)?.rows)
    }

    /// Runs of a workflow, newest first.
    pub fn runs_of(
        &self,
        wid: &str,
    ) -> Result<Vec<Run>> {
        let q = Query::new().filter("wid", Cond::eq(wid)).sort("created_at", true);
        Ok(self.runs().query(&q)?.rows)
    }

    pub fn runs_by_status(
        &self,
        status: RunStatus,
    ) -> Result<Vec<Run>> {
        let q = Query::new().filter("status", Cond::eq(status.as_ref())).sort("created_at", true);
        Ok(self.runs().query(&q)?.rows)
    }

    /// Non-terminal runs that are due at `now` and not held by a live lease.
    pub fn due_runs(
        &self,
        now: i64,
        limit: usize,
    ) -> Result<Vec<Run>> {
        let q = Query::new()
            .filter("status", Cond::is_in(RunStatus::active().map(|s| s.as_ref().to_string())))
            .filter("resumes_at", Cond::le(now))
            .filter("claimed_until", Cond::le(now))
            .sort("resumes_at", false)
            .set_limit(limit);
        Ok(self.runs().query(&q)?.rows)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        model::{EdgeModel, NodeModel},
        store::{DbStore, MemStore},
    };
    use serde_json::json;

    fn store() -> Store {
        let store = Store::new();
        MemStore::new().init(&store).unwrap();
        store
    }

    fn graph() -> GraphModel {
        GraphModel::default()
            .node(NodeModel::new("t", "trigger", json!({"type": "manual"})))
            .node(NodeModel::new("s", "slack", json!({"channel": "#a", "message": "hi"})))
            .edge(EdgeModel::new("e1", "t", "s"))
    }

    #[test]
    fn test_publish_bumps_version_and_keeps_old_graphs() {
        let store = store();
        let wf = store.create_workflow(&WorkflowModel { name: "w".into(), ..Default::default() }).unwrap();
        assert_eq!(wf.graph_version, 0);

        assert_eq!(store.publish(&wf.id, &graph()).unwrap(), 1);
        assert_eq!(store.publish(&wf.id, &GraphModel::default()).unwrap(), 2);
        assert_eq!(store.workflow(&wf.id).unwrap().graph_version, 2);

        let v1 = GraphModel::from_json(&store.graph(&wf.id, 1).unwrap().data).unwrap();
        assert_eq!(v1, graph());
    }

    #[test]
    fn test_stale_writer_conflicts() {
        let store = store();
        let wf = store.create_workflow(&WorkflowModel { name: "w".into(), ..Default::default() }).unwrap();
        store.modify_workflow(&wf.id, |w| {
            w.name = "renamed".into();
            Ok(())
        })
        .unwrap();

        let mut stale = wf.clone();
        stale.revision = wf.revision + 1;
        assert!(!store.workflows().update_if(&stale, "revision", &Cond::eq(wf.revision)).unwrap());
        assert_eq!(store.workflow(&wf.id).unwrap().name, "renamed");
    }

    #[test]
    fn test_soft_delete_refused_with_active_runs() {
        let store = Arc::new(store());
        let wf = store.create_workflow(&WorkflowModel { name: "w".into(), ..Default::default() }).unwrap();
        let run = Run {
            id: "r1".into(),
            wid: wf.id.clone(),
            status: RunStatus::Waiting,
            ..Default::default()
        };
        store.runs().create(&run).unwrap();
        assert!(matches!(store.delete_workflow(&wf.id), Err(FlowError::Conflict(_))));

        let mut done = run.clone();
        done.status = RunStatus::Completed;
        done.revision = 1;
        assert!(store.save_run(&done).unwrap());
        store.delete_workflow(&wf.id).unwrap();
        assert!(matches!(store.workflow(&wf.id), Err(FlowError::NotFound(_))));
        assert!(store.list_workflows(true).unwrap().is_empty());
        // the run history stays
        assert_eq!(store.runs_of(&wf.id).unwrap().len(), 1);
    }

    #[test]
    fn test_due_runs_skip_leased_and_future() {
        let store = store();
        let base = Run {
            wid: "w".into(),
            status: RunStatus::Running,
            ..Default::default()
        };
        store.runs().create(&Run { id: "due".into(), ..base.clone() }).unwrap();
        store.runs().create(&Run { id: "later".into(), resumes_at: 500, ..base.clone() }).unwrap();
        store
            .runs()
            .create(&Run {
                id: "leased".into(),
                claimed_by: "w1".into(),
                claimed_until: 500,
                ..base.clone()
            })
            .unwrap();
        store.runs().create(&Run { id: "done".into(), status: RunStatus::Completed, ..base }).unwrap();

        let ids: Vec<String> = store.due_runs(100, 10).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["due".to_string()]);
        assert_eq!(store.due_runs(600, 10).unwrap().len(), 3);
    }
}
