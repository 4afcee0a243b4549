//! Workflow engine - the main entry point for Autoflow.
//!
//! The engine owns the store, the executor and the trigger router, and
//! exposes the workflow persistence API, the run API and event ingestion.
//! `launch` starts the worker pool and the sweep loop on the engine's
//! tokio runtime; `shutdown` stops them.

mod worker;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::{
    Config, FlowError, Result,
    common::{Queue, Shutdown, Vars},
    events::{Event, RunEvent},
    model::{GraphModel, WorkflowModel},
    runtime::{Channel, Executor, TriggerRouter},
    store::{
        Store,
        data::{Run, RunStatus, Step, Workflow},
    },
    utils::{self, time::Clock},
    workflow::{Graph, consts::MANUAL_TRIGGER},
};

/// A run together with its step records, in visiting order.
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    pub run: Run,
    pub steps: Vec<Step>,
}

/// The main workflow engine.
///
/// # Example
///
/// ```rust,ignore
/// let engine = EngineBuilder::new().build()?;
/// engine.launch();
///
/// let wid = engine.create_workflow(&WorkflowModel::from_json(json_str)?)?;
/// engine.publish_draft(&wid)?;
/// engine.set_active(&wid, true)?;
///
/// // runs start from CRM events
/// engine.emit("task_created", "task-42", serde_json::json!({"task": {"priority": "high"}}))?;
///
/// engine.shutdown();
/// ```
pub struct Engine {
    config: Config,
    /// Persistent storage for workflows, graph versions, runs and steps.
    store: Arc<Store>,
    /// Event channel for broadcasting run events.
    channel: Arc<Channel>,
    executor: Arc<Executor>,
    router: TriggerRouter,
    /// Direct dispatch queue of run ids.
    queue: Arc<Queue<String>>,
    clock: Arc<dyn Clock>,
    /// Identity used by this engine's workers and by `drive`.
    worker_id: String,

    /// Flag indicating if the engine is running.
    running: Arc<AtomicBool>,
    /// Tokio runtime for async task execution.
    runtime: Arc<Runtime>,
    /// Shutdown coordinator for graceful termination.
    shutdown: Arc<Shutdown>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Config,
        store: Arc<Store>,
        channel: Arc<Channel>,
        executor: Arc<Executor>,
        router: TriggerRouter,
        clock: Arc<dyn Clock>,
        runtime: Arc<Runtime>,
    ) -> Self {
        let queue = Queue::new(config.scheduler.queue_capacity);
        Self {
            config,
            store,
            channel,
            executor,
            router,
            queue,
            clock,
            worker_id: utils::shortid(),
            running: Arc::new(AtomicBool::new(false)),
            runtime,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    /// Starts the worker pool, the sweep loop and event delivery.
    pub fn launch(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            return;
        }

        let handle = self.runtime.handle();
        self.channel.listen(handle);
        worker::spawn_workers(handle, &self.worker_id, self.config.scheduler.workers, self.executor.clone(), self.queue.clone(), self.shutdown.clone());
        worker::spawn_sweeper(
            handle,
            Duration::from_millis(self.config.scheduler.sweep_interval_ms),
            self.store.clone(),
            self.clock.clone(),
            self.queue.clone(),
            self.shutdown.clone(),
        );
        info!(workers = self.config.scheduler.workers, "engine launched");
    }

    /// Stops workers and the sweep loop.
    ///
    /// Runs in flight keep their lease until it expires and are then picked
    /// up again by the next engine that sweeps the store.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }

        self.shutdown.shutdown();
        self.channel.shutdown();
        info!("engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Returns a reference to the event channel.
    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    /// Checks a graph the way `publish` does, without storing it.
    pub fn validate(
        &self,
        graph: &GraphModel,
    ) -> Result<()> {
        Graph::parse(graph).map(|_| ())
    }

    /// Creates an unpublished workflow holding `model`'s graph as its draft.
    pub fn create_workflow(
        &self,
        model: &WorkflowModel,
    ) -> Result<String> {
        let workflow = self.store.create_workflow(model)?;
        info!(wid = %workflow.id, "workflow created");
        Ok(workflow.id)
    }

    /// Replaces the draft. The live graph is untouched until the next publish.
    pub fn update_draft(
        &self,
        wid: &str,
        graph: &GraphModel,
    ) -> Result<Workflow> {
        let draft = graph.to_json()?;
        self.store.modify_workflow(wid, |w| {
            w.draft = draft;
            Ok(())
        })
    }

    pub fn update_workflow(
        &self,
        wid: &str,
        name: Option<&str>,
        description: Option<&str>,
        is_template: Option<bool>,
    ) -> Result<Workflow> {
        self.store.modify_workflow(wid, |w| {
            if let Some(name) = name {
                w.name = name.to_string();
            }
            if let Some(description) = description {
                w.description = description.to_string();
            }
            if let Some(is_template) = is_template {
                w.is_template = is_template;
            }
            Ok(())
        })
    }

    /// Validates `graph` and makes it the workflow's next graph version.
    pub fn publish(
        &self,
        wid: &str,
        graph: &GraphModel,
    ) -> Result<i32> {
        self.validate(graph)?;
        let version = self.store.publish(wid, graph)?;
        info!(wid, version, "graph published");
        Ok(version)
    }

    pub fn publish_draft(
        &self,
        wid: &str,
    ) -> Result<i32> {
        let workflow = self.store.workflow(wid)?;
        let graph = GraphModel::from_json(&workflow.draft)?;
        self.publish(wid, &graph)
    }

    /// Turns event triggering on or off. Only published workflows can be activated.
    pub fn set_active(
        &self,
        wid: &str,
        active: bool,
    ) -> Result<Workflow> {
        self.store.modify_workflow(wid, |w| {
            if active && !w.is_published() {
                return Err(FlowError::Workflow(format!("workflow {} has no published graph", w.id)));
            }
            w.is_active = active;
            Ok(())
        })
    }

    pub fn get_workflow(
        &self,
        wid: &str,
    ) -> Result<Workflow> {
        self.store.workflow(wid)
    }

    pub fn list_workflows(
        &self,
        include_templates: bool,
    ) -> Result<Vec<Workflow>> {
        self.store.list_workflows(include_templates)
    }

    /// A published graph version, the current one when `version` is `None`.
    pub fn get_graph(
        &self,
        wid: &str,
        version: Option<i32>,
    ) -> Result<GraphModel> {
        let workflow = self.store.workflow(wid)?;
        let version = version.unwrap_or(workflow.graph_version);
        if version <= 0 {
            return Err(FlowError::NotFound(format!("published graph of workflow {}", wid)));
        }
        GraphModel::from_json(&self.store.graph(wid, version)?.data)
    }

    /// Soft-deletes a workflow with no runs in progress.
    pub fn delete_workflow(
        &self,
        wid: &str,
    ) -> Result<()> {
        self.store.delete_workflow(wid)?;
        info!(wid, "workflow deleted");
        Ok(())
    }

    /// Starts a run of the current graph by hand.
    ///
    /// Works for active workflows and for templates, which the editor uses
    /// as a dry-run surface.
    pub fn start_run(
        &self,
        wid: &str,
        context: Option<Value>,
    ) -> Result<String> {
        let workflow = self.store.workflow(wid)?;
        if !workflow.is_published() {
            return Err(FlowError::Workflow(format!("workflow {} has no published graph", wid)));
        }
        if !workflow.is_active && !workflow.is_template {
            return Err(FlowError::Workflow(format!("workflow {} is not active", wid)));
        }

        let context = Vars::from(context.unwrap_or(Value::Null)).to_json_string();
        let run = Run::pending(&utils::longid(), wid, workflow.graph_version, MANUAL_TRIGGER, "", context, self.clock.now_millis());
        if !self.store.runs().create(&run)? {
            return Err(FlowError::Conflict(format!("run {} already exists", run.id)));
        }

        info!(run_id = %run.id, wid, "run started manually");
        self.channel.emit(Event::new(
            &run.id,
            wid,
            "",
            RunEvent::Created {
                trigger: MANUAL_TRIGGER.to_string(),
            },
            run.created_at,
        ));
        self.enqueue(&run.id);
        Ok(run.id)
    }

    pub fn get_run(
        &self,
        run_id: &str,
    ) -> Result<RunDetail> {
        Ok(RunDetail {
            run: self.store.runs().find(run_id)?,
            steps: self.store.steps_of(run_id)?,
        })
    }

    /// Runs of a workflow, newest first.
    pub fn list_runs(
        &self,
        wid: &str,
    ) -> Result<Vec<Run>> {
        self.store.runs_of(wid)
    }

    pub fn list_runs_by_status(
        &self,
        status: RunStatus,
    ) -> Result<Vec<Run>> {
        self.store.runs_by_status(status)
    }

    /// Cancels a run. Fails with `Conflict` when it already ended.
    pub fn cancel_run(
        &self,
        run_id: &str,
    ) -> Result<Run> {
        self.executor.cancel(run_id)
    }

    /// Event ingestion from the CRM.
    ///
    /// # Returns
    ///
    /// Ids of the runs this event started.
    pub fn emit(
        &self,
        event_type: &str,
        entity_id: &str,
        payload: Value,
    ) -> Result<Vec<String>> {
        self.ingest(event_type, entity_id, None, &payload)
    }

    /// Like [`Engine::emit`], deduplicating on the producer's `occurrence_id`
    /// instead of the payload, so repeated identical updates each start runs.
    pub fn emit_occurrence(
        &self,
        event_type: &str,
        entity_id: &str,
        occurrence_id: &str,
        payload: Value,
    ) -> Result<Vec<String>> {
        self.ingest(event_type, entity_id, Some(occurrence_id), &payload)
    }

    fn ingest(
        &self,
        event_type: &str,
        entity_id: &str,
        occurrence_id: Option<&str>,
        payload: &Value,
    ) -> Result<Vec<String>> {
        let ids = self.router.on_event(event_type, entity_id, occurrence_id, payload)?;
        for id in &ids {
            self.enqueue(id);
        }
        Ok(ids)
    }

    /// Claims and advances one run on the calling thread.
    ///
    /// Returns `None` when the run is not claimable right now.
    pub fn drive(
        &self,
        run_id: &str,
    ) -> Result<Option<RunStatus>> {
        utils::block_on(&self.runtime, self.executor.drive(run_id, &self.worker_id))
    }

    /// Enqueues every due run once, as the periodic sweep does.
    pub fn sweep(&self) -> Result<usize> {
        worker::sweep(&self.store, self.clock.as_ref(), &self.queue)
    }

    fn enqueue(
        &self,
        run_id: &str,
    ) {
        // a full queue is fine, the sweep finds pending runs
        if let Err(err) = self.queue.try_send(run_id.to_string()) {
            debug!(run_id, "not enqueued: {}", err);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
