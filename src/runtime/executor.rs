//! Run execution state machine.
//!
//! A run is driven by one worker at a time: [`Executor::drive`] claims the
//! run with a compare-and-swap on its revision, then walks the published
//! graph node by node. Every node visit appends a step record *before* the
//! run's `current_node_id` moves on, so a crashed or re-claimed run resumes
//! by skipping nodes that already have a successful step.

use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info, warn};

use crate::{
    FlowError, Result,
    common::{MemCache, Vars},
    config::SchedulerConfig,
    events::{Event, RunEvent},
    model::GraphModel,
    runtime::Channel,
    store::{
        Store,
        data::{self, Run, RunStatus, Step, StepOutcome},
    },
    utils::time::{Clock, to_datetime},
    workflow::{
        Graph,
        actions::{ActionOutput, DispatchError, Dispatcher, Dispatchers},
        condition,
        edge::BranchLabel,
        node::{Node, NodeKind},
    },
};

/// Maximum number of parsed graph versions kept in memory.
pub(crate) const GRAPH_CACHE_SIZE: usize = 256;

/// Attempts made by `cancel` against concurrent run writers.
const CANCEL_ATTEMPTS: usize = 16;

/// Parsed published graphs, keyed by `workflow_id@version`.
///
/// Published versions never change, so entries are never invalidated.
#[derive(Clone)]
pub struct GraphCache {
    store: Arc<Store>,
    cache: MemCache<String, Arc<Graph>>,
}

impl GraphCache {
    pub fn new(
        store: Arc<Store>,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            cache: MemCache::new(capacity),
        }
    }

    pub fn get(
        &self,
        wid: &str,
        version: i32,
    ) -> Result<Arc<Graph>> {
        let key = data::Graph::key(wid, version);
        if let Some(graph) = self.cache.get(&key) {
            return Ok(graph);
        }

        let record = self.store.graph(wid, version)?;
        // validated when it was published
        let graph = Arc::new(Graph::build(&GraphModel::from_json(&record.data)?)?);
        self.cache.set(key, graph.clone());
        Ok(graph)
    }
}

/// Decision taken for the current node.
#[derive(Debug, PartialEq)]
enum Visit {
    /// Follow the outgoing edge, or the labeled branch of a condition.
    Next(Option<BranchLabel>),
    /// Park the run until the given time.
    Suspend(i64),
    /// Retryable failure, try the node again at `retry_at`.
    Retry {
        attempt: i32,
        retry_at: i64,
        reason: String,
    },
    /// Terminal failure.
    Fail(String),
    /// Another writer appended the step first.
    Lost,
}

pub struct Executor {
    store: Arc<Store>,
    graphs: GraphCache,
    dispatchers: Dispatchers,
    channel: Arc<Channel>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl Executor {
    pub fn new(
        store: Arc<Store>,
        graphs: GraphCache,
        dispatchers: Dispatchers,
        channel: Arc<Channel>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            graphs,
            dispatchers,
            channel,
            clock,
            config,
        }
    }

    /// Claims `run_id` for `worker` and advances it as far as it can go.
    ///
    /// # Returns
    ///
    /// `None` when the run could not be claimed (terminal, not yet due, or
    /// held by another worker), otherwise the status the run was left in.
    pub async fn drive(
        &self,
        run_id: &str,
        worker: &str,
    ) -> Result<Option<RunStatus>> {
        let Some(run) = self.claim(run_id, worker)? else {
            return Ok(None);
        };
        self.advance(run).await.map(Some)
    }

    pub fn claim(
        &self,
        run_id: &str,
        worker: &str,
    ) -> Result<Option<Run>> {
        let run = self.store.runs().find(run_id)?;
        self.try_claim(run, worker)
    }

    /// Claims a loaded snapshot of a run. Fails if the stored run moved on since the snapshot.
    pub fn try_claim(
        &self,
        mut run: Run,
        worker: &str,
    ) -> Result<Option<Run>> {
        let now = self.clock.now_millis();
        if run.status.is_terminal() || run.resumes_at > now || run.is_claimed(worker, now) {
            debug!(run_id = %run.id, status = %run.status, "run is not claimable");
            return Ok(None);
        }

        run.status = RunStatus::Running;
        run.resumes_at = 0;
        run.claimed_by = worker.to_string();
        run.claimed_until = now + self.config.lease_ms as i64;
        if !self.save(&mut run)? {
            debug!(run_id = %run.id, worker, "lost the claim to another writer");
            return Ok(None);
        }

        info!(run_id = %run.id, node_id = %run.current_node_id, worker, "claimed run");
        self.emit(
            &run,
            "",
            RunEvent::Running {
                worker: worker.to_string(),
            },
        );
        Ok(Some(run))
    }

    /// Moves a non-terminal run to `cancelled`.
    ///
    /// A worker currently holding the run notices before its next node.
    pub fn cancel(
        &self,
        run_id: &str,
    ) -> Result<Run> {
        for _ in 0..CANCEL_ATTEMPTS {
            let mut run = self.store.runs().find(run_id)?;
            if run.status.is_terminal() {
                return Err(FlowError::Conflict(format!("run {} is already {}", run_id, run.status)));
            }

            run.status = RunStatus::Cancelled;
            run.ended_at = self.clock.now_millis();
            run.release();
            if self.save(&mut run)? {
                info!(run_id = %run.id, node_id = %run.current_node_id, "run cancelled");
                self.emit(&run, "", RunEvent::Cancelled);
                return Ok(run);
            }
        }
        Err(FlowError::Conflict(format!("run {} kept changing while cancelling", run_id)))
    }

    async fn advance(
        &self,
        mut run: Run,
    ) -> Result<RunStatus> {
        let graph = match self.graphs.get(&run.wid, run.graph_version) {
            Ok(graph) => graph,
            // the lease runs out and the sweep hands the run out again
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => {
                let reason = format!("cannot load graph {}@{}: {}", run.wid, run.graph_version, err);
                return self.abort(run, reason);
            }
        };
        let ctx = match Vars::from_json_str(&run.context) {
            Ok(ctx) => ctx,
            Err(err) => return self.abort(run, format!("invalid run context: {}", err)),
        };
        let mut steps = self.store.steps_of(&run.id)?;
        if run.current_node_id.is_empty() {
            run.current_node_id = graph.entry_node()?.id.clone();
        }

        loop {
            // cooperative cancellation and lease check
            let stored = self.store.runs().find(&run.id)?;
            if stored.revision != run.revision {
                if stored.status == RunStatus::Cancelled {
                    self.record_cancelled(&stored, &run.current_node_id, &steps)?;
                } else {
                    warn!(run_id = %run.id, node_id = %run.current_node_id, "run changed under the worker, giving up the lease");
                }
                return Ok(stored.status);
            }

            let Some(node) = graph.node(&run.current_node_id) else {
                let reason = format!("node {} is not part of graph version {}", run.current_node_id, run.graph_version);
                return self.abort(run, reason);
            };

            let visit = if has_succeeded(&steps, &node.id) {
                self.replay(&run, node, &ctx, &steps)?
            } else {
                self.visit(&run, node, &ctx, &mut steps).await?
            };

            let now = self.clock.now_millis();
            let node_id = node.id.clone();
            let event = match visit {
                Visit::Next(branch) => match graph.next_nodes(&node_id, branch)?.first() {
                    Some(next) => {
                        run.current_node_id = next.id.clone();
                        run.attempt = 0;
                        run.claimed_until = now + self.config.lease_ms as i64;
                        self.save(&mut run)?;
                        continue;
                    }
                    None => {
                        run.status = RunStatus::Completed;
                        run.attempt = 0;
                        run.ended_at = now;
                        run.release();
                        RunEvent::Completed
                    }
                },
                Visit::Suspend(resumes_at) => {
                    run.status = RunStatus::Waiting;
                    run.resumes_at = resumes_at;
                    run.release();
                    RunEvent::Waiting {
                        resumes_at,
                    }
                }
                Visit::Retry {
                    attempt,
                    retry_at,
                    reason,
                } => {
                    run.attempt = attempt;
                    run.resumes_at = retry_at;
                    run.release();
                    RunEvent::Retrying {
                        attempt,
                        retry_at,
                        reason,
                    }
                }
                Visit::Fail(reason) => {
                    run.status = RunStatus::Failed;
                    run.error = Some(reason.clone());
                    run.ended_at = now;
                    run.release();
                    RunEvent::Failed {
                        error: reason,
                    }
                }
                Visit::Lost => {
                    warn!(run_id = %run.id, node_id = %node_id, "step already recorded by another worker");
                    return Ok(self.store.runs().find(&run.id)?.status);
                }
            };

            if self.save(&mut run)? {
                match &event {
                    RunEvent::Completed => info!(run_id = %run.id, node_id = %node_id, "run completed"),
                    RunEvent::Waiting { resumes_at } => info!(run_id = %run.id, node_id = %node_id, resumes_at, "run waiting"),
                    RunEvent::Retrying { attempt, retry_at, .. } => info!(run_id = %run.id, node_id = %node_id, attempt, retry_at, "retry scheduled"),
                    _ => error!(run_id = %run.id, node_id = %node_id, error = ?run.error, "run failed"),
                }
                self.emit(&run, &node_id, event);
                return Ok(run.status);
            }
            // the loop head sorts out who wrote in between
        }
    }

    /// Re-derives the decision for a node that already has a successful step.
    fn replay(
        &self,
        run: &Run,
        node: &Node,
        ctx: &Vars,
        steps: &[Step],
    ) -> Result<Visit> {
        debug!(run_id = %run.id, node_id = %node.id, "node already recorded, skipping");
        match &node.kind {
            NodeKind::Condition(config) => Ok(Visit::Next(Some(condition::evaluate_lenient(config, ctx).0.into()))),
            NodeKind::Delay(config) => {
                let started_at = steps.iter().find(|s| s.node_id == node.id && s.outcome == StepOutcome::Success).map(|s| s.started_at).unwrap_or_default();
                let due = config.resumes_at(started_at)?;
                if due > self.clock.now_millis() {
                    Ok(Visit::Suspend(due))
                } else {
                    Ok(Visit::Next(None))
                }
            }
            _ => Ok(Visit::Next(None)),
        }
    }

    async fn visit(
        &self,
        run: &Run,
        node: &Node,
        ctx: &Vars,
        steps: &mut Vec<Step>,
    ) -> Result<Visit> {
        let started_at = self.clock.now_millis();
        debug!(run_id = %run.id, node_id = %node.id, kind = node.kind.name(), "visiting node");

        match &node.kind {
            NodeKind::Trigger(_) => {
                let detail = format!("triggered by {}", if run.trigger.is_empty() { "unknown" } else { run.trigger.as_str() });
                let recorded = self.record(run, &node.id, 1, StepOutcome::Success, detail, Vec::new(), started_at, steps)?;
                Ok(if recorded { Visit::Next(None) } else { Visit::Lost })
            }
            NodeKind::Condition(config) => {
                let (result, mismatch) = condition::evaluate_lenient(config, ctx);
                let warnings = match mismatch {
                    Some(warning) => {
                        warn!(run_id = %run.id, node_id = %node.id, "{}, taking the false branch", warning);
                        vec![warning]
                    }
                    None => Vec::new(),
                };
                let detail = format!("{} {} {} -> {}", config.field, config.operator.as_ref(), config.value, result);
                let recorded = self.record(run, &node.id, 1, StepOutcome::Success, detail, warnings, started_at, steps)?;
                Ok(if recorded { Visit::Next(Some(result.into())) } else { Visit::Lost })
            }
            NodeKind::Delay(config) => {
                let due = match config.resumes_at(started_at) {
                    Ok(due) => due,
                    Err(err) => {
                        let reason = format!("node {}: {}", node.id, err);
                        let recorded = self.record(run, &node.id, 1, StepOutcome::Failure, err.to_string(), Vec::new(), started_at, steps)?;
                        return Ok(if recorded { Visit::Fail(reason) } else { Visit::Lost });
                    }
                };
                let until = to_datetime(due).map(|t| t.to_rfc3339()).unwrap_or_else(|| due.to_string());
                let detail = format!("waiting {} {} until {}", config.duration, config.unit.as_ref(), until);
                let recorded = self.record(run, &node.id, 1, StepOutcome::Success, detail, Vec::new(), started_at, steps)?;
                Ok(if recorded { Visit::Suspend(due) } else { Visit::Lost })
            }
            NodeKind::Email(_) | NodeKind::Slack(_) | NodeKind::Webhook(_) => {
                let attempt = failures(steps, &node.id) + 1;
                let result = self.dispatch(&node.kind, ctx).await;
                for warning in result.as_ref().map(|o| o.warnings.as_slice()).unwrap_or_else(|e| e.warnings()) {
                    warn!(run_id = %run.id, node_id = %node.id, "{}", warning);
                }

                match result {
                    Ok(ActionOutput {
                        detail,
                        warnings,
                    }) => {
                        info!(run_id = %run.id, node_id = %node.id, attempt, "{}", detail);
                        let recorded = self.record(run, &node.id, attempt, StepOutcome::Success, detail, warnings, started_at, steps)?;
                        Ok(if recorded { Visit::Next(None) } else { Visit::Lost })
                    }
                    Err(err) => {
                        let reason = err.reason().to_string();
                        let recorded = self.record(run, &node.id, attempt, StepOutcome::Failure, reason.clone(), err.warnings().to_vec(), started_at, steps)?;
                        if !recorded {
                            return Ok(Visit::Lost);
                        }

                        let max_attempts = self.config.max_attempts as i32;
                        if err.is_retryable() && attempt < max_attempts {
                            let retry_at = self.clock.now_millis() + self.config.backoff_ms(attempt as u32) as i64;
                            warn!(run_id = %run.id, node_id = %node.id, attempt, "retryable dispatch failure: {}", reason);
                            Ok(Visit::Retry {
                                attempt,
                                retry_at,
                                reason,
                            })
                        } else if err.is_retryable() {
                            Ok(Visit::Fail(format!("node {}: giving up after {} attempts: {}", node.id, attempt, reason)))
                        } else {
                            Ok(Visit::Fail(format!("node {}: {}", node.id, reason)))
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        kind: &NodeKind,
        ctx: &Vars,
    ) -> std::result::Result<ActionOutput, DispatchError> {
        let fut = match kind {
            NodeKind::Email(config) => self.dispatchers.email.send(config, ctx),
            NodeKind::Slack(config) => self.dispatchers.slack.send(config, ctx),
            NodeKind::Webhook(config) => self.dispatchers.webhook.send(config, ctx),
            other => return Err(DispatchError::terminal(format!("{} node has nothing to dispatch", other.name()), Vec::new())),
        };

        let timeout = self.config.dispatch_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout), fut).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::retryable(format!("dispatch timed out after {} ms", timeout), Vec::new())),
        }
    }

    /// Appends a step record. `false` when the slot was already taken.
    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        run: &Run,
        node_id: &str,
        attempt: i32,
        outcome: StepOutcome,
        detail: String,
        warnings: Vec<String>,
        started_at: i64,
        steps: &mut Vec<Step>,
    ) -> Result<bool> {
        let seq = steps.len() as i32;
        let step = Step {
            id: Step::key(&run.id, seq),
            run_id: run.id.clone(),
            seq,
            node_id: node_id.to_string(),
            attempt,
            outcome,
            detail,
            warnings,
            started_at,
            finished_at: self.clock.now_millis(),
        };
        if !self.store.steps().create(&step)? {
            return Ok(false);
        }

        self.emit(
            run,
            node_id,
            RunEvent::StepRecorded {
                seq,
                outcome,
                detail: step.detail.clone(),
            },
        );
        steps.push(step);
        Ok(true)
    }

    /// Marks the node that will not run because the run was cancelled.
    fn record_cancelled(
        &self,
        run: &Run,
        node_id: &str,
        steps: &[Step],
    ) -> Result<()> {
        info!(run_id = %run.id, node_id, "cancellation observed, stopping");
        let mut steps = steps.to_vec();
        let now = self.clock.now_millis();
        self.record(run, node_id, 1, StepOutcome::Skipped, "run cancelled".to_string(), Vec::new(), now, &mut steps)?;
        Ok(())
    }

    /// Fails a run that cannot make progress at all.
    fn abort(
        &self,
        mut run: Run,
        reason: String,
    ) -> Result<RunStatus> {
        error!(run_id = %run.id, node_id = %run.current_node_id, "{}", reason);
        run.status = RunStatus::Failed;
        run.ended_at = self.clock.now_millis();
        run.error = Some(reason.clone());
        run.release();
        if !self.save(&mut run)? {
            return Ok(self.store.runs().find(&run.id)?.status);
        }
        self.emit(
            &run,
            "",
            RunEvent::Failed {
                error: reason,
            },
        );
        Ok(RunStatus::Failed)
    }

    /// Conditional write on the run revision. On failure `run` keeps its old revision.
    fn save(
        &self,
        run: &mut Run,
    ) -> Result<bool> {
        run.revision += 1;
        run.updated_at = self.clock.now_millis();
        let saved = self.store.save_run(run)?;
        if !saved {
            run.revision -= 1;
        }
        Ok(saved)
    }

    fn emit(
        &self,
        run: &Run,
        node_id: &str,
        event: RunEvent,
    ) {
        self.channel.emit(Event::new(&run.id, &run.wid, node_id, event, self.clock.now_millis()));
    }
}

fn has_succeeded(
    steps: &[Step],
    node_id: &str,
) -> bool {
    steps.iter().any(|s| s.node_id == node_id && s.outcome == StepOutcome::Success)
}

fn failures(
    steps: &[Step],
    node_id: &str,
) -> i32 {
    steps.iter().filter(|s| s.node_id == node_id && s.outcome == StepOutcome::Failure).count() as i32
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        model::{EdgeModel, NodeModel, WorkflowModel},
        store::{
            DbCollection, DbStore, MemStore, PageData,
            query::{Cond, Query},
        },
        testing::{RecordingMailer, RecordingPoster, ScriptedHttp},
        utils::time::ManualClock,
        workflow::actions::{ChatPoster, DeliveryError, EmailDispatcher, SlackDispatcher, WebhookDispatcher},
    };

    const T0: i64 = 1_700_000_000_000;
    const DAY: i64 = 86_400_000;

    struct Harness {
        store: Arc<Store>,
        clock: Arc<ManualClock>,
        poster: Arc<RecordingPoster>,
        mailer: Arc<RecordingMailer>,
        http: Arc<ScriptedHttp>,
        executor: Executor,
        wid: String,
    }

    impl Harness {
        fn new(graph: GraphModel) -> Self {
            Self::with_poster(graph, Arc::new(RecordingPoster::default()))
        }

        fn with_poster(
            graph: GraphModel,
            poster: Arc<RecordingPoster>,
        ) -> Self {
            let store = Arc::new(Store::new());
            MemStore::new().init(&store).unwrap();
            let clock = Arc::new(ManualClock::new(T0));
            let mailer = Arc::new(RecordingMailer::default());
            let http = Arc::new(ScriptedHttp::new(vec![Ok(500)]));

            let wf = store
                .create_workflow(&WorkflowModel {
                    name: "harness".into(),
                    is_active: true,
                    ..Default::default()
                })
                .unwrap();
            store.publish(&wf.id, &graph).unwrap();

            let dispatchers = Dispatchers {
                email: EmailDispatcher::new(Some(mailer.clone())),
                slack: SlackDispatcher::new(Some(poster.clone())),
                webhook: WebhookDispatcher::new(http.clone()),
            };
            let config = SchedulerConfig {
                backoff_base_ms: 1_000,
                backoff_max_ms: 60_000,
                ..Default::default()
            };
            let executor = Executor::new(store.clone(), GraphCache::new(store.clone(), 8), dispatchers, Arc::new(Channel::new()), clock.clone(), config);

            Self {
                store,
                clock,
                poster,
                mailer,
                http,
                executor,
                wid: wf.id,
            }
        }

        fn start(
            &self,
            id: &str,
            ctx: serde_json::Value,
        ) -> String {
            let run = Run::pending(id, &self.wid, 1, "manual", "", ctx.to_string(), self.clock.now_millis());
            assert!(self.store.runs().create(&run).unwrap());
            id.to_string()
        }

        fn run(
            &self,
            id: &str,
        ) -> Run {
            self.store.runs().find(id).unwrap()
        }

        fn steps(
            &self,
            id: &str,
        ) -> Vec<(String, StepOutcome)> {
            self.store.steps_of(id).unwrap().into_iter().map(|s| (s.node_id, s.outcome)).collect()
        }
    }

    fn trigger() -> NodeModel {
        NodeModel::new("t", "trigger", json!({"type": "manual"}))
    }

    fn slack(
        id: &str,
        channel: &str,
    ) -> NodeModel {
        NodeModel::new(id, "slack", json!({"channel": channel, "message": "Task {{task.title}} needs attention"}))
    }

    fn ok(s: &str) -> (String, StepOutcome) {
        (s.to_string(), StepOutcome::Success)
    }

    #[tokio::test]
    async fn test_linear_run_completes() {
        let h = Harness::new(GraphModel::default().node(trigger()).node(slack("s", "#ops")).edge(EdgeModel::new("e1", "t", "s")));
        let id = h.start("r1", json!({"task": {"title": "Call back"}}));

        assert_eq!(h.executor.drive(&id, "w1").await.unwrap(), Some(RunStatus::Completed));
        let run = h.run(&id);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.ended_at, T0);
        assert!(run.claimed_by.is_empty());
        assert_eq!(h.steps(&id), vec![ok("t"), ok("s")]);
        assert_eq!(h.poster.posts(), vec![("#ops".to_string(), "Task Call back needs attention".to_string())]);

        // terminal runs are never claimed again
        assert_eq!(h.executor.drive(&id, "w2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_condition_routes_task_created_to_slack() {
        let graph = GraphModel::default()
            .node(NodeModel::new("t", "trigger", json!({"type": "event", "event_type": "task_created"})))
            .node(NodeModel::new("c", "condition", json!({"field": "task.priority", "operator": "equals", "value": "high"})))
            .node(slack("urgent", "#urgent"))
            .node(slack("backlog", "#backlog"))
            .edge(EdgeModel::new("e1", "t", "c"))
            .edge(EdgeModel::labeled("e2", "c", "urgent", "true"))
            .edge(EdgeModel::labeled("e3", "c", "backlog", "false"));
        let h = Harness::new(graph);
        let id = h.start("r1", json!({"task": {"priority": "high"}}));

        assert_eq!(h.executor.drive(&id, "w1").await.unwrap(), Some(RunStatus::Completed));
        let slack_steps = h.steps(&id).into_iter().filter(|(node, _)| node == "urgent" || node == "backlog").collect::<Vec<_>>();
        assert_eq!(slack_steps, vec![ok("urgent")]);
        assert_eq!(h.poster.posts().len(), 1);
        assert_eq!(h.poster.posts()[0].0, "#urgent");
        // the placeholder had no value
        assert_eq!(h.store.steps_of(&id).unwrap()[2].warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_condition_type_mismatch_takes_false_branch() {
        let graph = GraphModel::default()
            .node(trigger())
            .node(NodeModel::new("c", "condition", json!({"field": "deal.amount", "operator": "greater_than", "value": 100})))
            .node(slack("big", "#big"))
            .node(slack("small", "#small"))
            .edge(EdgeModel::new("e1", "t", "c"))
            .edge(EdgeModel::labeled("e2", "c", "big", "true"))
            .edge(EdgeModel::labeled("e3", "c", "small", "false"));
        let h = Harness::new(graph);
        let id = h.start("r1", json!({"deal": {"amount": "lots"}}));

        assert_eq!(h.executor.drive(&id, "w1").await.unwrap(), Some(RunStatus::Completed));
        let steps = h.store.steps_of(&id).unwrap();
        assert_eq!(steps[1].node_id, "c");
        assert!(steps[1].detail.ends_with("-> false"));
        assert_eq!(steps[1].warnings.len(), 1);
        assert_eq!(h.poster.posts()[0].0, "#small");
    }

    #[tokio::test]
    async fn test_delay_suspends_and_resumes_without_duplicates() {
        let graph = GraphModel::default()
            .node(trigger())
            .node(slack("s", "#ops"))
            .node(NodeModel::new("d", "delay", json!({"duration": 1, "unit": "days"})))
            .node(NodeModel::new("m", "email", json!({"to": "{{client.email}}", "subject": "Checking in", "body": "Hi"})))
            .edge(EdgeModel::new("e1", "t", "s"))
            .edge(EdgeModel::new("e2", "s", "d"))
            .edge(EdgeModel::new("e3", "d", "m"));
        let h = Harness::new(graph);
        let id = h.start("r1", json!({"client": {"email": "ann@example.com"}}));

        assert_eq!(h.executor.drive(&id, "w1").await.unwrap(), Some(RunStatus::Waiting));
        let run = h.run(&id);
        assert_eq!(run.status, RunStatus::Waiting);
        assert_eq!(run.resumes_at, T0 + DAY);
        assert_eq!(run.current_node_id, "d");
        assert!(run.claimed_by.is_empty());

        // not due yet
        h.clock.advance(DAY - 1);
        assert_eq!(h.executor.drive(&id, "w1").await.unwrap(), None);
        assert!(h.store.due_runs(h.clock.now_millis(), 10).unwrap().is_empty());

        h.clock.set(T0 + 25 * 3_600_000);
        assert_eq!(h.store.due_runs(h.clock.now_millis(), 10).unwrap().len(), 1);
        assert_eq!(h.executor.drive(&id, "w2").await.unwrap(), Some(RunStatus::Completed));

        assert_eq!(h.steps(&id), vec![ok("t"), ok("s"), ok("d"), ok("m")]);
        assert_eq!(h.poster.posts().len(), 1);
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_retries_then_fails_with_last_status() {
        let graph = GraphModel::default()
            .node(trigger())
            .node(NodeModel::new("w", "webhook", json!({"url": "https://crm.example.com/hook", "method": "POST", "body": "{\"a\": 1}"})))
            .edge(EdgeModel::new("e1", "t", "w"));
        let h = Harness::new(graph);
        let id = h.start("r1", json!({}));

        let mut delays = Vec::new();
        for _ in 0..4 {
            assert_eq!(h.executor.drive(&id, "w1").await.unwrap(), Some(RunStatus::Running));
            let run = h.run(&id);
            assert!(run.claimed_by.is_empty());
            delays.push(run.resumes_at - h.clock.now_millis());
            // not yet due
            assert_eq!(h.executor.drive(&id, "w1").await.unwrap(), None);
            h.clock.set(run.resumes_at);
        }
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000]);

        assert_eq!(h.executor.drive(&id, "w1").await.unwrap(), Some(RunStatus::Failed));
        let run = h.run(&id);
        let error = run.error.unwrap();
        assert!(error.contains("giving up after 5 attempts"), "{error}");
        assert!(error.contains("HTTP 500"), "{error}");
        assert_eq!(h.http.calls().len(), 5);

        let steps = h.store.steps_of(&id).unwrap();
        assert_eq!(steps.len(), 6);
        assert_eq!(steps.iter().filter(|s| s.outcome == StepOutcome::Failure).map(|s| s.attempt).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_terminal_dispatch_failure_fails_run() {
        let poster = Arc::new(RecordingPoster::failing(DeliveryError::Status {
            code: 404,
            message: "channel_not_found".into(),
        }));
        let graph = GraphModel::default().node(trigger()).node(slack("s", "#gone")).edge(EdgeModel::new("e1", "t", "s"));
        let h = Harness::with_poster(graph, poster);
        let id = h.start("r1", json!({}));

        assert_eq!(h.executor.drive(&id, "w1").await.unwrap(), Some(RunStatus::Failed));
        let run = h.run(&id);
        assert!(run.error.unwrap().contains("channel_not_found"));
        assert_eq!(h.steps(&id), vec![ok("t"), ("s".to_string(), StepOutcome::Failure)]);
    }

    #[tokio::test]
    async fn test_racing_claims_have_one_winner() {
        let h = Harness::new(GraphModel::default().node(trigger()).node(slack("s", "#ops")).edge(EdgeModel::new("e1", "t", "s")));
        let id = h.start("r1", json!({}));

        let first = h.run(&id);
        let second = first.clone();
        assert!(h.executor.try_claim(first, "w1").unwrap().is_some());
        assert!(h.executor.try_claim(second, "w2").unwrap().is_none());
        // a fresh look sees the live lease
        assert!(h.executor.claim(&id, "w2").unwrap().is_none());
        assert!(h.steps(&id).is_empty());

        let (a, b) = tokio::join!(h.executor.drive(&id, "w1"), h.executor.drive(&id, "w2"));
        assert_eq!(a.unwrap(), Some(RunStatus::Completed));
        assert_eq!(b.unwrap(), None);
        assert_eq!(h.steps(&id), vec![ok("t"), ok("s")]);
    }

    /// Graph collection whose first lookups fail like a dropped connection.
    struct FlakyGraphs {
        inner: Arc<dyn DbCollection<Item = data::Graph>>,
        failures: AtomicUsize,
    }

    impl DbCollection for FlakyGraphs {
        type Item = data::Graph;

        fn exists(
            &self,
            id: &str,
        ) -> Result<bool> {
            self.inner.exists(id)
        }

        fn find(
            &self,
            id: &str,
        ) -> Result<data::Graph> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                return Err(FlowError::Store("connection reset".to_string()));
            }
            self.inner.find(id)
        }

        fn query(
            &self,
            query: &Query,
        ) -> Result<PageData<data::Graph>> {
            self.inner.query(query)
        }

        fn create(
            &self,
            data: &data::Graph,
        ) -> Result<bool> {
            self.inner.create(data)
        }

        fn update(
            &self,
            data: &data::Graph,
        ) -> Result<bool> {
            self.inner.update(data)
        }

        fn update_if(
            &self,
            data: &data::Graph,
            field: &str,
            cond: &Cond,
        ) -> Result<bool> {
            self.inner.update_if(data, field, cond)
        }

        fn delete(
            &self,
            id: &str,
        ) -> Result<bool> {
            self.inner.delete(id)
        }
    }

    #[tokio::test]
    async fn test_store_outage_keeps_run_claimable() {
        let h = Harness::new(GraphModel::default().node(trigger()).node(slack("s", "#ops")).edge(EdgeModel::new("e1", "t", "s")));
        h.store.register(Arc::new(FlakyGraphs {
            inner: h.store.graphs(),
            failures: AtomicUsize::new(1),
        }));
        let id = h.start("r1", json!({}));

        assert!(matches!(h.executor.drive(&id, "w1").await, Err(FlowError::Store(_))));
        let run = h.run(&id);
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.error, None);
        assert!(h.steps(&id).is_empty());

        // held by w1 until its lease expires
        assert_eq!(h.executor.drive(&id, "w2").await.unwrap(), None);
        h.clock.advance(SchedulerConfig::default().lease_ms as i64 + 1);
        assert_eq!(h.executor.drive(&id, "w2").await.unwrap(), Some(RunStatus::Completed));
        assert_eq!(h.steps(&id), vec![ok("t"), ok("s")]);
        assert_eq!(h.poster.posts().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_lease_recovers_crashed_run() {
        let graph = GraphModel::default()
            .node(trigger())
            .node(slack("s", "#ops"))
            .node(NodeModel::new("m", "email", json!({"to": "ops@example.com", "subject": "s", "body": "b"})))
            .edge(EdgeModel::new("e1", "t", "s"))
            .edge(EdgeModel::new("e2", "s", "m"));
        let h = Harness::new(graph);
        let id = h.start("r1", json!({}));

        // a worker crashed right after recording the slack step
        let mut run = h.executor.claim(&id, "dead").unwrap().unwrap();
        for (seq, node) in ["t", "s"].iter().enumerate() {
            let step = Step {
                id: Step::key(&id, seq as i32),
                run_id: id.clone(),
                seq: seq as i32,
                node_id: node.to_string(),
                attempt: 1,
                ..Default::default()
            };
            h.store.steps().create(&step).unwrap();
        }
        run.current_node_id = "s".into();
        run.revision += 1;
        assert!(h.store.save_run(&run).unwrap());

        assert_eq!(h.executor.drive(&id, "w2").await.unwrap(), None);
        h.clock.advance(SchedulerConfig::default().lease_ms as i64 + 1);
        assert_eq!(h.executor.drive(&id, "w2").await.unwrap(), Some(RunStatus::Completed));

        assert_eq!(h.steps(&id), vec![ok("t"), ok("s"), ok("m")]);
        assert!(h.poster.posts().is_empty());
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_waiting_run() {
        let graph = GraphModel::default()
            .node(trigger())
            .node(NodeModel::new("d", "delay", json!({"duration": 2, "unit": "weeks"})))
            .node(slack("s", "#ops"))
            .edge(EdgeModel::new("e1", "t", "d"))
            .edge(EdgeModel::new("e2", "d", "s"));
        let h = Harness::new(graph);
        let id = h.start("r1", json!({}));
        assert_eq!(h.executor.drive(&id, "w1").await.unwrap(), Some(RunStatus::Waiting));

        let run = h.executor.cancel(&id).unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(matches!(h.executor.cancel(&id), Err(FlowError::Conflict(_))));

        h.clock.advance(30 * DAY);
        assert_eq!(h.executor.drive(&id, "w1").await.unwrap(), None);
        assert!(h.poster.posts().is_empty());
    }

    /// Poster that cancels the run while its message is in flight.
    struct CancellingPoster {
        inner: Arc<RecordingPoster>,
        store: Arc<Store>,
        run_id: String,
    }

    #[async_trait]
    impl ChatPoster for CancellingPoster {
        async fn post(
            &self,
            channel: &str,
            message: &str,
        ) -> std::result::Result<(), DeliveryError> {
            let mut run = self.store.runs().find(&self.run_id).unwrap();
            run.status = RunStatus::Cancelled;
            run.revision += 1;
            assert!(self.store.save_run(&run).unwrap());
            self.inner.post(channel, message).await
        }
    }

    #[tokio::test]
    async fn test_cancellation_observed_before_next_node() {
        let graph = GraphModel::default()
            .node(trigger())
            .node(slack("s", "#ops"))
            .node(NodeModel::new("m", "email", json!({"to": "ops@example.com", "subject": "s", "body": "b"})))
            .edge(EdgeModel::new("e1", "t", "s"))
            .edge(EdgeModel::new("e2", "s", "m"));
        let h = Harness::new(graph);
        let cancelling = Arc::new(CancellingPoster {
            inner: h.poster.clone(),
            store: h.store.clone(),
            run_id: "r1".into(),
        });
        let executor = Executor::new(
            h.store.clone(),
            GraphCache::new(h.store.clone(), 8),
            Dispatchers {
                email: EmailDispatcher::new(Some(h.mailer.clone())),
                slack: SlackDispatcher::new(Some(cancelling)),
                webhook: WebhookDispatcher::new(h.http.clone()),
            },
            Arc::new(Channel::new()),
            h.clock.clone(),
            SchedulerConfig::default(),
        );
        let id = h.start("r1", json!({}));

        assert_eq!(executor.drive(&id, "w1").await.unwrap(), Some(RunStatus::Cancelled));
        // the in-flight post finished, the email never went out
        assert_eq!(h.poster.posts().len(), 1);
        assert!(h.mailer.sent().is_empty());
        assert_eq!(h.steps(&id), vec![ok("t"), ok("s"), ("m".to_string(), StepOutcome::Skipped)]);
        assert_eq!(h.run(&id).status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_unknown_graph_version_fails_run() {
        let h = Harness::new(GraphModel::default().node(trigger()));
        let run = Run::pending("r1", &h.wid, 9, "manual", "", "{}".into(), T0);
        h.store.runs().create(&run).unwrap();

        assert_eq!(h.executor.drive("r1", "w1").await.unwrap(), Some(RunStatus::Failed));
        assert!(h.run("r1").error.unwrap().contains("cannot load graph"));
    }
}
