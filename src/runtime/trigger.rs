//! Maps incoming CRM events onto runs of the workflows they trigger.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    Result,
    common::Vars,
    events::{Event, RunEvent},
    runtime::{Channel, executor::GraphCache},
    store::{
        Store,
        data::{Run, RunStatus, Workflow},
    },
    utils::time::Clock,
    workflow::{
        consts::{CLIENT_CREATED, CLIENT_TRIGGER, EVENT_TYPES},
        node::{TriggerConfig, TriggerType},
    },
};

/// Whether a workflow's trigger subscribes to `event_type`.
pub fn matches(
    trigger: &TriggerConfig,
    event_type: &str,
) -> bool {
    match trigger.trigger_type {
        TriggerType::Client => event_type == CLIENT_CREATED,
        TriggerType::Event => trigger.event_type.as_deref() == Some(event_type),
        TriggerType::Manual => false,
    }
}

/// Deterministic run id for one event occurrence and one workflow.
///
/// A client trigger keys on the client record alone, so it fires once per
/// client per workflow whatever the payload. Other events key on the
/// producer's occurrence id when there is one, else on the payload.
pub fn run_id(
    wid: &str,
    event_type: &str,
    entity_id: &str,
    occurrence_id: Option<&str>,
    payload: &Value,
) -> String {
    let name = match occurrence_id {
        _ if event_type == CLIENT_CREATED => format!("{}\n{}\n{}", wid, CLIENT_TRIGGER, entity_id),
        Some(occurrence) => format!("{}\n{}\n{}\n#{}", wid, event_type, entity_id, occurrence),
        None => format!("{}\n{}\n{}\n{}", wid, event_type, entity_id, payload),
    };
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

pub struct TriggerRouter {
    store: Arc<Store>,
    graphs: GraphCache,
    channel: Arc<Channel>,
    clock: Arc<dyn Clock>,
}

impl TriggerRouter {
    pub fn new(
        store: Arc<Store>,
        graphs: GraphCache,
        channel: Arc<Channel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            graphs,
            channel,
            clock,
        }
    }

    /// Creates one pending run per active workflow whose trigger matches.
    ///
    /// # Returns
    ///
    /// Ids of the runs created by this call. Redelivery of an occurrence
    /// that already produced runs returns an empty list.
    pub fn on_event(
        &self,
        event_type: &str,
        entity_id: &str,
        occurrence_id: Option<&str>,
        payload: &Value,
    ) -> Result<Vec<String>> {
        if event_type != CLIENT_CREATED && !EVENT_TYPES.contains(&event_type) {
            debug!(event_type, entity_id, "ignoring unsupported event type");
            return Ok(Vec::new());
        }

        let mut created = Vec::new();
        for workflow in self.store.triggerable_workflows()? {
            match self.fire(&workflow, event_type, entity_id, occurrence_id, payload) {
                Ok(Some(run_id)) => created.push(run_id),
                Ok(None) => {}
                // one broken workflow must not starve the others
                Err(err) => error!(wid = %workflow.id, event_type, entity_id, "failed to trigger workflow: {}", err),
            }
        }
        Ok(created)
    }

    fn fire(
        &self,
        workflow: &Workflow,
        event_type: &str,
        entity_id: &str,
        occurrence_id: Option<&str>,
        payload: &Value,
    ) -> Result<Option<String>> {
        let graph = self.graphs.get(&workflow.id, workflow.graph_version)?;
        if !matches(graph.trigger()?, event_type) {
            return Ok(None);
        }

        let id = run_id(&workflow.id, event_type, entity_id, occurrence_id, payload);
        let trigger = if event_type == CLIENT_CREATED { CLIENT_TRIGGER } else { event_type };
        let context = Vars::from(payload.clone()).to_json_string();
        let run = Run::pending(&id, &workflow.id, workflow.graph_version, trigger, entity_id, context, self.clock.now_millis());
        if !self.store.runs().create(&run)? {
            debug!(run_id = %id, wid = %workflow.id, "event occurrence already produced a run");
            return Ok(None);
        }

        // the workflow list may be stale by now
        let current = self.store.workflows().find(&workflow.id)?;
        if current.deleted || !current.is_active {
            let mut cancelled = run;
            cancelled.status = RunStatus::Cancelled;
            cancelled.ended_at = self.clock.now_millis();
            cancelled.revision += 1;
            self.store.save_run(&cancelled)?;
            info!(run_id = %id, wid = %workflow.id, "workflow went away while triggering, run cancelled");
            return Ok(None);
        }

        info!(run_id = %id, wid = %workflow.id, event_type, entity_id, "run created");
        self.channel.emit(Event::new(
            &id,
            &workflow.id,
            "",
            RunEvent::Created {
                trigger: trigger.to_string(),
            },
            run.created_at,
        ));
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        model::{EdgeModel, GraphModel, NodeModel, WorkflowModel},
        store::{DbStore, MemStore},
        utils::time::ManualClock,
    };

    fn router() -> (TriggerRouter, Arc<Store>) {
        let store = Arc::new(Store::new());
        MemStore::new().init(&store).unwrap();
        let router = TriggerRouter::new(store.clone(), GraphCache::new(store.clone(), 8), Arc::new(Channel::new()), Arc::new(ManualClock::new(1_000)));
        (router, store)
    }

    fn workflow(
        store: &Store,
        trigger: Value,
        active: bool,
        template: bool,
    ) -> String {
        let wf = store
            .create_workflow(&WorkflowModel {
                name: "wf".into(),
                is_active: active,
                is_template: template,
                ..Default::default()
            })
            .unwrap();
        let graph = GraphModel::default()
            .node(NodeModel::new("t", "trigger", trigger))
            .node(NodeModel::new("s", "slack", json!({"channel": "#a", "message": "m"})))
            .edge(EdgeModel::new("e1", "t", "s"));
        store.publish(&wf.id, &graph).unwrap();
        wf.id
    }

    #[test]
    fn test_event_starts_one_run_per_matching_workflow() {
        let (router, store) = router();
        let a = workflow(&store, json!({"type": "event", "event_type": "task_created"}), true, false);
        let b = workflow(&store, json!({"type": "event", "eventType": "task_created"}), true, false);
        workflow(&store, json!({"type": "event", "event_type": "note_created"}), true, false);
        workflow(&store, json!({"type": "event", "event_type": "task_created"}), false, false);
        workflow(&store, json!({"type": "event", "event_type": "task_created"}), true, true);
        workflow(&store, json!({"type": "manual"}), true, false);

        let payload = json!({"task": {"id": "t-1", "priority": "high"}});
        let ids = router.on_event("task_created", "t-1", None, &payload).unwrap();
        assert_eq!(ids.len(), 2);

        let mut wids = ids.iter().map(|id| store.runs().find(id).unwrap().wid).collect::<Vec<_>>();
        wids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(wids, expected);

        let run = store.runs().find(&ids[0]).unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.trigger, "task_created");
        assert_eq!(run.entity_id, "t-1");
        assert_eq!(run.graph_version, 1);
        assert_eq!(Vars::from_json_str(&run.context).unwrap().lookup("task.priority"), Some(&json!("high")));
    }

    #[test]
    fn test_redelivery_creates_no_second_run() {
        let (router, store) = router();
        let wid = workflow(&store, json!({"type": "event", "event_type": "note_updated"}), true, false);
        let payload = json!({"note": {"id": "n-1", "body": "v2"}});

        assert_eq!(router.on_event("note_updated", "n-1", None, &payload).unwrap().len(), 1);
        assert!(router.on_event("note_updated", "n-1", None, &payload).unwrap().is_empty());
        // a later update of the same note is a new occurrence
        assert_eq!(router.on_event("note_updated", "n-1", None, &json!({"note": {"id": "n-1", "body": "v3"}})).unwrap().len(), 1);
        assert_eq!(store.runs_of(&wid).unwrap().len(), 2);
    }

    #[test]
    fn test_client_trigger_fires_once_per_client() {
        let (router, store) = router();
        let wid = workflow(&store, json!({"type": "client"}), true, false);

        let ids = router.on_event(CLIENT_CREATED, "c-9", None, &json!({"client": {"id": "c-9", "email": "a@b.c"}})).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.runs().find(&ids[0]).unwrap().trigger, CLIENT_TRIGGER);
        assert!(router.on_event(CLIENT_CREATED, "c-9", None, &json!({"client": {"id": "c-9", "email": "new@b.c"}})).unwrap().is_empty());
        assert_eq!(router.on_event(CLIENT_CREATED, "c-10", None, &json!({})).unwrap().len(), 1);
        assert_eq!(store.runs_of(&wid).unwrap().len(), 2);

        assert!(router.on_event("task_created", "c-11", None, &json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_event_and_unpublished_workflow_are_ignored() {
        let (router, store) = router();
        store
            .create_workflow(&WorkflowModel {
                name: "draft".into(),
                is_active: true,
                ..Default::default()
            })
            .unwrap();
        assert!(router.on_event("deal_won", "d-1", None, &json!({})).unwrap().is_empty());
        assert!(router.on_event("task_created", "t-1", None, &json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_run_id_is_stable() {
        let p = json!({"a": 1});
        assert_eq!(run_id("w", "task_created", "x", None, &p), run_id("w", "task_created", "x", None, &p));
        assert_ne!(run_id("w", "task_created", "x", None, &p), run_id("w2", "task_created", "x", None, &p));
        assert_eq!(run_id("w", CLIENT_CREATED, "c", None, &p), run_id("w", CLIENT_CREATED, "c", None, &json!({})));
    }

    #[test]
    fn test_occurrence_id_separates_identical_payloads() {
        let (router, store) = router();
        let wid = workflow(&store, json!({"type": "event", "event_type": "task_updated"}), true, false);
        let payload = json!({"task": {"id": "t-1", "status": "open"}});

        assert_eq!(router.on_event("task_updated", "t-1", Some("evt-1"), &payload).unwrap().len(), 1);
        assert_eq!(router.on_event("task_updated", "t-1", Some("evt-2"), &payload).unwrap().len(), 1);
        assert!(router.on_event("task_updated", "t-1", Some("evt-2"), &payload).unwrap().is_empty());
        assert_eq!(store.runs_of(&wid).unwrap().len(), 2);

        assert_ne!(run_id("w", "task_updated", "t-1", Some("evt-1"), &payload), run_id("w", "task_updated", "t-1", None, &payload));
        assert_eq!(run_id("w", CLIENT_CREATED, "c", Some("a"), &payload), run_id("w", CLIENT_CREATED, "c", Some("b"), &payload));
    }

    #[test]
    fn test_stale_listing_after_delete_starts_nothing() {
        let (router, store) = router();
        let wid = workflow(&store, json!({"type": "event", "event_type": "note_created"}), true, false);
        let listed = store.triggerable_workflows().unwrap();
        assert_eq!(listed.len(), 1);

        store.delete_workflow(&wid).unwrap();
        let payload = json!({"note": {"id": "n-1"}});
        assert_eq!(router.fire(&listed[0], "note_created", "n-1", None, &payload).unwrap(), None);

        let runs = store.runs_of(&wid).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Cancelled);
        assert!(!store.has_active_runs(&wid).unwrap());
    }
}
