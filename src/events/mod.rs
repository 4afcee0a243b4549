//! Event types for run execution.
//!
//! Events are emitted while runs progress to notify subscribers about
//! state changes, step records, completions and failures.

mod run;

pub use run::RunEvent;

use crate::workflow::node::NodeId;

/// Event message carrying run and node context.
#[derive(Debug, Clone)]
pub struct Event {
    /// Run that generated this event.
    pub run_id: String,
    /// Workflow the run belongs to.
    pub wid: String,
    /// Node being visited, empty for run-level events.
    pub node_id: NodeId,
    /// The actual event data.
    pub event: RunEvent,
    /// Milliseconds since epoch.
    pub timestamp: i64,
}

impl Event {
    pub fn new(
        run_id: &str,
        wid: &str,
        node_id: &str,
        event: RunEvent,
        timestamp: i64,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            wid: wid.to_string(),
            node_id: node_id.to_string(),
            event,
            timestamp,
        }
    }
}
