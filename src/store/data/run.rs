use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::store::{DbCollectionIden, StoreIden};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, AsRefStr, Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }

    /// States a run can still make progress from.
    pub fn active() -> [RunStatus; 3] {
        [RunStatus::Pending, RunStatus::Running, RunStatus::Waiting]
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Run {
    pub id: String,
    pub wid: String,
    pub graph_version: i32,
    pub status: RunStatus,
    /// `client`, `manual` or the event type that started the run
    pub trigger: String,
    pub entity_id: String,
    /// context snapshot taken at trigger time, JSON object
    pub context: String,
    /// node to visit next, empty before the entry node
    pub current_node_id: String,
    /// attempt count of the current node
    pub attempt: i32,
    /// earliest time a worker may pick the run up, 0 when due now
    pub resumes_at: i64,
    pub claimed_by: String,
    pub claimed_until: i64,
    /// compare-and-swap counter, every write bumps it
    pub revision: i64,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub ended_at: i64,
}

impl Run {
    /// A fresh run positioned before the entry node.
    pub fn pending(
        id: &str,
        wid: &str,
        graph_version: i32,
        trigger: &str,
        entity_id: &str,
        context: String,
        now: i64,
    ) -> Self {
        Self {
            id: id.to_string(),
            wid: wid.to_string(),
            graph_version,
            trigger: trigger.to_string(),
            entity_id: entity_id.to_string(),
            context,
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    /// Whether another worker holds a lease at `now`.
    pub fn is_claimed(
        &self,
        worker: &str,
        now: i64,
    ) -> bool {
        !self.claimed_by.is_empty() && self.claimed_by != worker && self.claimed_until > now
    }

    pub fn release(&mut self) {
        self.claimed_by.clear();
        self.claimed_until = 0;
    }
}

impl DbCollectionIden for Run {
    fn iden() -> StoreIden {
        StoreIden::Runs
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_status_text_form() {
        assert_eq!(RunStatus::Waiting.as_ref(), "waiting");
        assert_eq!(RunStatus::from_str("cancelled").unwrap(), RunStatus::Cancelled);
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Waiting.is_terminal());
    }

    #[test]
    fn test_lease() {
        let mut run = Run {
            claimed_by: "w1".into(),
            claimed_until: 100,
            ..Default::default()
        };
        assert!(run.is_claimed("w2", 50));
        assert!(!run.is_claimed("w1", 50));
        assert!(!run.is_claimed("w2", 100));
        run.release();
        assert!(!run.is_claimed("w2", 0));
    }
}
