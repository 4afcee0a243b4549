use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::store::{DbCollectionIden, StoreIden};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepOutcome {
    #[default]
    Success,
    Failure,
    Skipped,
}

/// Append-only audit entry for one node visit.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Step {
    /// `{run_id}:{seq}`
    pub id: String,
    pub run_id: String,
    /// position within the run, starting at 0
    pub seq: i32,
    pub node_id: String,
    pub attempt: i32,
    pub outcome: StepOutcome,
    pub detail: String,
    pub warnings: Vec<String>,
    pub started_at: i64,
    pub finished_at: i64,
}

impl Step {
    pub fn key(
        run_id: &str,
        seq: i32,
    ) -> String {
        format!("{run_id}:{seq}")
    }
}

impl DbCollectionIden for Step {
    fn iden() -> StoreIden {
        StoreIden::Steps
    }
}
