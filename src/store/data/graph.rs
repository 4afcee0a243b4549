use serde::{Deserialize, Serialize};

use crate::store::{DbCollectionIden, StoreIden};

/// One published, immutable graph version of a workflow.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Graph {
    /// `{wid}@{version}`
    pub id: String,
    pub wid: String,
    pub version: i32,
    /// serialized `GraphModel`
    pub data: String,
    pub created_at: i64,
}

impl Graph {
    pub fn key(
        wid: &str,
        version: i32,
    ) -> String {
        format!("{wid}@{version}")
    }
}

impl DbCollectionIden for Graph {
    fn iden() -> StoreIden {
        StoreIden::Graphs
    }
}
