use serde::{Deserialize, Serialize};

use crate::store::{DbCollectionIden, StoreIden};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub description: String,
    /// current published version, 0 until the first publish
    pub graph_version: i32,
    pub is_active: bool,
    pub is_template: bool,
    /// serialized draft `GraphModel`, never read by running runs
    pub draft: String,
    pub deleted: bool,
    /// optimistic concurrency counter, bumped on every write
    pub revision: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Workflow {
    pub fn is_published(&self) -> bool {
        self.graph_version > 0
    }
}

impl DbCollectionIden for Workflow {
    fn iden() -> StoreIden {
        StoreIden::Workflows
    }
}
