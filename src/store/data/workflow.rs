use serde::{Deserialize, Serialize};

use crate::store::{DbCollectionIden, StoreIden};

/// One deployed version of a workflow definition.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Workflow {
    /// `{wid}@{version}`
    pub id: String,
    pub wid: String,
    pub version: u32,
    pub name: String,
    /// serialized `WorkflowModel`
    pub data: String,
    pub create_time: i64,
}

impl Workflow {
    pub fn key(
        wid: &str,
        version: u32,
    ) -> String {
        format!("{}@{}", wid, version)
    }
}

impl DbCollectionIden for Workflow {
    fn iden() -> StoreIden {
        StoreIden::Workflows
    }
}
