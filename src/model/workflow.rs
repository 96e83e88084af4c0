use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    AutoflowError, Result,
    model::{EdgeModel, NodeModel},
};

/// Wire representation of a workflow definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    /// assigned by the store on deploy
    #[serde(default)]
    pub version: u32,
    /// initial context values for every run
    #[serde(default)]
    pub env: HashMap<String, serde_json::Value>,
    pub nodes: Vec<NodeModel>,
    #[serde(default)]
    pub edges: Vec<EdgeModel>,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Workflow-wide execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub global_timeout_ms: u64,
    pub default_retries: u32,
    pub default_node_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            global_timeout_ms: 30 * 60 * 1000,
            default_retries: 0,
            default_node_timeout_ms: 30 * 1000,
        }
    }
}

impl WorkflowModel {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str::<WorkflowModel>(s).map_err(|e| AutoflowError::Workflow(format!("{}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
