use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeModel {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub kind: String,
    /// per-node override of `ExecutionConfig::default_retries`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// per-node override of `ExecutionConfig::default_node_timeout_ms`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// context key the node's output is written to, defaults to the node id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl NodeModel {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            config,
            ..Default::default()
        }
    }
}
