use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    AutoflowError, Result,
    common::Vars,
    runtime::{ExecutionContext, RunScope},
    workflow::node::NodeId,
};

use super::{Action, ActionOutput, NodeConfig, NodeKind};

/// Writes literal (already interpolated) values into the run context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub assign: Map<String, Value>,
    /// Rejects the attempt when this key was already claimed by the node in this run.
    #[serde(default)]
    pub unique_key: Option<String>,
}

impl TransformConfig {
    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "assign": { "type": "object" },
                "unique_key": { "type": ["string", "null"] }
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct TransformAction;

#[async_trait]
impl Action for TransformAction {
    fn kind(&self) -> NodeKind {
        NodeKind::Transform
    }

    async fn run(
        &self,
        nid: &NodeId,
        config: &NodeConfig,
        ctx: &mut ExecutionContext,
        _: &RunScope,
    ) -> Result<ActionOutput> {
        let NodeConfig::Transform(config) = config else {
            return Err(config.mismatch(NodeKind::Transform));
        };

        if let Some(key) = config.unique_key.as_deref().filter(|k| !k.is_empty()) {
            if !ctx.claim_unique(nid, key) {
                return Err(AutoflowError::Action(format!("uniqueness constraint violated for key '{}'", key)));
            }
        }

        let assigned = Value::Object(config.assign.clone());
        ctx.merge(Vars::from(assigned.clone()));
        Ok(ActionOutput::value(assigned))
    }
}
