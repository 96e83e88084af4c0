use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    Result,
    runtime::{ExecutionContext, RunScope},
    workflow::node::NodeId,
};

use super::{Action, ActionOutput, NodeConfig, NodeKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DelayConfig {
    #[serde(default)]
    pub ms: u64,
}

impl DelayConfig {
    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "ms": { "type": "integer", "minimum": 0 }
            }
        })
    }
}

/// Sleeps for the configured duration; subject to the node timeout like any other body.
#[derive(Debug, Clone)]
pub struct DelayAction;

#[async_trait]
impl Action for DelayAction {
    fn kind(&self) -> NodeKind {
        NodeKind::Delay
    }

    async fn run(
        &self,
        _: &NodeId,
        config: &NodeConfig,
        _: &mut ExecutionContext,
        _: &RunScope,
    ) -> Result<ActionOutput> {
        let NodeConfig::Delay(config) = config else {
            return Err(config.mismatch(NodeKind::Delay));
        };
        tokio::time::sleep(Duration::from_millis(config.ms)).await;
        Ok(ActionOutput::empty())
    }
}
