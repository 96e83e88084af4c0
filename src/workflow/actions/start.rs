use async_trait::async_trait;
use serde_json::json;

use crate::{
    Result,
    runtime::{ExecutionContext, RunScope},
    workflow::node::NodeId,
};

use super::{Action, ActionOutput, NodeConfig, NodeKind};

pub(super) fn schema() -> serde_json::Value {
    json!({ "type": "object" })
}

/// Entry marker; does nothing.
#[derive(Debug, Clone)]
pub struct StartAction;

#[async_trait]
impl Action for StartAction {
    fn kind(&self) -> NodeKind {
        NodeKind::Start
    }

    async fn run(
        &self,
        _: &NodeId,
        _: &NodeConfig,
        _: &mut ExecutionContext,
        _: &RunScope,
    ) -> Result<ActionOutput> {
        Ok(ActionOutput::empty())
    }
}
