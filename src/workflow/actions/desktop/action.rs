use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    AutoflowError, Result,
    runtime::{ExecutionContext, RunScope},
    workflow::{
        actions::{Action, ActionOutput, NodeConfig, NodeKind},
        node::NodeId,
    },
};

use super::agent::DesktopAgent;

/// Executes `desktop` nodes through a desktop agent.
#[derive(Debug, Clone, Default)]
pub struct DesktopAction {
    agent: Option<DesktopAgent>,
}

impl DesktopAction {
    pub fn new(agent: Option<DesktopAgent>) -> Self {
        Self {
            agent,
        }
    }

    fn agent(&self) -> Result<&DesktopAgent> {
        self.agent.as_ref().ok_or_else(|| AutoflowError::Action("no desktop agent configured".to_string()))
    }
}

#[async_trait]
impl Action for DesktopAction {
    fn kind(&self) -> NodeKind {
        NodeKind::Desktop
    }

    async fn run(
        &self,
        nid: &NodeId,
        config: &NodeConfig,
        _ctx: &mut ExecutionContext,
        scope: &RunScope,
    ) -> Result<ActionOutput> {
        let NodeConfig::Desktop(config) = config else {
            return Err(config.mismatch(NodeKind::Desktop));
        };

        if scope.test_mode {
            debug!(run_id = %scope.run_id, node_id = %nid, "{} simulated", config.agent_type());
            return Ok(ActionOutput::value(json!({"ok": true, "simulated": true, "type": config.agent_type()})));
        }

        Ok(ActionOutput::value(self.agent()?.run(config).await?))
    }

    /// The agent's preflight report, which tells a missing display apart from
    /// a failed match.
    async fn capture_evidence(
        &self,
        _nid: &NodeId,
        _config: &NodeConfig,
        scope: &RunScope,
        _error: &AutoflowError,
    ) -> Option<Value> {
        if scope.test_mode {
            return None;
        }
        let preflight = self.agent.as_ref()?.preflight().await.ok()?;
        serde_json::to_value(preflight).ok()
    }
}
