//! Human approval gate.
//!
//! The gate never fails on its own: without a recorded approval it raises
//! [`AutoflowError::ApprovalRequired`], which the execution loop turns into a
//! run suspension. Approval is granted out of band through `Engine::approve`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    AutoflowError, Result,
    runtime::{ExecutionContext, RunScope},
    workflow::node::NodeId,
};

use super::{Action, ActionOutput, NodeConfig, NodeKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub message: Option<String>,
    /// Only consulted in test mode.
    #[serde(default = "default_auto_approve")]
    pub auto_approve: bool,
}

fn default_auto_approve() -> bool {
    true
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            message: None,
            auto_approve: true,
        }
    }
}

impl ApprovalConfig {
    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": { "type": ["string", "null"] },
                "auto_approve": { "type": "boolean" }
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct ApprovalAction;

#[async_trait]
impl Action for ApprovalAction {
    fn kind(&self) -> NodeKind {
        NodeKind::Approval
    }

    async fn run(
        &self,
        nid: &NodeId,
        config: &NodeConfig,
        ctx: &mut ExecutionContext,
        scope: &RunScope,
    ) -> Result<ActionOutput> {
        let NodeConfig::Approval(config) = config else {
            return Err(config.mismatch(NodeKind::Approval));
        };

        if !ctx.is_approved(nid) && scope.test_mode && config.auto_approve {
            tracing::info!(run_id = %scope.run_id, node_id = %nid, "auto-approving gate in test mode");
            ctx.approve(nid);
        }

        if ctx.is_approved(nid) {
            return Ok(ActionOutput::value(json!({ "approved": true })));
        }
        Err(AutoflowError::ApprovalRequired(nid.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(test_mode: bool) -> RunScope {
        RunScope {
            run_id: "r1".into(),
            workflow_id: "wf".into(),
            test_mode,
        }
    }

    #[tokio::test]
    async fn test_gate_requires_approval() {
        let mut ctx = ExecutionContext::default();
        let config = NodeConfig::Approval(ApprovalConfig::default());
        let nid = "gate".to_string();

        let err = ApprovalAction.run(&nid, &config, &mut ctx, &scope(false)).await.unwrap_err();
        assert!(err.is_approval_required());

        ctx.approve(&nid);
        assert!(ApprovalAction.run(&nid, &config, &mut ctx, &scope(false)).await.is_ok());
    }

    #[tokio::test]
    async fn test_test_mode_auto_approves_unless_disabled() {
        let nid = "gate".to_string();

        let mut ctx = ExecutionContext::default();
        let config = NodeConfig::Approval(ApprovalConfig::default());
        ApprovalAction.run(&nid, &config, &mut ctx, &scope(true)).await.unwrap();
        assert!(ctx.is_approved(&nid));

        let mut ctx = ExecutionContext::default();
        let config = NodeConfig::Approval(ApprovalConfig {
            message: None,
            auto_approve: false,
        });
        let err = ApprovalAction.run(&nid, &config, &mut ctx, &scope(true)).await.unwrap_err();
        assert!(err.is_approval_required());
    }
}
