//! Per-node lifecycle tracking.
//!
//! `queued → running → {succeeded, failed, skipped}`, with `running → queued`
//! reserved for approval suspension. Terminal states never regress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AutoflowError, Result, utils};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped)
    }

    /// Failed or skipped: downstream nodes must be skipped.
    pub fn blocks_downstream(&self) -> bool {
        matches!(self, NodeStatus::Failed | NodeStatus::Skipped)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct NodeState {
    pub status: NodeStatus,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub output_key: Option<String>,
}

/// What the loop should do with a node in the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Node already reached a terminal status.
    Settled,
    /// At least one predecessor is still queued or running.
    NotReady,
    /// A predecessor failed or was skipped.
    Skip,
    Execute,
}

/// Total transition function over the node's own status and its predecessors' statuses.
pub fn transition(
    current: &NodeState,
    predecessors: impl IntoIterator<Item = NodeStatus>,
) -> Transition {
    if current.status.is_terminal() {
        return Transition::Settled;
    }
    let mut blocked = false;
    for status in predecessors {
        if !status.is_terminal() {
            return Transition::NotReady;
        }
        blocked |= status.blocks_downstream();
    }
    if blocked { Transition::Skip } else { Transition::Execute }
}

impl NodeState {
    pub fn queued() -> Self {
        Self::default()
    }

    fn ensure_open(
        &self,
        to: NodeStatus,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(AutoflowError::Node(format!(
                "illegal node transition {} -> {}",
                self.status.as_ref(),
                to.as_ref()
            )));
        }
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<()> {
        self.ensure_open(NodeStatus::Running)?;
        self.status = NodeStatus::Running;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.duration_ms = None;
        self.error = None;
        Ok(())
    }

    /// Approval suspension: back to queued, keeping attempts and output bookkeeping.
    pub fn requeue(&mut self) -> Result<()> {
        self.ensure_open(NodeStatus::Queued)?;
        self.status = NodeStatus::Queued;
        Ok(())
    }

    pub fn mark_succeeded(
        &mut self,
        attempts: u32,
        output_key: Option<String>,
    ) -> Result<()> {
        self.ensure_open(NodeStatus::Succeeded)?;
        self.status = NodeStatus::Succeeded;
        self.attempts = attempts;
        self.output_key = output_key;
        self.finish();
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        attempts: u32,
        error: String,
    ) -> Result<()> {
        self.ensure_open(NodeStatus::Failed)?;
        self.status = NodeStatus::Failed;
        self.attempts = attempts;
        self.error = Some(error);
        self.finish();
        Ok(())
    }

    pub fn mark_skipped(
        &mut self,
        reason: String,
    ) -> Result<()> {
        self.ensure_open(NodeStatus::Skipped)?;
        self.status = NodeStatus::Skipped;
        self.error = Some(reason);
        self.finish();
        Ok(())
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.duration_ms = self.started_at.map(|start| utils::time::elapsed_millis(start, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(status: NodeStatus) -> NodeState {
        NodeState {
            status,
            ..Default::default()
        }
    }

    #[test]
    fn test_transition_waits_for_open_predecessors() {
        let node = NodeState::queued();
        assert_eq!(transition(&node, [NodeStatus::Succeeded, NodeStatus::Running]), Transition::NotReady);
        // a failed predecessor does not short-circuit while another is still queued
        assert_eq!(transition(&node, [NodeStatus::Failed, NodeStatus::Queued]), Transition::NotReady);
    }

    #[test]
    fn test_transition_skips_after_failure() {
        let node = NodeState::queued();
        assert_eq!(transition(&node, [NodeStatus::Succeeded, NodeStatus::Failed]), Transition::Skip);
        assert_eq!(transition(&node, [NodeStatus::Skipped]), Transition::Skip);
    }

    #[test]
    fn test_transition_executes_roots_and_ready_nodes() {
        let node = NodeState::queued();
        assert_eq!(transition(&node, std::iter::empty::<NodeStatus>()), Transition::Execute);
        assert_eq!(transition(&node, [NodeStatus::Succeeded, NodeStatus::Succeeded]), Transition::Execute);
    }

    #[test]
    fn test_transition_settled_for_terminal_nodes() {
        for status in [NodeStatus::Succeeded, NodeStatus::Failed, NodeStatus::Skipped] {
            assert_eq!(transition(&state(status), [NodeStatus::Queued]), Transition::Settled);
        }
    }

    #[test]
    fn test_terminal_status_never_regresses() {
        let mut node = NodeState::queued();
        node.mark_running().unwrap();
        node.mark_succeeded(1, Some("out".into())).unwrap();
        assert!(node.mark_running().is_err());
        assert!(node.requeue().is_err());
        assert!(node.mark_failed(2, "late".into()).is_err());
        assert_eq!(node.status, NodeStatus::Succeeded);
        assert_eq!(node.output_key.as_deref(), Some("out"));
        assert!(node.duration_ms.is_some());
    }

    #[test]
    fn test_requeue_from_running() {
        let mut node = NodeState::queued();
        node.mark_running().unwrap();
        node.requeue().unwrap();
        assert_eq!(node.status, NodeStatus::Queued);
        node.mark_running().unwrap();
        node.mark_failed(3, "boom".into()).unwrap();
        assert_eq!(node.attempts, 3);
        assert_eq!(node.error.as_deref(), Some("boom"));
    }
}
