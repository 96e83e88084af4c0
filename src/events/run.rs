use serde::Serialize;

use crate::workflow::node::NodeId;

#[derive(Debug, Clone)]
pub enum RunEvent {
    Started,
    Resumed,
    WaitingApproval(NodeId),
    Succeeded,
    Failed(String),
}

impl RunEvent {
    /// Name used on the wire for notification sinks.
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::Started => "run.started",
            RunEvent::Resumed => "run.resumed",
            RunEvent::WaitingApproval(_) => "run.waiting_approval",
            RunEvent::Succeeded => "run.succeeded",
            RunEvent::Failed(_) => "run.failed",
        }
    }
}

/// Payload delivered to event sinks.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunNotification {
    pub event: String,
    pub run_id: String,
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
}
