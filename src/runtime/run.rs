//! A single execution instance of a workflow definition.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    common::Vars,
    runtime::ExecutionContext,
    utils,
    workflow::{
        node::NodeId,
        state::{NodeState, NodeStatus},
    },
};

pub type RunId = String;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    WaitingApproval,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One entry of a run's append-only log stream.
///
/// `node_id == None` marks a run-scoped entry (start, timeout, deadlock, finish).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub node_id: Option<NodeId>,
    pub event: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

impl LogEvent {
    pub fn new(
        level: LogLevel,
        node_id: Option<&str>,
        event: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: utils::longid(),
            timestamp: Utc::now(),
            level,
            node_id: node_id.map(str::to_string),
            event: event.to_string(),
            message: message.into(),
            attempt: None,
            backoff_ms: None,
        }
    }

    pub fn with_attempt(
        mut self,
        attempt: u32,
    ) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_backoff(
        mut self,
        backoff_ms: u64,
    ) -> Self {
        self.backoff_ms = Some(backoff_ms);
        self
    }
}

/// Failure evidence captured from a failing attempt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Artifact {
    pub id: String,
    pub node_id: NodeId,
    pub attempt: u32,
    pub error: String,
    pub captured_at: DateTime<Utc>,
    pub data: Value,
}

/// Provenance of a run started by a schedule.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TriggerStamp {
    pub schedule_id: String,
    pub schedule_name: String,
    pub timezone: String,
    pub fired_at: DateTime<Utc>,
}

/// Options for creating a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub test_mode: bool,
    /// merged over the workflow's `env` to seed the context
    pub input: Vars,
    pub trigger: Option<TriggerStamp>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Run {
    pub id: RunId,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: RunStatus,
    pub node_states: HashMap<NodeId, NodeState>,
    pub context: ExecutionContext,
    pub logs: Vec<LogEvent>,
    pub artifacts: Vec<Artifact>,
    pub checkpoint_node_id: Option<NodeId>,
    pub test_mode: bool,
    pub trigger: Option<TriggerStamp>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Run {
    pub fn new(
        workflow_id: &str,
        workflow_version: u32,
        context: ExecutionContext,
        options: &RunOptions,
    ) -> Self {
        Self {
            id: utils::longid(),
            workflow_id: workflow_id.to_string(),
            workflow_version,
            status: RunStatus::Pending,
            node_states: HashMap::new(),
            context,
            logs: Vec::new(),
            artifacts: Vec::new(),
            checkpoint_node_id: None,
            test_mode: options.test_mode,
            trigger: options.trigger.clone(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn node_status(
        &self,
        nid: &str,
    ) -> NodeStatus {
        self.node_states.get(nid).map(|s| s.status).unwrap_or_default()
    }

    /// The approval gate a waiting run is suspended on.
    pub fn waiting_on(&self) -> Option<&NodeId> {
        if self.status != RunStatus::WaitingApproval {
            return None;
        }
        self.logs.iter().rev().find(|l| l.event == "waiting_approval").and_then(|l| l.node_id.as_ref())
    }

    pub fn has_failed_node(&self) -> bool {
        self.node_states.values().any(|s| s.status == NodeStatus::Failed)
    }

    pub fn log(
        &mut self,
        event: LogEvent,
    ) {
        self.logs.push(event);
    }
}

/// Partial update of a stored run; `None` fields are left untouched.
///
/// Applying the same patch twice yields the same run, so writers may retry.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub node_states: Option<HashMap<NodeId, NodeState>>,
    pub context: Option<ExecutionContext>,
    pub logs: Option<Vec<LogEvent>>,
    pub artifacts: Option<Vec<Artifact>>,
    pub checkpoint_node_id: Option<NodeId>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunPatch {
    /// Everything the loop persists after a node transition.
    pub fn checkpoint(run: &Run) -> Self {
        Self {
            status: Some(run.status),
            node_states: Some(run.node_states.clone()),
            context: Some(run.context.clone()),
            logs: Some(run.logs.clone()),
            artifacts: Some(run.artifacts.clone()),
            checkpoint_node_id: run.checkpoint_node_id.clone(),
            started_at: run.started_at,
            finished_at: run.finished_at,
            error: run.error.clone(),
        }
    }

    pub fn apply(
        self,
        run: &mut Run,
    ) {
        if let Some(status) = self.status {
            run.status = status;
        }
        if let Some(node_states) = self.node_states {
            run.node_states = node_states;
        }
        if let Some(context) = self.context {
            run.context = context;
        }
        if let Some(logs) = self.logs {
            run.logs = logs;
        }
        if let Some(artifacts) = self.artifacts {
            run.artifacts = artifacts;
        }
        if self.checkpoint_node_id.is_some() {
            run.checkpoint_node_id = self.checkpoint_node_id;
        }
        if self.started_at.is_some() {
            run.started_at = self.started_at;
        }
        if self.finished_at.is_some() {
            run.finished_at = self.finished_at;
        }
        if self.error.is_some() {
            run.error = self.error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_only_touches_set_fields() {
        let mut run = Run::new("wf", 1, ExecutionContext::default(), &RunOptions::default());
        run.checkpoint_node_id = Some("a".into());

        let patch = RunPatch {
            status: Some(RunStatus::Running),
            ..Default::default()
        };
        patch.clone().apply(&mut run);
        patch.apply(&mut run);

        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.checkpoint_node_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_checkpoint_patch_reproduces_run_state() {
        let mut source = Run::new("wf", 1, ExecutionContext::default(), &RunOptions::default());
        source.status = RunStatus::WaitingApproval;
        source.node_states.insert("a".into(), NodeState::queued());
        source.context.approve("a");
        source.log(LogEvent::new(LogLevel::Info, Some("a"), "approval_required", "waiting"));

        let mut target = Run::new("wf", 1, ExecutionContext::default(), &RunOptions::default());
        RunPatch::checkpoint(&source).apply(&mut target);

        assert_eq!(target.status, RunStatus::WaitingApproval);
        assert_eq!(target.node_status("a"), NodeStatus::Queued);
        assert!(target.context.is_approved("a"));
        assert_eq!(target.logs.len(), 1);
    }

    #[test]
    fn test_waiting_on_latest_gate() {
        let mut run = Run::new("wf", 1, ExecutionContext::default(), &RunOptions::default());
        run.log(LogEvent::new(LogLevel::Info, Some("first"), "waiting_approval", "approval required"));
        run.log(LogEvent::new(LogLevel::Info, Some("second"), "waiting_approval", "approval required"));
        assert_eq!(run.waiting_on(), None);

        run.status = RunStatus::WaitingApproval;
        assert_eq!(run.waiting_on().map(String::as_str), Some("second"));
    }
}
