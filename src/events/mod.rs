//! Event types for run execution.
//!
//! Events are emitted during execution to notify subscribers about run and
//! node state changes; logs mirror the entries appended to `Run.logs`.

mod node;
mod run;

pub use node::*;
pub use run::*;

use crate::{
    runtime::{LogEvent, RunId},
    workflow::node::NodeId,
};

/// Generic event wrapper.
#[derive(Debug, Clone)]
pub struct Event<T> {
    inner: T,
}

/// Top-level event type.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// Run lifecycle events (started, waiting for approval, finished).
    Run(RunEvent),
    /// Node-level events (running, retry, succeeded, failed, skipped).
    Node(NodeEvent),
}

/// Event message containing run and node context.
#[derive(Debug, Clone)]
pub struct Message {
    pub run_id: RunId,
    pub workflow_id: String,
    /// empty for run events
    pub nid: NodeId,
    pub event: GraphEvent,
}

/// Log entry broadcast alongside the run's persisted log stream.
#[derive(Debug, Clone)]
pub struct Log {
    pub run_id: RunId,
    pub nid: NodeId,
    pub entry: LogEvent,
}

impl<T> std::ops::Deref for Event<T>
where
    T: std::fmt::Debug + Clone,
{
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Event<T>
where
    T: std::fmt::Debug + Clone,
{
    pub fn new(inner: &T) -> Self {
        Self {
            inner: inner.clone(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl GraphEvent {
    pub fn is_complete(&self) -> bool {
        matches!(self, GraphEvent::Run(RunEvent::Succeeded))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, GraphEvent::Run(RunEvent::Failed(_)))
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, GraphEvent::Run(RunEvent::WaitingApproval(_)))
    }
}
