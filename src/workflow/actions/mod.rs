pub mod approval;
pub mod delay;
pub mod desktop;
pub mod http_request;
pub mod interact;
pub mod start;
pub mod transform;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    AutoflowError, Result,
    runtime::{ExecutionContext, RunScope},
    workflow::node::NodeId,
};

pub use approval::{ApprovalAction, ApprovalConfig};
pub use delay::{DelayAction, DelayConfig};
pub use desktop::{DesktopAction, DesktopAgent, DesktopConfig};
pub use http_request::{HttpRequestAction, HttpRequestConfig};
pub use interact::{InteractAction, InteractConfig, NullSurfaceProvider, SurfaceProvider, SurfaceSessions, TargetSurface};
pub use start::StartAction;
pub use transform::{TransformAction, TransformConfig};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    Start,
    HttpRequest,
    Transform,
    Delay,
    Approval,
    Click,
    Fill,
    Desktop,
}

/// Strongly typed node configuration, one variant per [`NodeKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    Start,
    HttpRequest(HttpRequestConfig),
    Transform(TransformConfig),
    Delay(DelayConfig),
    Approval(ApprovalConfig),
    Click(InteractConfig),
    Fill(InteractConfig),
    Desktop(DesktopConfig),
}

impl NodeConfig {
    /// Validate `params` against the kind's schema and decode it.
    pub fn parse(
        kind: NodeKind,
        params: &Value,
    ) -> Result<Self> {
        // absent config is the empty object
        let empty = Value::Object(Default::default());
        let params = if params.is_null() { &empty } else { params };

        let schema = match kind {
            NodeKind::Start => start::schema(),
            NodeKind::HttpRequest => HttpRequestConfig::schema(),
            NodeKind::Transform => TransformConfig::schema(),
            NodeKind::Delay => DelayConfig::schema(),
            NodeKind::Approval => ApprovalConfig::schema(),
            NodeKind::Click => InteractConfig::schema(false),
            NodeKind::Fill => InteractConfig::schema(true),
            NodeKind::Desktop => DesktopConfig::schema(),
        };
        jsonschema::validate(&schema, params).map_err(|e| AutoflowError::Node(format!("invalid {} config: {}", kind.as_ref(), e)))?;

        let decode = |e: serde_json::Error| AutoflowError::Node(format!("invalid {} config: {}", kind.as_ref(), e));
        Ok(match kind {
            NodeKind::Start => NodeConfig::Start,
            NodeKind::HttpRequest => NodeConfig::HttpRequest(serde_json::from_value(params.clone()).map_err(decode)?),
            NodeKind::Transform => NodeConfig::Transform(serde_json::from_value(params.clone()).map_err(decode)?),
            NodeKind::Delay => NodeConfig::Delay(serde_json::from_value(params.clone()).map_err(decode)?),
            NodeKind::Approval => NodeConfig::Approval(serde_json::from_value(params.clone()).map_err(decode)?),
            NodeKind::Click => NodeConfig::Click(serde_json::from_value(params.clone()).map_err(decode)?),
            NodeKind::Fill => NodeConfig::Fill(serde_json::from_value(params.clone()).map_err(decode)?),
            NodeKind::Desktop => NodeConfig::Desktop(serde_json::from_value(params.clone()).map_err(decode)?),
        })
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeConfig::Start => NodeKind::Start,
            NodeConfig::HttpRequest(_) => NodeKind::HttpRequest,
            NodeConfig::Transform(_) => NodeKind::Transform,
            NodeConfig::Delay(_) => NodeKind::Delay,
            NodeConfig::Approval(_) => NodeKind::Approval,
            NodeConfig::Click(_) => NodeKind::Click,
            NodeConfig::Fill(_) => NodeKind::Fill,
            NodeConfig::Desktop(_) => NodeKind::Desktop,
        }
    }

    fn mismatch(
        &self,
        expected: NodeKind,
    ) -> AutoflowError {
        AutoflowError::Action(format!("{} action received {} config", expected.as_ref(), self.kind().as_ref()))
    }
}

/// Executor for one node kind.
///
/// Implementations must tolerate being called again for the same node: the
/// retry policy re-invokes `run` after a failed or timed out attempt.
#[async_trait]
pub trait Action: Send + Sync {
    /// Returns the kind this action executes.
    fn kind(&self) -> NodeKind;

    /// Executes the node body against the run's context.
    ///
    /// # Arguments
    ///
    /// * `nid` - The id of the node.
    /// * `config` - The node config after template interpolation.
    /// * `ctx` - The run's [`ExecutionContext`], exclusively borrowed.
    /// * `scope` - Run id, workflow id and test mode.
    async fn run(
        &self,
        nid: &NodeId,
        config: &NodeConfig,
        ctx: &mut ExecutionContext,
        scope: &RunScope,
    ) -> Result<ActionOutput>;

    /// Failure evidence for a failing attempt, eg. a surface snapshot.
    async fn capture_evidence(
        &self,
        _nid: &NodeId,
        _config: &NodeConfig,
        _scope: &RunScope,
        _error: &AutoflowError,
    ) -> Option<Value> {
        None
    }

    /// Tear down any per-run resources. Called after every loop invocation.
    async fn release(
        &self,
        _scope: &RunScope,
    ) {
    }
}

/// Output returned by an action's run method
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutput {
    /// written to the context under the node's output key
    pub value: Option<Value>,
}

impl ActionOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
        }
    }
}

/// Kind to executor table consulted by the execution loop.
#[derive(Clone)]
pub struct ActionRegistry {
    actions: HashMap<NodeKind, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn empty() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Registry with every built-in kind. Interaction kinds use `surfaces`;
    /// `desktop` nodes fail until an agent is registered with [`DesktopAction::new`].
    pub fn with_builtins(surfaces: Arc<dyn SurfaceProvider>) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(StartAction));
        registry.register(Arc::new(HttpRequestAction::new()));
        registry.register(Arc::new(TransformAction));
        registry.register(Arc::new(DelayAction));
        registry.register(Arc::new(ApprovalAction));
        let sessions = Arc::new(SurfaceSessions::new(surfaces));
        registry.register(Arc::new(InteractAction::click(sessions.clone())));
        registry.register(Arc::new(InteractAction::fill(sessions)));
        registry.register(Arc::new(DesktopAction::default()));
        registry
    }

    /// Register (or replace) the executor for `action.kind()`.
    pub fn register(
        &mut self,
        action: Arc<dyn Action>,
    ) {
        self.actions.insert(action.kind(), action);
    }

    pub fn get(
        &self,
        kind: NodeKind,
    ) -> Result<Arc<dyn Action>> {
        self.actions.get(&kind).cloned().ok_or_else(|| AutoflowError::Action(format!("no executor registered for kind '{}'", kind.as_ref())))
    }

    pub async fn release_run(
        &self,
        scope: &RunScope,
    ) {
        for action in self.actions.values() {
            action.release(scope).await;
        }
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtins(Arc::new(NullSurfaceProvider))
    }
}
