use std::time::Duration;

use serde_json::Value;

use crate::{
    AutoflowError, Result,
    model::{ExecutionConfig, NodeModel},
    runtime::ExecutionContext,
    workflow::{
        actions::{NodeConfig, NodeKind},
        template::{self, SecretProvider},
    },
};

/// node id
pub type NodeId = String;

/// A validated node of a workflow definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// node id
    pub id: NodeId,
    /// node title
    pub title: String,
    pub kind: NodeKind,
    /// retries override
    pub retries: Option<u32>,
    /// attempt timeout override
    pub timeout: Option<Duration>,
    pub output_key: Option<String>,
    /// raw config, re-rendered against the context before every execution
    pub params: Value,
    /// config decoded at load time
    pub config: NodeConfig,
}

impl Node {
    pub fn new(model: &NodeModel) -> Result<Self> {
        if model.id.is_empty() {
            return Err(AutoflowError::Node("missing node id".to_string()));
        }
        let kind = model.kind.parse::<NodeKind>().map_err(|_| AutoflowError::Node(format!("node '{}' has unknown kind '{}'", model.id, model.kind)))?;
        let config = NodeConfig::parse(kind, &model.config).map_err(|e| AutoflowError::Node(format!("node '{}': {}", model.id, e)))?;

        Ok(Self {
            id: model.id.clone(),
            title: model.title.clone(),
            kind,
            retries: model.retries,
            timeout: model.timeout_ms.map(Duration::from_millis),
            output_key: model.output_key.clone(),
            params: model.config.clone(),
            config,
        })
    }

    pub fn retries(
        &self,
        execution: &ExecutionConfig,
    ) -> u32 {
        self.retries.unwrap_or(execution.default_retries)
    }

    pub fn timeout(
        &self,
        execution: &ExecutionConfig,
    ) -> Duration {
        self.timeout.unwrap_or(Duration::from_millis(execution.default_node_timeout_ms))
    }

    /// Context key the node's output is stored under.
    pub fn output_key(&self) -> &str {
        self.output_key.as_deref().unwrap_or(&self.id)
    }

    /// Interpolate every string of the raw config against the context and
    /// decode the result.
    pub fn render(
        &self,
        ctx: &ExecutionContext,
        secrets: &dyn SecretProvider,
    ) -> Result<NodeConfig> {
        let rendered = template::render_value(&self.params, ctx, secrets);
        if rendered == self.params {
            return Ok(self.config.clone());
        }
        NodeConfig::parse(self.kind, &rendered)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::workflow::{actions::TransformConfig, template::StaticSecrets};

    #[test]
    fn test_new_validates_kind_and_config() {
        assert!(Node::new(&NodeModel::new("a", "teleport", Value::Null)).is_err());
        assert!(Node::new(&NodeModel::new("a", "delay", json!({"ms": -1}))).is_err());
        assert!(Node::new(&NodeModel::new("", "start", Value::Null)).is_err());

        let node = Node::new(&NodeModel::new("a", "delay", json!({"ms": 5}))).unwrap();
        assert_eq!(node.kind, NodeKind::Delay);
        assert_eq!(node.output_key(), "a");
    }

    #[test]
    fn test_policy_precedence() {
        let execution = ExecutionConfig {
            default_retries: 1,
            default_node_timeout_ms: 1000,
            ..Default::default()
        };
        let mut model = NodeModel::new("a", "start", Value::Null);
        let node = Node::new(&model).unwrap();
        assert_eq!(node.retries(&execution), 1);
        assert_eq!(node.timeout(&execution), Duration::from_secs(1));

        model.retries = Some(4);
        model.timeout_ms = Some(20);
        let node = Node::new(&model).unwrap();
        assert_eq!(node.retries(&execution), 4);
        assert_eq!(node.timeout(&execution), Duration::from_millis(20));
    }

    #[test]
    fn test_render_interpolates_context_and_secrets() {
        let node = Node::new(&NodeModel::new("t", "transform", json!({"assign": {"greeting": "hi {{user.name}} {{secret:TOKEN}}"}}))).unwrap();
        let mut ctx = ExecutionContext::default();
        ctx.set("user", json!({"name": "Ada"}));
        let secrets = StaticSecrets::from([("TOKEN".to_string(), "s3cret".to_string())]);

        let NodeConfig::Transform(TransformConfig { assign, .. }) = node.render(&ctx, &secrets).unwrap() else {
            panic!("expected transform config");
        };
        assert_eq!(assign["greeting"], json!("hi Ada s3cret"));
    }
}
