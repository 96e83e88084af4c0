pub mod cascade;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::{
    AutoflowError, Result,
    runtime::{ExecutionContext, RunId, RunScope},
    workflow::node::NodeId,
};

use super::{Action, ActionOutput, NodeConfig, NodeKind};

pub use cascade::{SurfaceElement, TargetCandidate, TargetOp, TargetSurface};

/// Target descriptors shared by `click` and `fill`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractConfig {
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default)]
    pub test_id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub xpath: Option<String>,
    /// text typed by `fill`
    #[serde(default)]
    pub value: Option<String>,
}

impl InteractConfig {
    pub fn schema(fill: bool) -> Value {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "selectors": { "type": "array", "items": { "type": "string" } },
                "test_id": { "type": ["string", "null"] },
                "label": { "type": ["string", "null"] },
                "role": { "type": ["string", "null"] },
                "name": { "type": ["string", "null"] },
                "selector": { "type": ["string", "null"] },
                "xpath": { "type": ["string", "null"] },
                "value": { "type": ["string", "null"] }
            }
        });
        if fill {
            schema["required"] = json!(["value"]);
        }
        schema
    }
}

/// Opens interaction surfaces; one surface per run.
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    async fn open(
        &self,
        scope: &RunScope,
    ) -> Result<Arc<dyn TargetSurface>>;
}

/// Provider for hosts without a browser or desktop driver.
#[derive(Debug, Clone, Default)]
pub struct NullSurfaceProvider;

#[async_trait]
impl SurfaceProvider for NullSurfaceProvider {
    async fn open(
        &self,
        _: &RunScope,
    ) -> Result<Arc<dyn TargetSurface>> {
        Err(AutoflowError::Action("no interaction surface configured".to_string()))
    }
}

/// Per-run surface sessions, shared by the click and fill executors.
pub struct SurfaceSessions {
    provider: Arc<dyn SurfaceProvider>,
    sessions: Mutex<HashMap<RunId, Arc<dyn TargetSurface>>>,
}

impl SurfaceSessions {
    pub fn new(provider: Arc<dyn SurfaceProvider>) -> Self {
        Self {
            provider,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(
        &self,
        scope: &RunScope,
    ) -> Result<Arc<dyn TargetSurface>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(surface) = sessions.get(&scope.run_id) {
            return Ok(surface.clone());
        }
        let surface = self.provider.open(scope).await?;
        sessions.insert(scope.run_id.clone(), surface.clone());
        Ok(surface)
    }

    async fn current(
        &self,
        run_id: &str,
    ) -> Option<Arc<dyn TargetSurface>> {
        self.sessions.lock().await.get(run_id).cloned()
    }

    async fn release(
        &self,
        run_id: &str,
    ) {
        let surface = self.sessions.lock().await.remove(run_id);
        if let Some(surface) = surface {
            surface.close().await;
            tracing::debug!(run_id, "interaction surface released");
        }
    }

    pub async fn active(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InteractMode {
    Click,
    Fill,
}

/// Click or fill a target resolved through the cascade.
pub struct InteractAction {
    mode: InteractMode,
    sessions: Arc<SurfaceSessions>,
}

impl InteractAction {
    pub fn click(sessions: Arc<SurfaceSessions>) -> Self {
        Self {
            mode: InteractMode::Click,
            sessions,
        }
    }

    pub fn fill(sessions: Arc<SurfaceSessions>) -> Self {
        Self {
            mode: InteractMode::Fill,
            sessions,
        }
    }

    fn config<'a>(
        &self,
        config: &'a NodeConfig,
    ) -> Result<&'a InteractConfig> {
        match (self.mode, config) {
            (InteractMode::Click, NodeConfig::Click(c)) | (InteractMode::Fill, NodeConfig::Fill(c)) => Ok(c),
            _ => Err(config.mismatch(self.kind())),
        }
    }
}

#[async_trait]
impl Action for InteractAction {
    fn kind(&self) -> NodeKind {
        match self.mode {
            InteractMode::Click => NodeKind::Click,
            InteractMode::Fill => NodeKind::Fill,
        }
    }

    async fn run(
        &self,
        nid: &NodeId,
        config: &NodeConfig,
        _ctx: &mut ExecutionContext,
        scope: &RunScope,
    ) -> Result<ActionOutput> {
        let config = self.config(config)?;
        let op = match self.mode {
            InteractMode::Click => TargetOp::Click,
            InteractMode::Fill => TargetOp::Fill(config.value.as_deref().unwrap_or_default()),
        };

        let surface = self.sessions.acquire(scope).await?;
        let resolved = cascade::resolve(surface.as_ref(), &cascade::candidates(config), op).await?;
        tracing::debug!(run_id = %scope.run_id, node_id = %nid, target = %resolved, "target resolved");

        Ok(ActionOutput::value(json!({ "target": resolved })))
    }

    async fn capture_evidence(
        &self,
        _nid: &NodeId,
        _config: &NodeConfig,
        scope: &RunScope,
        _error: &AutoflowError,
    ) -> Option<Value> {
        let surface = self.sessions.current(&scope.run_id).await?;
        surface.snapshot().await
    }

    async fn release(
        &self,
        scope: &RunScope,
    ) {
        self.sessions.release(&scope.run_id).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct OkSurface;

    #[async_trait]
    impl TargetSurface for OkSurface {
        async fn perform(
            &self,
            target: &TargetCandidate,
            _op: TargetOp<'_>,
        ) -> std::result::Result<(), String> {
            match target {
                TargetCandidate::Label { .. } => Ok(()),
                _ => Err("not visible".to_string()),
            }
        }

        async fn nearby(&self) -> Vec<SurfaceElement> {
            Vec::new()
        }

        async fn snapshot(&self) -> Option<Value> {
            Some(json!({"html": "<form/>"}))
        }
    }

    #[derive(Default)]
    struct CountingProvider {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl SurfaceProvider for CountingProvider {
        async fn open(
            &self,
            _: &RunScope,
        ) -> Result<Arc<dyn TargetSurface>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(OkSurface))
        }
    }

    fn scope() -> RunScope {
        RunScope {
            run_id: "r1".into(),
            workflow_id: "wf".into(),
            test_mode: false,
        }
    }

    #[tokio::test]
    async fn test_session_is_reused_within_a_run_and_released() {
        let provider = Arc::new(CountingProvider::default());
        let sessions = Arc::new(SurfaceSessions::new(provider.clone()));
        let click = InteractAction::click(sessions.clone());
        let fill = InteractAction::fill(sessions.clone());
        let mut ctx = ExecutionContext::default();

        let click_config = NodeConfig::Click(InteractConfig {
            selectors: vec!["#gone".into()],
            label: Some("Submit".into()),
            ..Default::default()
        });
        let fill_config = NodeConfig::Fill(InteractConfig {
            label: Some("Email".into()),
            value: Some("a@b.c".into()),
            ..Default::default()
        });

        let output = click.run(&"c".to_string(), &click_config, &mut ctx, &scope()).await.unwrap();
        assert_eq!(output.value.unwrap()["target"]["by"], json!("label"));
        fill.run(&"f".to_string(), &fill_config, &mut ctx, &scope()).await.unwrap();
        assert_eq!(provider.opened.load(Ordering::SeqCst), 1);

        let evidence = click.capture_evidence(&"c".to_string(), &click_config, &scope(), &AutoflowError::Action("x".into())).await;
        assert_eq!(evidence, Some(json!({"html": "<form/>"})));

        click.release(&scope()).await;
        assert_eq!(sessions.active().await, 0);
    }

    #[tokio::test]
    async fn test_config_kind_mismatch() {
        let sessions = Arc::new(SurfaceSessions::new(Arc::new(NullSurfaceProvider)));
        let click = InteractAction::click(sessions);
        let mut ctx = ExecutionContext::default();
        assert!(click.run(&"c".to_string(), &NodeConfig::Start, &mut ctx, &scope()).await.is_err());
    }
}
