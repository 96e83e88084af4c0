use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::{
    AutoflowError, Config, Engine, Result,
    workflow::{
        actions::{Action, ActionRegistry, DesktopAction, DesktopAgent, NullSurfaceProvider, SurfaceProvider},
        template::{EnvSecrets, SecretProvider},
    },
};

pub struct EngineBuilder {
    config: Config,
    rt: Option<Arc<Runtime>>,
    surfaces: Option<Arc<dyn SurfaceProvider>>,
    secrets: Option<Arc<dyn SecretProvider>>,
    actions: Vec<Arc<dyn Action>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            rt: None,
            surfaces: None,
            secrets: None,
            actions: Vec::new(),
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn async_worker_thread_number(
        mut self,
        n: u16,
    ) -> Self {
        self.config.engine.async_worker_thread_number = n;
        self
    }

    pub fn runtime(
        mut self,
        runtime: Arc<Runtime>,
    ) -> Self {
        self.rt = Some(runtime);
        self
    }

    /// Backend for the `click` and `fill` nodes.
    pub fn surfaces(
        mut self,
        provider: Arc<dyn SurfaceProvider>,
    ) -> Self {
        self.surfaces = Some(provider);
        self
    }

    /// Agent serving the `desktop` nodes.
    pub fn desktop_agent(
        mut self,
        url: impl Into<String>,
    ) -> Self {
        self.config.engine.desktop_agent_url = Some(url.into());
        self
    }

    pub fn secrets(
        mut self,
        secrets: Arc<dyn SecretProvider>,
    ) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Register an executor, replacing the built-in one of the same kind.
    pub fn action(
        mut self,
        action: Arc<dyn Action>,
    ) -> Self {
        self.actions.push(action);
        self
    }

    /// Builds the engine on the given runtime, else on the current one, else
    /// on a new multi-thread runtime owned by the engine.
    pub fn build(&self) -> Result<Engine> {
        let (handle, runtime) = match (&self.rt, Handle::try_current()) {
            (Some(rt), _) => (rt.handle().clone(), Some(rt.clone())),
            (None, Ok(handle)) => (handle, None),
            (None, Err(_)) => {
                let rt = Builder::new_multi_thread()
                    .worker_threads(self.config.engine.async_worker_thread_number.max(1).into())
                    .enable_all()
                    .build()
                    .map_err(|e| AutoflowError::Engine(format!("failed to build runtime: {}", e)))?;
                let rt = Arc::new(rt);
                (rt.handle().clone(), Some(rt))
            }
        };

        let mut registry = ActionRegistry::with_builtins(self.surfaces.clone().unwrap_or_else(|| Arc::new(NullSurfaceProvider)));
        if let Some(url) = &self.config.engine.desktop_agent_url {
            registry.register(Arc::new(DesktopAction::new(Some(DesktopAgent::new(url.clone())))));
        }
        for action in self.actions.iter() {
            registry.register(action.clone());
        }
        let secrets = self.secrets.clone().unwrap_or_else(|| Arc::new(EnvSecrets::new(self.config.engine.secret_env_prefix.clone())));

        Ok(Engine::new(handle, runtime, registry, secrets, &self.config))
    }
}
