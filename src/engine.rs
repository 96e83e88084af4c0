//! Workflow engine - the main entry point for Autoflow.
//!
//! The engine ties the pieces together:
//! - Deploying versioned workflow definitions
//! - Creating runs and driving them through the execution loop
//! - Resuming runs suspended on approval gates
//! - The cron scheduler and the event channel

mod monitor;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use tokio::runtime::{Handle, Runtime};
use tracing::info;

use crate::{
    AutoflowError, ChannelEvent, ChannelOptions, Config, Result,
    dispatcher::Dispatcher,
    model::WorkflowModel,
    runtime::{Channel, ExecutionContext, Run, RunId, RunOptions, RunPatch, RunStatus},
    scheduler::{CronScheduler, RunLauncher},
    store::{DbStore, MemStore, Store},
    workflow::{Workflow, actions::ActionRegistry, template::SecretProvider},
};

pub use monitor::{EventSink, Monitor, WebhookSink};

/// Creates runs and hands them to the dispatcher; shared by the engine and
/// the scheduler.
struct Launcher {
    store: Arc<Store>,
    dispatcher: Arc<Dispatcher>,
}

impl Launcher {
    fn create(
        &self,
        wid: &str,
        options: RunOptions,
    ) -> Result<Run> {
        let model = self.store.find_workflow(wid, None)?;
        let mut context = ExecutionContext::default();
        for (key, value) in model.env.iter() {
            context.set(key, value.clone());
        }
        context.merge(options.input.clone());

        let run = Run::new(wid, model.version, context, &options);
        self.store.create_run(&run)?;
        info!(run_id = %run.id, workflow_id = %wid, version = model.version, test_mode = run.test_mode, "run created");
        Ok(run)
    }
}

#[async_trait]
impl RunLauncher for Launcher {
    fn create_run(
        &self,
        workflow_id: &str,
        options: RunOptions,
    ) -> Result<RunId> {
        self.create(workflow_id, options).map(|run| run.id)
    }

    async fn execute(
        &self,
        run_id: &str,
    ) -> Result<Run> {
        self.dispatcher.execute(run_id).await
    }
}

/// The main workflow engine.
///
/// # Example
///
/// ```rust,ignore
/// let engine = EngineBuilder::new().build()?;
/// engine.launch()?;
///
/// let workflow = WorkflowModel::from_json(json_str)?;
/// engine.deploy(&workflow)?;
/// let run = engine.run_workflow(&workflow.id, RunOptions::default()).await?;
///
/// engine.shutdown();
/// ```
pub struct Engine {
    /// Event channel for run events and logs.
    channel: Arc<Channel>,
    /// Definitions, runs and schedules.
    store: Arc<Store>,
    launcher: Arc<Launcher>,
    /// Forwards run lifecycle events to sinks.
    monitor: Monitor,
    scheduler: CronScheduler,
    scheduler_enabled: bool,

    running: Arc<AtomicBool>,
    handle: Handle,
    /// kept alive when the engine built its own runtime
    _runtime: Option<Arc<Runtime>>,
}

impl Engine {
    pub(crate) fn new(
        handle: Handle,
        runtime: Option<Arc<Runtime>>,
        registry: ActionRegistry,
        secrets: Arc<dyn SecretProvider>,
        config: &Config,
    ) -> Self {
        let store = Store::new();
        MemStore::new().init(&store);
        let store = Arc::new(store);

        let channel = Arc::new(Channel::new(handle.clone()));
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), channel.clone(), Arc::new(registry), secrets, Some(config.engine.definition_cache_size)));
        let launcher = Arc::new(Launcher {
            store: store.clone(),
            dispatcher,
        });
        let scheduler = CronScheduler::new(handle.clone(), store.clone(), launcher.clone(), config.scheduler.options());

        let monitor = Monitor::new(channel.clone(), handle.clone());
        for webhook in config.webhooks.iter() {
            monitor.add_sink(Arc::new(WebhookSink::new(webhook.url.clone(), webhook.events.clone())));
        }

        Self {
            channel,
            store,
            launcher,
            monitor,
            scheduler,
            scheduler_enabled: config.scheduler.enabled,
            running: Arc::new(AtomicBool::new(false)),
            handle,
            _runtime: runtime,
        }
    }

    /// Starts event delivery and, unless disabled, the cron scheduler.
    pub fn launch(&self) -> Result<()> {
        if self.running.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        // register the monitor before listening so no event is missed
        self.monitor.monitor();
        self.channel.listen();

        if self.scheduler_enabled {
            self.scheduler.start()?;
        }
        info!("engine launched");
        Ok(())
    }

    /// Stops the scheduler and event delivery. Runs in flight finish their
    /// current invocation.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        self.scheduler.stop();
        self.monitor.stop();
        self.channel.shutdown();
        info!("engine shut down");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Validates and stores a new version of the workflow; returns the version.
    pub fn deploy(
        &self,
        workflow: &WorkflowModel,
    ) -> Result<u32> {
        let graph = Workflow::try_from(workflow)?;
        if !graph.is_acyclic() {
            tracing::warn!(workflow_id = %workflow.id, "workflow has a cycle; runs will fail with a deadlock");
        }
        let version = self.store.deploy(workflow)?;
        info!(workflow_id = %workflow.id, version, nodes = graph.node_count(), "workflow deployed");
        Ok(version)
    }

    /// Removes every version of a workflow with its runs and schedules.
    pub fn delete_workflow(
        &self,
        wid: &str,
    ) -> Result<bool> {
        let deleted = self.store.delete_workflow(wid)?;
        self.launcher.dispatcher.evict(wid);
        if deleted && self.scheduler.is_running() {
            self.scheduler.refresh()?;
        }
        Ok(deleted)
    }

    pub fn find_workflow(
        &self,
        wid: &str,
        version: Option<u32>,
    ) -> Result<WorkflowModel> {
        self.store.find_workflow(wid, version)
    }

    /// Creates a pending run pinned to the latest version of the workflow.
    pub fn create_run(
        &self,
        wid: &str,
        options: RunOptions,
    ) -> Result<Run> {
        self.launcher.create(wid, options)
    }

    /// Drives a run until it terminates or suspends for approval.
    pub async fn execute(
        &self,
        run_id: &str,
    ) -> Result<Run> {
        self.launcher.dispatcher.execute(run_id).await
    }

    pub async fn run_workflow(
        &self,
        wid: &str,
        options: RunOptions,
    ) -> Result<Run> {
        let run = self.create_run(wid, options)?;
        self.execute(&run.id).await
    }

    /// Runs the workflow on the engine's runtime and returns the run id
    /// without waiting for it.
    pub fn spawn_run(
        &self,
        wid: &str,
        options: RunOptions,
    ) -> Result<RunId> {
        let run = self.create_run(wid, options)?;
        let launcher = self.launcher.clone();
        let run_id = run.id.clone();
        self.handle.spawn(async move {
            if let Err(err) = launcher.dispatcher.execute(&run_id).await {
                tracing::error!(run_id = %run_id, error = %err, "run execution failed");
            }
        });
        Ok(run.id)
    }

    /// Grants the approval gate `nid` of a waiting run and resumes it.
    pub async fn approve(
        &self,
        run_id: &str,
        nid: &str,
    ) -> Result<Run> {
        if self.launcher.dispatcher.is_active(run_id) {
            return Err(AutoflowError::Run(format!("run '{}' is already executing", run_id)));
        }
        let mut run = self.store.load_run(run_id)?;
        if run.status != RunStatus::WaitingApproval {
            return Err(AutoflowError::Run(format!("run '{}' is not waiting for approval", run_id)));
        }
        if run.waiting_on().map(String::as_str) != Some(nid) {
            return Err(AutoflowError::Node(format!("run '{}' is not waiting on node '{}'", run_id, nid)));
        }

        run.context.approve(nid);
        self.store.save_run_state(
            run_id,
            RunPatch {
                context: Some(run.context),
                ..Default::default()
            },
        )?;
        info!(run_id = %run_id, node_id = %nid, "approval granted");
        self.execute(run_id).await
    }

    pub fn get_run(
        &self,
        run_id: &str,
    ) -> Result<Run> {
        self.store.load_run(run_id)
    }

    pub fn runs(
        &self,
        wid: &str,
    ) -> Result<Vec<Run>> {
        self.store.runs_for_workflow(wid)
    }

    /// Returns a reference to the event channel.
    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    /// Glob-filtered subscription on the engine's channel.
    pub fn subscribe(
        &self,
        options: ChannelOptions,
    ) -> Result<ChannelEvent> {
        ChannelEvent::channel(self.channel.clone(), options)
    }

    pub fn scheduler(&self) -> &CronScheduler {
        &self.scheduler
    }

    pub fn add_sink(
        &self,
        sink: Arc<dyn EventSink>,
    ) {
        self.monitor.add_sink(sink);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
