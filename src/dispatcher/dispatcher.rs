//! The run execution loop.
//!
//! One invocation drives a run until it terminates or suspends on an approval
//! gate. Nodes execute one at a time in dependency order; every node
//! transition is checkpointed to the store before the loop moves on, so an
//! interrupted invocation can be resumed from the persisted run.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    AutoflowError, Result,
    common::MemCache,
    dispatcher::retry::{self, Deadline, RetryPolicy},
    events::{ErrorReason, GraphEvent, Log, Message, NodeEvent, RunEvent},
    runtime::{Artifact, Channel, LogEvent, LogLevel, Run, RunId, RunPatch, RunScope, RunStatus},
    store::Store,
    utils,
    workflow::{
        Workflow,
        actions::ActionRegistry,
        node::{Node, NodeId},
        state::{NodeState, NodeStatus, Transition, transition},
        template::SecretProvider,
    },
};

const DEFINITION_CACHE_SIZE: usize = 256;

enum NodeOutcome {
    /// the node reached a terminal status
    Settled,
    /// approval gate suspended the run
    Suspended,
    /// the run deadline expired during an attempt or a backoff
    RunTimeout,
}

/// Marks a run id as driven by a loop for as long as it lives.
struct ActiveRun {
    active: Arc<Mutex<HashSet<RunId>>>,
    run_id: RunId,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.run_id);
    }
}

pub struct Dispatcher {
    store: Arc<Store>,
    channel: Arc<Channel>,
    registry: Arc<ActionRegistry>,
    secrets: Arc<dyn SecretProvider>,
    /// compiled definitions keyed by `wid@version`
    definitions: MemCache<String, Arc<Workflow>>,
    active: Arc<Mutex<HashSet<RunId>>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        channel: Arc<Channel>,
        registry: Arc<ActionRegistry>,
        secrets: Arc<dyn SecretProvider>,
        cache_size: Option<usize>,
    ) -> Self {
        Self {
            store,
            channel,
            registry,
            secrets,
            definitions: MemCache::new(cache_size.unwrap_or(DEFINITION_CACHE_SIZE)),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_active(
        &self,
        run_id: &str,
    ) -> bool {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).contains(run_id)
    }

    /// Forget compiled definitions of a workflow.
    pub fn evict(
        &self,
        wid: &str,
    ) {
        let prefix = format!("{}@", wid);
        self.definitions.remove_if(|key| key.starts_with(&prefix));
    }

    fn claim(
        &self,
        run_id: &str,
    ) -> Result<ActiveRun> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(run_id.to_string()) {
            return Err(AutoflowError::Run(format!("run '{}' is already executing", run_id)));
        }
        Ok(ActiveRun {
            active: self.active.clone(),
            run_id: run_id.to_string(),
        })
    }

    fn compile(
        &self,
        run: &Run,
    ) -> Result<Arc<Workflow>> {
        let key = format!("{}@{}", run.workflow_id, run.workflow_version);
        if let Some(workflow) = self.definitions.get(&key) {
            return Ok(workflow);
        }
        let model = self.store.load_workflow_definition(&run.id)?;
        let workflow = Arc::new(Workflow::try_from(&model)?);
        self.definitions.set(key, workflow.clone());
        Ok(workflow)
    }

    /// Drive a stored run until it terminates or waits for approval.
    ///
    /// Terminal runs are returned unchanged. Per-run action resources are
    /// released when the invocation ends, however it ends.
    pub async fn execute(
        &self,
        run_id: &str,
    ) -> Result<Run> {
        let _active = self.claim(run_id)?;
        let mut run = self.store.load_run(run_id)?;
        if run.status.is_terminal() {
            return Ok(run);
        }
        let workflow = self.compile(&run)?;

        let scope = RunScope {
            run_id: run.id.clone(),
            workflow_id: run.workflow_id.clone(),
            test_mode: run.test_mode,
        };
        let result = self.drive(&mut run, &workflow, &scope).await;
        self.registry.release_run(&scope).await;
        if let Ok(run) = &result {
            // scheduled runs resumed after approval settle here
            if let Err(err) = self.store.record_trigger_outcome(run) {
                warn!(run_id = %run.id, error = %err, "failed to record schedule outcome");
            }
        }
        result
    }

    async fn drive(
        &self,
        run: &mut Run,
        workflow: &Workflow,
        scope: &RunScope,
    ) -> Result<Run> {
        let resumed = run.started_at.is_some();
        for node in workflow.nodes() {
            run.node_states.entry(node.id.clone()).or_insert_with(NodeState::queued);
        }
        run.status = RunStatus::Running;
        if run.started_at.is_none() {
            run.started_at = Some(Utc::now());
        }
        let (event, name) = if resumed { (RunEvent::Resumed, "run_resumed") } else { (RunEvent::Started, "run_started") };
        self.log(run, LogEvent::new(LogLevel::Info, None, name, format!("workflow {} v{}", run.workflow_id, run.workflow_version)));
        self.checkpoint(run)?;
        self.emit(run, "", GraphEvent::Run(event));
        info!(run_id = %run.id, workflow_id = %run.workflow_id, resumed, "run started");

        let deadline = Deadline::after(Duration::from_millis(workflow.execution().global_timeout_ms));
        let order = workflow.order_nodes();

        loop {
            let open: Vec<NodeId> = workflow.nodes().filter(|n| !run.node_status(&n.id).is_terminal()).map(|n| n.id.clone()).collect();
            if open.is_empty() {
                return self.finish(run);
            }
            if deadline.is_expired() {
                return self.abort_open(run, &open, deadline.error(), "run_timeout", ErrorReason::Timeout);
            }

            let mut progressed = false;
            for node in order.iter().copied() {
                let predecessors: Vec<_> = workflow.predecessors(&node.id).iter().map(|p| run.node_status(&p.id)).collect();
                let state = run.node_states.get(&node.id).cloned().unwrap_or_default();

                match transition(&state, predecessors) {
                    Transition::Settled | Transition::NotReady => {}
                    Transition::Skip => {
                        self.skip(run, node)?;
                        progressed = true;
                    }
                    Transition::Execute => match self.execute_node(run, workflow, node, scope, &deadline).await? {
                        NodeOutcome::Settled => progressed = true,
                        NodeOutcome::Suspended => return Ok(run.clone()),
                        NodeOutcome::RunTimeout => {
                            let open: Vec<NodeId> = workflow.nodes().filter(|n| !run.node_status(&n.id).is_terminal()).map(|n| n.id.clone()).collect();
                            return self.abort_open(run, &open, deadline.error(), "run_timeout", ErrorReason::Timeout);
                        }
                    },
                }
            }

            if !progressed {
                let error = AutoflowError::Run(format!("deadlock: no runnable node among {}", open.join(", ")));
                return self.abort_open(run, &open, error, "deadlock", ErrorReason::Deadlock);
            }
        }
    }

    fn skip(
        &self,
        run: &mut Run,
        node: &Node,
    ) -> Result<()> {
        let reason = "upstream node failed or was skipped".to_string();
        self.state_mut(run, &node.id).mark_skipped(reason.clone())?;
        self.log(run, LogEvent::new(LogLevel::Warn, Some(&node.id), "node_skipped", reason));
        self.checkpoint(run)?;
        self.emit(run, &node.id, GraphEvent::Node(NodeEvent::Skipped));
        debug!(run_id = %run.id, node_id = %node.id, "node skipped");
        Ok(())
    }

    async fn execute_node(
        &self,
        run: &mut Run,
        workflow: &Workflow,
        node: &Node,
        scope: &RunScope,
        deadline: &Deadline,
    ) -> Result<NodeOutcome> {
        let policy = RetryPolicy::for_node(node, workflow.execution());
        self.state_mut(run, &node.id).mark_running()?;
        self.checkpoint(run)?;
        self.emit(run, &node.id, GraphEvent::Node(NodeEvent::Running));

        let action = match self.registry.get(node.kind) {
            Ok(action) => action,
            Err(err) => {
                self.fail_node(run, node, 0, err.to_string())?;
                return Ok(NodeOutcome::Settled);
            }
        };

        let mut attempt = 0;
        let error = loop {
            attempt += 1;
            self.state_mut(run, &node.id).attempts = attempt;

            let (config, result) = match node.render(&run.context, self.secrets.as_ref()) {
                Ok(config) => {
                    let result = policy.attempt(deadline, action.run(&node.id, &config, &mut run.context, scope)).await;
                    (config, result)
                }
                Err(err) => (node.config.clone(), Err(err)),
            };

            let err = match result {
                Ok(output) => {
                    if let Some(value) = output.value {
                        run.context.set(node.output_key(), value);
                    }
                    self.state_mut(run, &node.id).mark_succeeded(attempt, Some(node.output_key().to_string()))?;
                    run.checkpoint_node_id = Some(node.id.clone());
                    self.log(run, LogEvent::new(LogLevel::Info, Some(&node.id), "node_succeeded", format!("succeeded on attempt {}", attempt)).with_attempt(attempt));
                    self.checkpoint(run)?;
                    self.emit(run, &node.id, GraphEvent::Node(NodeEvent::Succeeded));
                    debug!(run_id = %run.id, node_id = %node.id, attempt, "node succeeded");
                    return Ok(NodeOutcome::Settled);
                }
                Err(err) => err,
            };

            if err.is_approval_required() {
                self.state_mut(run, &node.id).requeue()?;
                run.status = RunStatus::WaitingApproval;
                self.log(run, LogEvent::new(LogLevel::Info, Some(&node.id), "waiting_approval", err.to_string()));
                self.checkpoint(run)?;
                self.emit(run, &node.id, GraphEvent::Node(NodeEvent::Suspended));
                self.emit(run, &node.id, GraphEvent::Run(RunEvent::WaitingApproval(node.id.clone())));
                info!(run_id = %run.id, node_id = %node.id, "run waiting for approval");
                return Ok(NodeOutcome::Suspended);
            }
            if matches!(err, AutoflowError::RunTimeout(_)) {
                return Ok(NodeOutcome::RunTimeout);
            }

            warn!(run_id = %run.id, node_id = %node.id, attempt, error = %err, "node attempt failed");
            self.log(run, LogEvent::new(LogLevel::Warn, Some(&node.id), "retry_error", err.to_string()).with_attempt(attempt));
            let evidence = action.capture_evidence(&node.id, &config, scope, &err).await;
            run.artifacts.push(Artifact {
                id: utils::longid(),
                node_id: node.id.clone(),
                attempt,
                error: err.to_string(),
                captured_at: Utc::now(),
                data: evidence.unwrap_or(Value::Null),
            });
            self.checkpoint(run)?;

            if attempt >= policy.max_attempts() {
                break err;
            }

            let backoff = policy.backoff(attempt);
            let backoff_ms = backoff.as_millis() as u64;
            self.log(
                run,
                LogEvent::new(LogLevel::Info, Some(&node.id), "retrying", format!("attempt {} in {}ms", attempt + 1, backoff_ms))
                    .with_attempt(attempt + 1)
                    .with_backoff(backoff_ms),
            );
            self.checkpoint(run)?;
            self.emit(
                run,
                &node.id,
                GraphEvent::Node(NodeEvent::Retry {
                    attempt: attempt + 1,
                    backoff_ms,
                }),
            );
            if retry::sleep_backoff(backoff, deadline).await.is_err() {
                return Ok(NodeOutcome::RunTimeout);
            }
        };

        let exhausted = AutoflowError::Attempts {
            attempts: attempt,
            message: error.to_string(),
        };
        self.fail_node(run, node, attempt, exhausted.to_string())?;
        Ok(NodeOutcome::Settled)
    }

    fn fail_node(
        &self,
        run: &mut Run,
        node: &Node,
        attempts: u32,
        error: String,
    ) -> Result<()> {
        self.state_mut(run, &node.id).mark_failed(attempts, error.clone())?;
        self.log(run, LogEvent::new(LogLevel::Error, Some(&node.id), "node_failed", error.clone()).with_attempt(attempts));
        self.checkpoint(run)?;
        self.emit(run, &node.id, GraphEvent::Node(NodeEvent::Failed(ErrorReason::Failed(error))));
        Ok(())
    }

    /// Fail every open node with the same loop-level error and finish the run.
    fn abort_open(
        &self,
        run: &mut Run,
        open: &[NodeId],
        error: AutoflowError,
        event: &str,
        reason: ErrorReason,
    ) -> Result<Run> {
        let message = error.to_string();
        warn!(run_id = %run.id, open = open.len(), error = %message, "run aborted");
        for nid in open {
            let state = self.state_mut(run, nid);
            let attempts = state.attempts;
            state.mark_failed(attempts, message.clone())?;
            self.emit(run, nid, GraphEvent::Node(NodeEvent::Failed(reason.clone())));
        }
        self.log(run, LogEvent::new(LogLevel::Error, None, event, message.clone()));
        run.error = Some(message);
        self.finish(run)
    }

    fn finish(
        &self,
        run: &mut Run,
    ) -> Result<Run> {
        let failed = run.has_failed_node();
        run.status = if failed { RunStatus::Failed } else { RunStatus::Succeeded };
        run.finished_at = Some(Utc::now());

        let event = if failed {
            if run.error.is_none() {
                let mut failures: Vec<(&NodeId, &NodeState)> = run.node_states.iter().filter(|(_, s)| s.status == NodeStatus::Failed).collect();
                failures.sort_by_key(|(nid, _)| nid.as_str());
                run.error = failures.first().map(|(nid, s)| format!("node '{}' failed: {}", nid, s.error.as_deref().unwrap_or_default()));
            }
            let error = run.error.clone().unwrap_or_default();
            self.log(run, LogEvent::new(LogLevel::Error, None, "run_failed", error.clone()));
            RunEvent::Failed(error)
        } else {
            self.log(run, LogEvent::new(LogLevel::Info, None, "run_succeeded", "all nodes settled"));
            RunEvent::Succeeded
        };
        self.checkpoint(run)?;
        self.emit(run, "", GraphEvent::Run(event));
        info!(run_id = %run.id, status = run.status.as_ref(), "run finished");
        Ok(run.clone())
    }

    fn state_mut<'a>(
        &self,
        run: &'a mut Run,
        nid: &str,
    ) -> &'a mut NodeState {
        run.node_states.entry(nid.to_string()).or_insert_with(NodeState::queued)
    }

    fn checkpoint(
        &self,
        run: &Run,
    ) -> Result<()> {
        self.store.save_run_state(&run.id, RunPatch::checkpoint(run))?;
        Ok(())
    }

    fn log(
        &self,
        run: &mut Run,
        entry: LogEvent,
    ) {
        self.channel.emit_log(Log {
            run_id: run.id.clone(),
            nid: entry.node_id.clone().unwrap_or_default(),
            entry: entry.clone(),
        });
        run.log(entry);
    }

    fn emit(
        &self,
        run: &Run,
        nid: &str,
        event: GraphEvent,
    ) {
        self.channel.emit(Message {
            run_id: run.id.clone(),
            workflow_id: run.workflow_id.clone(),
            nid: nid.to_string(),
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::runtime::Handle;

    use super::*;
    use crate::{
        model::{EdgeModel, NodeModel, WorkflowModel},
        runtime::{ExecutionContext, RunOptions},
        store::{DbStore, MemStore},
        workflow::{
            actions::{Action, ActionOutput, NodeConfig, NodeKind},
            template::StaticSecrets,
        },
    };

    /// What the store held when a node body started.
    #[derive(Debug, Clone, PartialEq)]
    struct Observed {
        nid: NodeId,
        own_status: NodeStatus,
        checkpoint_node_id: Option<NodeId>,
    }

    struct Recorder {
        store: Arc<Store>,
        calls: Mutex<Vec<Observed>>,
    }

    #[async_trait]
    impl Action for Recorder {
        fn kind(&self) -> NodeKind {
            NodeKind::Delay
        }

        async fn run(
            &self,
            nid: &NodeId,
            _config: &NodeConfig,
            _ctx: &mut ExecutionContext,
            scope: &RunScope,
        ) -> Result<ActionOutput> {
            let stored = self.store.load_run(&scope.run_id)?;
            self.calls.lock().unwrap().push(Observed {
                nid: nid.clone(),
                own_status: stored.node_status(nid),
                checkpoint_node_id: stored.checkpoint_node_id.clone(),
            });
            Ok(ActionOutput::value(json!(nid)))
        }
    }

    fn setup() -> (Arc<Store>, Arc<Recorder>, Dispatcher) {
        let store = Store::new();
        MemStore::new().init(&store);
        let store = Arc::new(store);
        store
            .deploy(&WorkflowModel {
                id: "wf".into(),
                nodes: ["a", "b", "c"].iter().map(|id| NodeModel::new(*id, "delay", Value::Null)).collect(),
                edges: vec![EdgeModel::new("a", "b"), EdgeModel::new("b", "c")],
                ..Default::default()
            })
            .unwrap();

        let recorder = Arc::new(Recorder {
            store: store.clone(),
            calls: Mutex::new(Vec::new()),
        });
        let mut registry = ActionRegistry::empty();
        registry.register(recorder.clone());
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(Channel::new(Handle::current())), Arc::new(registry), Arc::new(StaticSecrets::default()), None);
        (store, recorder, dispatcher)
    }

    #[tokio::test]
    async fn test_every_transition_is_checkpointed_before_the_next_node() {
        let (store, recorder, dispatcher) = setup();
        let run = Run::new("wf", 1, ExecutionContext::default(), &RunOptions::default());
        store.create_run(&run).unwrap();

        let finished = dispatcher.execute(&run.id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Succeeded);

        let calls = recorder.calls.lock().unwrap().clone();
        let expected = [("a", None), ("b", Some("a")), ("c", Some("b"))];
        assert_eq!(calls.len(), expected.len());
        for (observed, (nid, checkpoint)) in calls.iter().zip(expected) {
            assert_eq!(observed.nid, nid);
            assert_eq!(observed.own_status, NodeStatus::Running);
            assert_eq!(observed.checkpoint_node_id.as_deref(), checkpoint);
        }

        let stored = store.load_run(&run.id).unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert_eq!(stored.checkpoint_node_id.as_deref(), Some("c"));
        assert_eq!(stored.context.get("b"), Some(&json!("b")));
        assert_eq!(stored.logs, finished.logs);
    }

    #[tokio::test]
    async fn test_resume_after_crash_skips_settled_nodes() {
        let (store, recorder, dispatcher) = setup();

        // a run persisted mid-flight: `a` done, `b` interrupted while running
        let mut run = Run::new("wf", 1, ExecutionContext::default(), &RunOptions::default());
        let mut done = NodeState::queued();
        done.mark_running().unwrap();
        done.mark_succeeded(1, Some("a".into())).unwrap();
        let mut interrupted = NodeState::queued();
        interrupted.mark_running().unwrap();
        interrupted.attempts = 1;
        run.node_states.insert("a".into(), done.clone());
        run.node_states.insert("b".into(), interrupted);
        run.node_states.insert("c".into(), NodeState::queued());
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        run.checkpoint_node_id = Some("a".into());
        run.context.set("a", "a");
        store.create_run(&run).unwrap();

        let resumed = dispatcher.execute(&run.id).await.unwrap();
        assert_eq!(resumed.status, RunStatus::Succeeded);

        let executed: Vec<NodeId> = recorder.calls.lock().unwrap().iter().map(|o| o.nid.clone()).collect();
        assert_eq!(executed, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(resumed.node_states["a"], done);
        assert_eq!(resumed.node_status("b"), NodeStatus::Succeeded);
        assert_eq!(resumed.node_states["b"].attempts, 1);
        assert_eq!(resumed.checkpoint_node_id.as_deref(), Some("c"));
        assert!(resumed.logs.iter().any(|l| l.event == "run_resumed"));
        assert!(!resumed.logs.iter().any(|l| l.event == "run_started"));

        // a settled run is returned untouched
        let again = dispatcher.execute(&run.id).await.unwrap();
        assert_eq!(again.logs.len(), resumed.logs.len());
        assert_eq!(recorder.calls.lock().unwrap().len(), 2);
    }
}
