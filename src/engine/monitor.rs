use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{runtime::Handle, sync::broadcast::error::RecvError};
use tracing::{debug, warn};

use crate::{
    AutoflowError, Result, ShareLock,
    common::{Queue, Shutdown},
    events::{GraphEvent, RunEvent, RunNotification},
    runtime::Channel,
    utils,
};

const NOTIFICATION_QUEUE_SIZE: usize = 1024;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Receiver of run lifecycle notifications.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(
        &self,
        notification: &RunNotification,
    ) -> Result<()>;
}

/// Posts notifications as JSON to an HTTP endpoint.
pub struct WebhookSink {
    url: String,
    /// event names to deliver; empty delivers everything
    events: Vec<String>,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(
        url: impl Into<String>,
        events: Vec<String>,
    ) -> Self {
        Self {
            url: url.into(),
            events,
            client: reqwest::Client::new(),
        }
    }

    fn accepts(
        &self,
        event: &str,
    ) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event)
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    fn name(&self) -> &str {
        &self.url
    }

    async fn deliver(
        &self,
        notification: &RunNotification,
    ) -> Result<()> {
        if !self.accepts(&notification.event) {
            return Ok(());
        }
        self.client
            .post(&self.url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(notification)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| AutoflowError::Engine(format!("webhook {} failed: {}", self.url, e)))?;
        Ok(())
    }
}

fn notification(
    run_id: &str,
    workflow_id: &str,
    event: &RunEvent,
) -> RunNotification {
    let (node_id, error) = match event {
        RunEvent::WaitingApproval(nid) => (Some(nid.clone()), None),
        RunEvent::Failed(err) => (None, Some(err.clone())),
        _ => (None, None),
    };
    RunNotification {
        event: event.name().to_string(),
        run_id: run_id.to_string(),
        workflow_id: workflow_id.to_string(),
        node_id,
        error,
        timestamp: utils::time::time_millis(),
    }
}

/// Forwards run lifecycle events from the channel to the registered sinks.
///
/// Delivery is best-effort: the broadcast side only enqueues, a separate
/// worker talks to the sinks and logs failures.
pub struct Monitor {
    channel: Arc<Channel>,
    sinks: ShareLock<Vec<Arc<dyn EventSink>>>,
    queue: Arc<Queue<RunNotification>>,
    handle: Handle,
    shutdown: Arc<Shutdown>,
}

impl Monitor {
    pub fn new(
        channel: Arc<Channel>,
        handle: Handle,
    ) -> Self {
        Self {
            channel,
            sinks: Arc::new(RwLock::new(Vec::new())),
            queue: Queue::new(NOTIFICATION_QUEUE_SIZE),
            handle,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub fn add_sink(
        &self,
        sink: Arc<dyn EventSink>,
    ) {
        if let Ok(mut sinks) = self.sinks.write() {
            sinks.push(sink);
        }
    }

    pub fn monitor(&self) {
        let mut event_queue = self.channel.event_queue().subscribe();
        let queue = self.queue.clone();
        let shutdown = self.shutdown.wait();
        self.handle.spawn(async move {
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    msg = event_queue.recv() => {
                        let msg = match msg {
                            Ok(msg) => msg,
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, "monitor lagged behind the event queue");
                                continue;
                            }
                            Err(RecvError::Closed) => break,
                        };
                        if let GraphEvent::Run(event) = &msg.event {
                            if let Err(err) = queue.send(notification(&msg.run_id, &msg.workflow_id, event)) {
                                warn!(run_id = %msg.run_id, error = %err, "notification dropped");
                            }
                        }
                    }
                }
            }
        });

        let queue = self.queue.clone();
        let sinks = self.sinks.clone();
        let shutdown = self.shutdown.wait();
        self.handle.spawn(async move {
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    Some(notification) = queue.next_async() => {
                        let targets = sinks.read().map(|s| s.clone()).unwrap_or_default();
                        for sink in targets {
                            match sink.deliver(&notification).await {
                                Ok(()) => debug!(sink = sink.name(), event = %notification.event, run_id = %notification.run_id, "notification delivered"),
                                Err(err) => warn!(sink = sink.name(), event = %notification.event, run_id = %notification.run_id, error = %err, "notification delivery failed"),
                            }
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        self.shutdown.shutdown();
    }
}
