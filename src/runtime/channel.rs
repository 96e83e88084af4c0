use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::{
    AutoflowError, Result, ShareLock,
    common::{BroadcastQueue, Shutdown},
    events::{Event, Log, Message},
    runtime::RunId,
};

macro_rules! dispatch_event {
    ($handles:expr, $(&$item:ident), +) => {
        let handlers = $handles.read().map(|h| h.clone()).unwrap_or_default();
        for handle in handlers.iter() {
            (handle)($(&$item),+);
        }
    };
}

macro_rules! dispatch_event_async {
    ($handles:expr, $(&$item:ident), +) => {
        let handles = $handles.clone();

        tokio::spawn(async move {
            let handlers = handles.read().map(|h| h.clone()).unwrap_or_default();
            for handle in handlers.iter() {
                (handle)($(&$item),+).await;
            }
        });
    };
}

const EVENT_QUEUE_SIZE: usize = 2048;
const LOG_QUEUE_SIZE: usize = 4096;

pub type RunEventHandle = Arc<dyn Fn(&Event<Message>) + Send + Sync>;
pub type RunLogHandle = Arc<dyn Fn(&Event<Log>) + Send + Sync>;
pub type RunEventHandleAsync = Arc<dyn Fn(&Event<Message>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// glob pattern matched against the run id, eg. `run1*`
    pub run_id: String,

    /// glob pattern matched against the node id, eg. `fetch-*`
    pub nid: String,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            run_id: "*".to_string(),
            nid: "*".to_string(),
        }
    }
}

impl ChannelOptions {
    pub fn new(
        run_id: String,
        nid: String,
    ) -> Self {
        Self {
            run_id,
            nid,
        }
    }

    pub fn with_run_id(run_id: String) -> Self {
        Self {
            run_id,
            nid: "*".to_string(),
        }
    }

    pub fn with_nid(nid: String) -> Self {
        Self {
            run_id: "*".to_string(),
            nid,
        }
    }
}

/// In-process pub/sub for run events and logs.
#[derive(Clone)]
pub struct Channel {
    event_queue: Arc<BroadcastQueue<Event<Message>>>,
    log_queue: Arc<BroadcastQueue<Event<Log>>>,

    events: ShareLock<Vec<RunEventHandle>>,
    logs: ShareLock<Vec<RunLogHandle>>,
    events_async: ShareLock<Vec<RunEventHandleAsync>>,

    handle: Handle,
    shutdown: Arc<Shutdown>,
}

impl Channel {
    pub(crate) fn new(handle: Handle) -> Self {
        Self {
            event_queue: BroadcastQueue::new(EVENT_QUEUE_SIZE),
            log_queue: BroadcastQueue::new(LOG_QUEUE_SIZE),
            events: Arc::new(RwLock::new(Vec::new())),
            logs: Arc::new(RwLock::new(Vec::new())),
            events_async: Arc::new(RwLock::new(Vec::new())),
            handle,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub(crate) fn event_queue(&self) -> Arc<BroadcastQueue<Event<Message>>> {
        self.event_queue.clone()
    }

    pub(crate) fn emit(
        &self,
        message: Message,
    ) {
        let _ = self.event_queue.send(Event::new(&message));
    }

    pub(crate) fn emit_log(
        &self,
        log: Log,
    ) {
        let _ = self.log_queue.send(Event::new(&log));
    }

    pub(crate) fn listen(&self) {
        let mut event_queue = self.event_queue.subscribe();
        let mut log_queue = self.log_queue.subscribe();
        let events = self.events.clone();
        let logs = self.logs.clone();
        let events_async = self.events_async.clone();

        let shutdown = self.shutdown.wait();
        self.handle.spawn(async move {
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    Ok(e) = event_queue.recv() => {
                        let evt = e.clone();
                        dispatch_event!(events, &evt);
                        dispatch_event_async!(events_async, &e);
                    }
                    Ok(log) = log_queue.recv() => {
                        dispatch_event!(logs, &log);
                    }
                }
            }
        });
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.shutdown();
    }
}

/// Glob-filtered subscription helper over a [`Channel`].
#[derive(Clone)]
pub struct ChannelEvent {
    channel: Arc<Channel>,

    glob: (globset::GlobMatcher, globset::GlobMatcher),
}

impl ChannelEvent {
    pub fn channel(
        channel: Arc<Channel>,
        options: ChannelOptions,
    ) -> Result<Self> {
        let compile = |pattern: &str| {
            globset::Glob::new(pattern).map(|g| g.compile_matcher()).map_err(|e| AutoflowError::Engine(format!("invalid channel pattern '{}': {}", pattern, e)))
        };
        Ok(Self {
            glob: (compile(&options.run_id)?, compile(&options.nid)?),
            channel,
        })
    }

    fn push_event(
        &self,
        handle: RunEventHandle,
    ) {
        if let Ok(mut events) = self.channel.events.write() {
            events.push(handle);
        }
    }

    pub fn on_complete(
        &self,
        f: impl Fn(RunId) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();
        self.push_event(Arc::new(move |e| {
            if e.event.is_complete() && is_match(&glob, &e.run_id, &e.nid) {
                f(e.run_id.clone());
            }
        }));
    }

    pub fn on_error(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();
        self.push_event(Arc::new(move |e| {
            if e.event.is_error() && is_match(&glob, &e.run_id, &e.nid) {
                f(e);
            }
        }));
    }

    pub fn on_waiting_approval(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();
        self.push_event(Arc::new(move |e| {
            if e.event.is_waiting() && is_match(&glob, &e.run_id, &e.nid) {
                f(e);
            }
        }));
    }

    pub fn on_event(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();
        self.push_event(Arc::new(move |e| {
            if is_match(&glob, &e.run_id, &e.nid) {
                f(e);
            }
        }));
    }

    pub fn on_log(
        &self,
        f: impl Fn(&Event<Log>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();
        if let Ok(mut logs) = self.channel.logs.write() {
            logs.push(Arc::new(move |e: &Event<Log>| {
                if is_match(&glob, &e.run_id, &e.nid) {
                    f(e);
                }
            }));
        }
    }

    pub fn on_event_async<F>(
        &self,
        f: F,
    ) where
        F: Fn(&Event<Message>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let glob = self.glob.clone();
        if let Ok(mut events) = self.channel.events_async.write() {
            events.push(Arc::new(move |e| {
                if is_match(&glob, &e.run_id, &e.nid) { f(e) } else { Box::pin(async {}) }
            }));
        }
    }
}

fn is_match(
    glob: &(globset::GlobMatcher, globset::GlobMatcher),
    run_id: &str,
    nid: &str,
) -> bool {
    let (pat_run, pat_nid) = glob;
    // run-level events carry an empty node id and only filter on the run
    pat_run.is_match(run_id) && (nid.is_empty() || pat_nid.is_match(nid))
}
