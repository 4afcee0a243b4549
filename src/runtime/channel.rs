use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::{
    FlowError, Result, ShareLock,
    common::{BroadcastQueue, Shutdown},
    events::Event,
};

macro_rules! dispatch_event {
    ($handles:expr, $(&$item:ident), +) => {
        let handlers = $handles.read().unwrap_or_else(|e| e.into_inner());
        for handle in handlers.iter() {
            (handle)($(&$item),+);
        }
    };
}

macro_rules! dispatch_event_async {
    ($handles:expr, $(&$item:ident), +) => {
        let handles = $handles.clone();

        tokio::spawn(async move {
            let handlers = handles.read().unwrap_or_else(|e| e.into_inner()).clone();
            for handle in handlers.iter() {
                (handle)($(&$item),+).await;
            }
        });
    };
}

const EVENT_QUEUE_SIZE: usize = 2048;

pub type RunEventHandle = Arc<dyn Fn(&Event) + Send + Sync>;
pub type RunEventHandleAsync = Arc<dyn Fn(&Event) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// use the glob pattern to match the run id
    /// eg. run1*
    pub run_id: String,

    /// use the glob pattern to match the node id
    /// eg. notify_*
    pub node_id: String,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            run_id: "*".to_string(),
            node_id: "*".to_string(),
        }
    }
}

impl ChannelOptions {
    pub fn new(
        run_id: &str,
        node_id: &str,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
        }
    }

    pub fn with_run_id(run_id: &str) -> Self {
        Self::new(run_id, "*")
    }

    pub fn with_node_id(node_id: &str) -> Self {
        Self::new("*", node_id)
    }
}

/// Fan-out of run events to registered handlers.
#[derive(Clone)]
pub struct Channel {
    event_queue: Arc<BroadcastQueue<Event>>,

    events: ShareLock<Vec<RunEventHandle>>,
    events_async: ShareLock<Vec<RunEventHandleAsync>>,

    shutdown: Arc<Shutdown>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    pub fn new() -> Self {
        Self {
            event_queue: BroadcastQueue::new(EVENT_QUEUE_SIZE),
            events: Arc::new(RwLock::new(Vec::new())),
            events_async: Arc::new(RwLock::new(Vec::new())),
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    /// Publishes an event. Without subscribers the event is dropped.
    pub(crate) fn emit(
        &self,
        event: Event,
    ) {
        let _ = self.event_queue.send(event);
    }

    pub(crate) fn listen(
        &self,
        handle: &Handle,
    ) {
        let mut event_queue = self.event_queue.subscribe();
        let events = self.events.clone();
        let events_async = self.events_async.clone();

        let shutdown = self.shutdown.clone();
        handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    Ok(e) = event_queue.recv() => {
                        let evt = e.clone();
                        dispatch_event!(events, &evt);
                        dispatch_event_async!(events_async, &e);
                    }
                }
            }
        });
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.shutdown();
    }
}

/// Handler registration scoped by run id and node id globs.
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
            globset::Glob::new(pattern).map(|g| g.compile_matcher()).map_err(|e| FlowError::Engine(format!("invalid channel pattern '{}': {}", pattern, e)))
        };

        Ok(Self {
            channel,
            glob: (compile(&options.run_id)?, compile(&options.node_id)?),
        })
    }

    /// Called with the run id once a matching run completes.
    pub fn on_complete(
        &self,
        f: impl Fn(&str) + Send + Sync + 'static,
    ) {
        self.push(move |e| {
            if e.event.is_complete() {
                f(&e.run_id);
            }
        });
    }

    pub fn on_error(
        &self,
        f: impl Fn(&Event) + Send + Sync + 'static,
    ) {
        self.push(move |e| {
            if e.event.is_error() {
                f(e);
            }
        });
    }

    pub fn on_event(
        &self,
        f: impl Fn(&Event) + Send + Sync + 'static,
    ) {
        self.push(f);
    }

    pub fn on_event_async<F>(
        &self,
        f: F,
    ) where
        F: Fn(&Event) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let glob = self.glob.clone();

        self.channel.events_async.write().unwrap_or_else(|e| e.into_inner()).push(Arc::new(move |e| {
            if is_match(&glob, e) {
                f(e)
            } else {
                Box::pin(async {})
            }
        }));
    }

    fn push(
        &self,
        f: impl Fn(&Event) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.channel.events.write().unwrap_or_else(|e| e.into_inner()).push(Arc::new(move |e| {
            if is_match(&glob, e) {
                f(e);
            }
        }));
    }
}

fn is_match(
    glob: &(globset::GlobMatcher, globset::GlobMatcher),
    e: &Event,
) -> bool {
    let (pat_run, pat_node) = glob;
    pat_run.is_match(&e.run_id) && pat_node.is_match(&e.node_id)
}
