use std::{sync::Arc, time::Duration};

use tokio::runtime::{Builder, Runtime};

use crate::{
    Config, Engine, FlowError, Result, StoreType,
    runtime::{Channel, Executor, GraphCache, TriggerRouter, executor::GRAPH_CACHE_SIZE},
    store::{DbStore, MemStore, PostgresStore, Store},
    utils::time::{Clock, SystemClock},
    workflow::actions::{ChatPoster, Dispatchers, EmailDispatcher, HttpCaller, MailSender, ReqwestHttpCaller, SlackDispatcher, SlackWebhookPoster, WebhookDispatcher},
};

/// Assembles an [`Engine`] from a config and the delivery collaborators.
///
/// Without explicit collaborators the engine posts to Slack through the
/// configured incoming webhook (if any), calls webhooks with `reqwest`, and
/// fails email nodes because no mail transport is built in.
#[derive(Default)]
pub struct EngineBuilder {
    config: Config,
    rt: Option<Arc<Runtime>>,
    clock: Option<Arc<dyn Clock>>,
    mail_sender: Option<Arc<dyn MailSender>>,
    chat_poster: Option<Arc<dyn ChatPoster>>,
    http_caller: Option<Arc<dyn HttpCaller>>,
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
        self.config.async_worker_thread_number = n;
        self
    }

    /// Number of concurrent worker tasks driving runs.
    pub fn workers(
        mut self,
        n: usize,
    ) -> Self {
        self.config.scheduler.workers = n;
        self
    }

    pub fn runtime(
        mut self,
        runtime: Arc<Runtime>,
    ) -> Self {
        self.rt = Some(runtime);
        self
    }

    pub fn clock(
        mut self,
        clock: Arc<dyn Clock>,
    ) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn mail_sender(
        mut self,
        sender: Arc<dyn MailSender>,
    ) -> Self {
        self.mail_sender = Some(sender);
        self
    }

    pub fn chat_poster(
        mut self,
        poster: Arc<dyn ChatPoster>,
    ) -> Self {
        self.chat_poster = Some(poster);
        self
    }

    pub fn http_caller(
        mut self,
        caller: Arc<dyn HttpCaller>,
    ) -> Self {
        self.http_caller = Some(caller);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;

        let runtime = match self.rt {
            Some(rt) => rt,
            None => Arc::new(Builder::new_multi_thread().worker_threads(config.async_worker_thread_number.into()).enable_all().build()?),
        };

        let store = Arc::new(Store::new());
        let db: Box<dyn DbStore> = match config.store.store_type {
            StoreType::Mem => Box::new(MemStore::new()),
            StoreType::Postgres => {
                let postgres = config.store.postgres.as_ref().ok_or_else(|| FlowError::Config("store.postgres is required when store_type is postgres".to_string()))?;
                Box::new(PostgresStore::new(&postgres.database_url, runtime.clone())?)
            }
        };
        db.init(&store)?;

        let timeout = Duration::from_millis(config.scheduler.dispatch_timeout_ms);
        let chat_poster = self.chat_poster.or_else(|| config.slack.webhook_url.as_deref().map(|url| Arc::new(SlackWebhookPoster::new(url, timeout)) as Arc<dyn ChatPoster>));
        let http_caller = self.http_caller.unwrap_or_else(|| Arc::new(ReqwestHttpCaller::new(timeout)));
        let dispatchers = Dispatchers {
            email: EmailDispatcher::new(self.mail_sender),
            slack: SlackDispatcher::new(chat_poster),
            webhook: WebhookDispatcher::new(http_caller),
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let channel = Arc::new(Channel::new());
        let graphs = GraphCache::new(store.clone(), GRAPH_CACHE_SIZE);
        let executor = Arc::new(Executor::new(store.clone(), graphs.clone(), dispatchers, channel.clone(), clock.clone(), config.scheduler.clone()));
        let router = TriggerRouter::new(store.clone(), graphs, channel.clone(), clock.clone());

        Ok(Engine::new(config, store, channel, executor, router, clock, runtime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = Config::default();
        config.scheduler.lease_ms = 10;
        assert!(matches!(EngineBuilder::new().config(config).build(), Err(FlowError::Config(_))));

        assert!(EngineBuilder::new().workers(0).build().is_err());
    }

    #[test]
    fn test_build_with_defaults() {
        let engine = EngineBuilder::new().async_worker_thread_number(1).build().unwrap();
        assert!(!engine.is_running());
        assert!(engine.list_workflows(true).unwrap().is_empty());
    }
}
