use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::client::{Client, ClientOptions, InnerConsumer, SubscriptionData};
use crate::consumer::consume_service::{
    ConcurrentConsumeService, MessageListenerConcurrently, MessageListenerOrderly, OrderlyConsumeService,
};
use crate::consumer::offset_store::{OffsetStorage, OffsetStore};
use crate::consumer::pull_scheduler::{ConsumeDispatch, PullScheduler};
use crate::consumer::rebalance::{Rebalance, RebalanceMode};
use crate::consumer::strategy::{AllocateAveragely, AllocateStrategy};
use crate::error::ClientError;
use crate::message::MessageQueue;
use crate::namesrv::NameServer;
use crate::resolver::{HttpResolver, PassthroughResolver, Resolver};
use crate::Error;

pub mod consume_service;
pub mod offset_store;
pub mod process_queue;
pub mod pull_request;
pub mod pull_scheduler;
pub mod rebalance;
pub mod strategy;
pub mod subscription;

/// Push-model consumer wrapping a `Consumer`.
pub mod push;

/// Application-driven pull consumer.
pub mod pull;

/// Clustering splits a topic's queues across the group's live consumers; broadcasting hands
/// every queue to every consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageModel {
    Clustering,
    Broadcasting,
}

impl MessageModel {
    fn as_str(&self) -> &'static str {
        match self {
            MessageModel::Clustering => "CLUSTERING",
            MessageModel::Broadcasting => "BROADCASTING",
        }
    }
}

/// Where a newly-assigned queue with no persisted offset should start consuming from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeFromWhere {
    ConsumeFromLastOffset,
    ConsumeFromFirstOffset,
    ConsumeFromTimestamp(i64),
}

impl ConsumeFromWhere {
    fn as_str(&self) -> &'static str {
        match self {
            ConsumeFromWhere::ConsumeFromLastOffset => "CONSUME_FROM_LAST_OFFSET",
            ConsumeFromWhere::ConsumeFromFirstOffset => "CONSUME_FROM_FIRST_OFFSET",
            ConsumeFromWhere::ConsumeFromTimestamp(_) => "CONSUME_FROM_TIMESTAMP",
        }
    }
}

/// RocketMQ consumer options.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    client_options: ClientOptions,
    resolver: Resolver,
    message_model: MessageModel,
    consume_from_where: ConsumeFromWhere,
    allocate_strategy: AllocateStrategy,
    consume_thread_count: usize,
    consume_message_batch_max_size: usize,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        let mut client_options = ClientOptions::default();
        client_options.group_name = "DEFAULT_CONSUMER".to_string();
        Self {
            client_options,
            resolver: Resolver::Http(HttpResolver::new("DEFAULT".to_string())),
            message_model: MessageModel::Clustering,
            consume_from_where: ConsumeFromWhere::ConsumeFromLastOffset,
            allocate_strategy: AllocateStrategy::Averagely(AllocateAveragely),
            consume_thread_count: 20,
            consume_message_batch_max_size: 1,
        }
    }
}

impl ConsumerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_options(client_options: ClientOptions) -> Self {
        Self {
            client_options,
            ..Default::default()
        }
    }

    pub fn group_name(&self) -> &str {
        &self.client_options.group_name
    }

    pub(crate) fn client_options(&self) -> &ClientOptions {
        &self.client_options
    }

    pub(crate) fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn set_message_model(&mut self, model: MessageModel) -> &mut Self {
        self.message_model = model;
        self
    }

    pub fn set_consume_from_where(&mut self, from: ConsumeFromWhere) -> &mut Self {
        self.consume_from_where = from;
        self
    }

    pub fn set_allocate_strategy(&mut self, strategy: AllocateStrategy) -> &mut Self {
        self.allocate_strategy = strategy;
        self
    }

    pub fn set_consume_thread_count(&mut self, count: usize) -> &mut Self {
        self.consume_thread_count = count;
        self
    }

    pub fn set_consume_message_batch_max_size(&mut self, size: usize) -> &mut Self {
        self.consume_message_batch_max_size = size;
        self
    }

    pub fn set_resolver(&mut self, resolver: Resolver) -> &mut Self {
        self.resolver = resolver;
        self
    }

    pub fn set_name_server(&mut self, addrs: Vec<String>) -> &mut Self {
        self.resolver = Resolver::PassthroughHttp(PassthroughResolver::new(
            addrs,
            HttpResolver::new("DEFAULT".to_string()),
        ));
        self
    }

    pub fn set_name_server_domain(&mut self, url: &str) -> &mut Self {
        self.resolver = Resolver::Http(HttpResolver::with_domain(
            "DEFAULT".to_string(),
            url.to_string(),
        ));
        self
    }
}

enum ListenerRegistration {
    Concurrently(Arc<dyn MessageListenerConcurrently>),
    Orderly(Arc<dyn MessageListenerOrderly>),
}

/// Shared state between `Consumer` and the `InnerConsumer` handle registered with `Client`: the
/// rebalance engine only exists once `start` has built it, so `Client`'s periodic rebalance
/// tick needs a way to reach it that doesn't require `start` and `register_consumer` to race.
#[derive(Default)]
struct SharedRuntime {
    rebalance: Option<Arc<Rebalance>>,
}

/// Drives rebalance, pull scheduling and dispatch for a consumer group. `PushConsumer` is a
/// thin wrapper around this; `pull::PullConsumer` is a separate, simpler type for
/// application-driven pulling that doesn't need this engine's background loops.
pub struct Consumer {
    client: Client<Resolver>,
    options: ConsumerOptions,
    subscriptions: Arc<RwLock<HashMap<String, SubscriptionData>>>,
    topic_subscribe_info: Arc<RwLock<HashMap<String, Vec<MessageQueue>>>>,
    listener: Mutex<Option<ListenerRegistration>>,
    runtime: Arc<Mutex<SharedRuntime>>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("group_name", &self.options.group_name())
            .field("message_model", &self.options.message_model)
            .finish()
    }
}

impl Consumer {
    pub fn new() -> Result<Self, Error> {
        Self::with_options(ConsumerOptions::default())
    }

    pub fn with_options(options: ConsumerOptions) -> Result<Self, Error> {
        let client_options = options.client_options.clone();
        let name_server =
            NameServer::new(options.resolver.clone(), client_options.credentials.clone())?;
        Ok(Self {
            client: Client::new(client_options, name_server),
            options,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            topic_subscribe_info: Arc::new(RwLock::new(HashMap::new())),
            listener: Mutex::new(None),
            runtime: Arc::new(Mutex::new(SharedRuntime::default())),
        })
    }

    /// Registers interest in `topic`, filtered by a tag expression (`"*"` for everything).
    pub fn subscribe(&self, topic: &str, sub_expression: &str) -> Result<(), Error> {
        let sub = subscription::build_subscription_data(topic, sub_expression)?;
        self.subscriptions.write().insert(topic.to_string(), sub);
        Ok(())
    }

    pub fn register_message_listener_concurrently(&self, listener: Arc<dyn MessageListenerConcurrently>) {
        *self.listener.lock() = Some(ListenerRegistration::Concurrently(listener));
    }

    pub fn register_message_listener_orderly(&self, listener: Arc<dyn MessageListenerOrderly>) {
        *self.listener.lock() = Some(ListenerRegistration::Orderly(listener));
    }

    /// Builds the offset store, rebalance engine, consume service and pull scheduler, then
    /// starts the underlying client. Idempotent; a second call is a no-op.
    pub fn start(&self) -> Result<(), Error> {
        if self.runtime.lock().rebalance.is_some() {
            return Ok(());
        }
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or(Error::Client(ClientError::NoListenerRegistered))?;
        let orderly = matches!(listener, ListenerRegistration::Orderly(_));

        let offset_store: Arc<dyn OffsetStore + Send + Sync> = match self.options.message_model {
            MessageModel::Broadcasting => Arc::new(OffsetStorage::LocalFile(
                offset_store::LocalFileOffsetStore::new(self.client.client_id(), self.options.group_name())?,
            )),
            MessageModel::Clustering => Arc::new(OffsetStorage::RemoteBroker(
                offset_store::RemoteBrokerOffsetStore::new(self.options.group_name(), self.client.clone()),
            )),
        };

        let rebalance = Arc::new(Rebalance::new(
            self.options.group_name().to_string(),
            self.client.clone(),
            RebalanceMode::Push,
            orderly,
            self.options.consume_from_where,
            self.options.allocate_strategy.clone(),
            offset_store.clone(),
        ));

        let consume_service: Arc<dyn ConsumeDispatch + Send + Sync> = match listener {
            ListenerRegistration::Concurrently(listener) => ConcurrentConsumeService::new(
                self.options.group_name().to_string(),
                self.client.clone(),
                offset_store.clone(),
                self.subscriptions.clone(),
                listener,
                self.options.message_model,
                self.options.consume_thread_count,
                self.options.consume_message_batch_max_size,
            ),
            ListenerRegistration::Orderly(listener) => OrderlyConsumeService::new(
                self.options.group_name().to_string(),
                self.client.clone(),
                offset_store.clone(),
                self.subscriptions.clone(),
                listener,
                self.options.message_model,
                self.options.consume_thread_count,
                self.options.consume_message_batch_max_size,
            ),
        };

        let scheduler = PullScheduler::new(
            self.client.clone(),
            rebalance.clone(),
            offset_store.clone(),
            consume_service,
            self.subscriptions.clone(),
            orderly,
        );

        self.runtime.lock().rebalance = Some(rebalance.clone());

        let handle = Arc::new(InnerConsumerHandle {
            client: self.client.clone(),
            options: self.options.clone(),
            subscriptions: self.subscriptions.clone(),
            topic_subscribe_info: self.topic_subscribe_info.clone(),
            offset_store,
            runtime: self.runtime.clone(),
        });
        self.client.register_consumer(self.options.group_name(), handle);
        self.client.start();

        tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        if orderly {
            tokio::spawn({
                let rebalance = rebalance.clone();
                async move { rebalance.run_relock_loop().await }
            });
        }

        // Prime the subscribe-info cache and trigger the first rebalance pass immediately,
        // rather than waiting for the next scheduled route/rebalance poll.
        for topic in self.subscriptions.read().keys().cloned().collect::<Vec<_>>() {
            let client = self.client.clone();
            let topic_subscribe_info = self.topic_subscribe_info.clone();
            let rebalance = rebalance.clone();
            tokio::spawn(async move {
                match client.name_server.update_topic_route_info(&topic).await {
                    Ok((route, changed)) => {
                        let mqs = route.to_subscribe_info(&topic);
                        topic_subscribe_info.write().insert(topic.clone(), mqs.clone());
                        client.update_publish_info(&topic, route, changed);
                        let broker_addr = mqs
                            .first()
                            .and_then(|mq| client.name_server.find_broker_addr_by_name(&mq.broker_name));
                        if let Some(broker_addr) = broker_addr {
                            if let Err(err) = rebalance.rebalance_topic(&topic, &mqs, &broker_addr).await {
                                warn!(topic = %topic, error = %err, "initial rebalance failed");
                            }
                        }
                    }
                    Err(err) => warn!(topic = %topic, error = %err, "initial route fetch failed"),
                }
            });
        }

        Ok(())
    }

    pub fn shutdown(&self) {
        self.client.unregister_consumer(self.options.group_name());
        self.client.shutdown();
        self.runtime.lock().rebalance = None;
    }
}

/// Bridges `Client`'s scheduled heartbeat/rebalance/offset-persist loop to this consumer's
/// rebalance engine and subscription tables.
struct InnerConsumerHandle {
    client: Client<Resolver>,
    options: ConsumerOptions,
    subscriptions: Arc<RwLock<HashMap<String, SubscriptionData>>>,
    topic_subscribe_info: Arc<RwLock<HashMap<String, Vec<MessageQueue>>>>,
    offset_store: Arc<dyn OffsetStore + Send + Sync>,
    runtime: Arc<Mutex<SharedRuntime>>,
}

impl InnerConsumer for InnerConsumerHandle {
    fn persist_consumer_offset(&self) -> Result<(), Error> {
        // `OffsetStore::persist` is async; the scheduled loop that calls this is sync, so we
        // fire off a background task rather than block it. Errors are logged by the store
        // itself, so there's nothing further to surface here.
        let rebalance = match self.runtime.lock().rebalance.clone() {
            Some(rebalance) => rebalance,
            None => return Ok(()),
        };
        let offset_store = self.offset_store.clone();
        tokio::spawn(async move {
            let mqs: Vec<MessageQueue> =
                rebalance.assigned_requests().iter().map(|req| req.message_queue.clone()).collect();
            offset_store.persist(&mqs).await;
        });
        Ok(())
    }

    fn update_topic_subscribe_info(&self, topic: &str, mqs: &[MessageQueue]) {
        if !self.subscriptions.read().contains_key(topic) {
            return;
        }
        self.topic_subscribe_info.write().insert(topic.to_string(), mqs.to_vec());
    }

    fn is_subscribe_topic_need_update(&self, topic: &str) -> bool {
        self.subscriptions.read().contains_key(topic)
            && !self
                .topic_subscribe_info
                .read()
                .get(topic)
                .map(|mqs| !mqs.is_empty())
                .unwrap_or(false)
    }

    fn rebalance(&self) {
        let rebalance = match self.runtime.lock().rebalance.clone() {
            Some(rebalance) => rebalance,
            None => return,
        };
        let topics: Vec<String> = self.subscriptions.read().keys().cloned().collect();
        let topic_subscribe_info = self.topic_subscribe_info.clone();
        let client = self.client.clone();
        for topic in topics {
            let rebalance = rebalance.clone();
            let topic_subscribe_info = topic_subscribe_info.clone();
            let client = client.clone();
            tokio::spawn(async move {
                let mqs = topic_subscribe_info.read().get(&topic).cloned();
                let mqs = match mqs {
                    Some(mqs) if !mqs.is_empty() => mqs,
                    _ => return,
                };
                let broker_addr = mqs
                    .first()
                    .and_then(|mq| client.name_server.find_broker_addr_by_name(&mq.broker_name));
                if let Some(broker_addr) = broker_addr {
                    if let Err(err) = rebalance.rebalance_topic(&topic, &mqs, &broker_addr).await {
                        warn!(topic = %topic, error = %err, "rebalance failed");
                    }
                }
            });
        }
    }

    fn get_c_type(&self) -> String {
        "PUSH".to_string()
    }

    fn get_model(&self) -> String {
        self.options.message_model.as_str().to_string()
    }

    fn get_where(&self) -> String {
        self.options.consume_from_where.as_str().to_string()
    }

    fn subscriptions(&self) -> Vec<SubscriptionData> {
        self.subscriptions.read().values().cloned().collect()
    }
}
