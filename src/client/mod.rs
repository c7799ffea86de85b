use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::message::MessageQueue;
use crate::namesrv::NameServer;
use crate::producer::ProducerInner;
use crate::protocol::{RemotingCommand, RequestCode};
use crate::resolver::NsResolver;
use crate::route::TopicRouteData;
use crate::utils;
use crate::Error;

pub mod model;
pub use model::{ConsumerData, HeartbeatData, ProducerData, SubscriptionData};

/// ACL credentials attached to every outgoing remoting command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub security_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            security_token: None,
        }
    }
}

/// Shared options for a producer or consumer's underlying client runtime.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub group_name: String,
    pub namespace: String,
    pub credentials: Option<Credentials>,
    pub unit_mode: bool,
    pub instance_name: String,
    pub heartbeat_interval: Duration,
    pub poll_name_server_interval: Duration,
    pub persist_consumer_offset_interval: Duration,
    pub rebalance_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            group_name: "DEFAULT_PRODUCER".to_string(),
            namespace: String::new(),
            credentials: None,
            unit_mode: false,
            instance_name: "DEFAULT".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            poll_name_server_interval: Duration::from_secs(30),
            persist_consumer_offset_interval: Duration::from_secs(5),
            rebalance_interval: Duration::from_secs(20),
        }
    }
}

/// Lifecycle state of a `Client`, mirroring the `ServiceState` enum the Java/C++ clients use
/// to guard against double-start and post-shutdown use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Created,
    Running,
    StartFailed,
    Shutdown,
}

/// Anything a `Client` can drive through the scheduled rebalance/heartbeat/offset-persist
/// loop, implemented by each concrete consumer kind (push, pull).
pub trait InnerConsumer {
    fn persist_consumer_offset(&self) -> Result<(), Error>;
    fn update_topic_subscribe_info(&self, topic: &str, mqs: &[MessageQueue]);
    fn is_subscribe_topic_need_update(&self, topic: &str) -> bool;
    fn rebalance(&self);
    fn get_c_type(&self) -> String;
    fn get_model(&self) -> String;
    fn get_where(&self) -> String;
    fn subscriptions(&self) -> Vec<SubscriptionData>;
}

#[derive(Default)]
struct ClientTables {
    producers: HashMap<String, Arc<Mutex<ProducerInner>>>,
    consumers: HashMap<String, Arc<dyn InnerConsumer + Send + Sync>>,
}

/// Process-local runtime shared by a producer or consumer: route/broker cache, the
/// remoting connection pool, and the scheduled heartbeat/rebalance/offset-persist loop.
///
/// Cloning is cheap; every clone shares the same underlying tables and connections, the way
/// a single `MQClientInstance` is shared by every producer/consumer in a JVM keyed by client
/// id.
#[derive(Clone)]
pub struct Client<NR: NsResolver> {
    client_id: Arc<str>,
    options: Arc<ClientOptions>,
    pub(crate) name_server: Arc<NameServer<NR>>,
    tables: Arc<RwLock<ClientTables>>,
    state: Arc<RwLock<ClientState>>,
    started: Arc<AtomicBool>,
}

impl<NR: NsResolver> fmt::Debug for Client<NR> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.client_id)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl<NR: NsResolver + Send + Sync + 'static> Client<NR> {
    pub fn new(options: ClientOptions, name_server: NameServer<NR>) -> Self {
        let client_ip = utils::client_ip_addr()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let client_id: Arc<str> = format!("{}@{}", client_ip, options.instance_name).into();
        Self {
            client_id,
            options: Arc::new(options),
            name_server: Arc::new(name_server),
            tables: Arc::new(RwLock::new(ClientTables::default())),
            state: Arc::new(RwLock::new(ClientState::Created)),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> ClientState {
        *self.state.read()
    }

    pub fn register_producer(&self, group: &str, producer: Arc<Mutex<ProducerInner>>) {
        self.tables.write().producers.insert(group.to_string(), producer);
    }

    pub fn unregister_producer(&self, group: &str) {
        self.tables.write().producers.remove(group);
    }

    pub fn register_consumer(&self, group: &str, consumer: Arc<dyn InnerConsumer + Send + Sync>) {
        self.tables.write().consumers.insert(group.to_string(), consumer);
    }

    pub fn unregister_consumer(&self, group: &str) {
        self.tables.write().consumers.remove(group);
    }

    pub async fn invoke(&self, addr: &str, cmd: RemotingCommand) -> Result<RemotingCommand, Error> {
        self.name_server.remoting_client().invoke(addr, cmd).await
    }

    pub async fn invoke_oneway(&self, addr: &str, cmd: RemotingCommand) -> Result<(), Error> {
        self.name_server.remoting_client().invoke_oneway(addr, cmd).await
    }

    /// Pushes a freshly-fetched route to every producer/consumer subscribed to `topic`, the
    /// way `MQClientInstance::updateTopicRouteInfoFromNameServer` fans a route update out to
    /// all local producers/consumers of that topic.
    pub fn update_publish_info(&self, topic: &str, route_data: TopicRouteData, changed: bool) {
        if !changed {
            return;
        }
        let info = route_data.to_publish_info(topic);
        for producer in self.tables.read().producers.values() {
            producer.lock().update_topic_publish_info(topic, info.clone());
        }
        let mqs = route_data.to_subscribe_info(topic);
        for consumer in self.tables.read().consumers.values() {
            consumer.update_topic_subscribe_info(topic, &mqs);
        }
    }

    /// Starts the client runtime: background tasks for broker route refresh, heartbeats,
    /// offset persistence and rebalance. Idempotent — calling `start` twice is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.write() = ClientState::Running;
        self.spawn_scheduled_tasks();
    }

    pub fn shutdown(&self) {
        if *self.state.read() == ClientState::Shutdown {
            return;
        }
        *self.state.write() = ClientState::Shutdown;
        self.name_server.remoting_client().shutdown();
    }

    fn spawn_scheduled_tasks(&self) {
        let route_client = self.clone();
        let heartbeat_client = self.clone();
        let offset_client = self.clone();
        let rebalance_client = self.clone();
        tokio::spawn(async move { route_client.poll_name_server_loop().await });
        tokio::spawn(async move { heartbeat_client.heartbeat_loop().await });
        tokio::spawn(async move { offset_client.persist_offset_loop().await });
        tokio::spawn(async move { rebalance_client.rebalance_loop().await });
    }

    async fn poll_name_server_loop(&self) {
        let mut ticker = tokio::time::interval(self.options.poll_name_server_interval);
        loop {
            ticker.tick().await;
            if self.state() == ClientState::Shutdown {
                return;
            }
            if let Err(err) = self.name_server.update().await {
                warn!(error = %err, "failed to refresh name server address list");
            }
            let topics: Vec<String> = {
                let tables = self.tables.read();
                let mut topics: Vec<String> = tables
                    .producers
                    .values()
                    .flat_map(|p| p.lock().publish_topic_list())
                    .collect();
                topics.extend(
                    tables
                        .consumers
                        .values()
                        .flat_map(|c| c.subscriptions().into_iter().map(|s| s.topic)),
                );
                topics
            };
            for topic in topics {
                match self.name_server.update_topic_route_info(&topic).await {
                    Ok((route, changed)) => self.update_publish_info(&topic, route, changed),
                    Err(err) => debug!(topic = %topic, error = %err, "route refresh failed"),
                }
            }
        }
    }

    async fn heartbeat_loop(&self) {
        let mut ticker = tokio::time::interval(self.options.heartbeat_interval);
        loop {
            ticker.tick().await;
            if self.state() == ClientState::Shutdown {
                return;
            }
            self.send_heartbeat_to_all_brokers().await;
        }
    }

    async fn send_heartbeat_to_all_brokers(&self) {
        let heartbeat = {
            let tables = self.tables.read();
            HeartbeatData {
                client_id: self.client_id.to_string(),
                producer_data_set: tables
                    .producers
                    .keys()
                    .map(|group_name| ProducerData {
                        group_name: group_name.clone(),
                    })
                    .collect(),
                consumer_data_set: tables
                    .consumers
                    .iter()
                    .map(|(group_name, consumer)| ConsumerData {
                        group_name: group_name.clone(),
                        consumer_type: consumer.get_c_type(),
                        message_model: consumer.get_model(),
                        consume_from_where: consumer.get_where(),
                        subscription_data_set: consumer.subscriptions(),
                        unit_mode: self.options.unit_mode,
                    })
                    .collect(),
            }
        };
        let body = match serde_json::to_vec(&heartbeat) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "failed to serialize heartbeat data");
                return;
            }
        };
        for addr in self.name_server.all_broker_addrs() {
            let cmd = RemotingCommand::new(
                0,
                RequestCode::Heartbeat.into(),
                0,
                String::new(),
                HashMap::new(),
                body.clone(),
            );
            if let Err(err) = self.invoke(&addr, cmd).await {
                debug!(broker = %addr, error = %err, "heartbeat failed");
            }
        }
    }

    async fn persist_offset_loop(&self) {
        let mut ticker = tokio::time::interval(self.options.persist_consumer_offset_interval);
        loop {
            ticker.tick().await;
            if self.state() == ClientState::Shutdown {
                return;
            }
            for consumer in self.tables.read().consumers.values() {
                if let Err(err) = consumer.persist_consumer_offset() {
                    warn!(error = %err, "failed to persist consumer offset");
                }
            }
        }
    }

    async fn rebalance_loop(&self) {
        let mut ticker = tokio::time::interval(self.options.rebalance_interval);
        loop {
            ticker.tick().await;
            if self.state() == ClientState::Shutdown {
                return;
            }
            for consumer in self.tables.read().consumers.values() {
                consumer.rebalance();
            }
        }
    }
}
