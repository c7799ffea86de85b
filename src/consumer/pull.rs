use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::client::Client;
use crate::consumer::offset_store::{OffsetStorage, OffsetStore, ReadType, RemoteBrokerOffsetStore};
use crate::consumer::subscription::build_subscription_data;
use crate::consumer::ConsumerOptions;
use crate::message::{MessageExt, MessageQueue};
use crate::namesrv::NameServer;
use crate::protocol::request::PullMessageRequestHeader;
pub use crate::protocol::response::PullStatus;
use crate::resolver::Resolver;
use crate::Error;

const PULL_RPC_TIMEOUT: Duration = Duration::from_secs(30);
const SUSPEND_TIMEOUT: Duration = Duration::from_secs(15);

const FLAG_COMMIT_OFFSET: i32 = 0x1;
const FLAG_SUSPEND: i32 = 0x1 << 1;
const FLAG_SUBSCRIPTION: i32 = 0x1 << 2;

/// One pull RPC's outcome: zero or more messages plus the broker's bookkeeping offsets.
#[derive(Debug, Clone)]
pub struct PullResult {
    pub status: PullStatus,
    pub next_begin_offset: i64,
    pub min_offset: i64,
    pub max_offset: i64,
    pub messages: Vec<MessageExt>,
}

/// Pull-model consumer: the application drives every fetch explicitly rather than registering
/// a listener. Shares `ConsumerOptions`/offset storage with `Consumer`, but does not run a
/// rebalance or pull-scheduling loop of its own — queue assignment, if wanted, is the
/// application's responsibility via `fetch_subscribe_message_queues`.
pub struct PullConsumer {
    client: Client<Resolver>,
    options: ConsumerOptions,
    offset_store: Arc<dyn OffsetStore + Send + Sync>,
}

impl PullConsumer {
    pub fn new() -> Result<Self, Error> {
        Self::with_options(ConsumerOptions::default())
    }

    pub fn with_options(options: ConsumerOptions) -> Result<Self, Error> {
        let client_options = options.client_options().clone();
        let name_server = NameServer::new(options.resolver().clone(), client_options.credentials.clone())?;
        let client = Client::new(client_options, name_server);
        let offset_store: Arc<dyn OffsetStore + Send + Sync> = Arc::new(OffsetStorage::RemoteBroker(
            RemoteBrokerOffsetStore::new(options.group_name(), client.clone()),
        ));
        Ok(Self { client, options, offset_store })
    }

    pub fn start(&self) {
        self.client.start();
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
    }

    /// Returns every read-side queue currently routed for `topic`, refreshing the route cache
    /// if necessary.
    pub async fn fetch_subscribe_message_queues(&self, topic: &str) -> Result<Vec<MessageQueue>, Error> {
        let (route, changed) = self.client.name_server.update_topic_route_info(topic).await?;
        let mqs = route.to_subscribe_info(topic);
        self.client.update_publish_info(topic, route, changed);
        Ok(mqs)
    }

    /// Issues a single non-blocking pull against `mq` starting at `offset`.
    pub async fn pull(
        &self,
        mq: &MessageQueue,
        sub_expression: &str,
        offset: i64,
        max_nums: i32,
    ) -> Result<PullResult, Error> {
        self.pull_with_suspend(mq, sub_expression, offset, max_nums, Duration::ZERO).await
    }

    /// Like `pull`, but asks the broker to long-poll for up to `timeout` before answering
    /// `PULL_NOT_FOUND` if no messages are yet available. `Duration::ZERO` disables suspension.
    pub async fn pull_blocking_if_not_found(
        &self,
        mq: &MessageQueue,
        sub_expression: &str,
        offset: i64,
        max_nums: i32,
    ) -> Result<PullResult, Error> {
        self.pull_with_suspend(mq, sub_expression, offset, max_nums, SUSPEND_TIMEOUT).await
    }

    async fn pull_with_suspend(
        &self,
        mq: &MessageQueue,
        sub_expression: &str,
        offset: i64,
        max_nums: i32,
        suspend_timeout: Duration,
    ) -> Result<PullResult, Error> {
        let broker_addr = self
            .client
            .name_server
            .find_broker_addr_by_name(&mq.broker_name)
            .ok_or_else(|| Error::BrokerNotFound(mq.broker_name.clone()))?;
        let subscription = build_subscription_data(&mq.topic, sub_expression)?;

        let mut sys_flag = FLAG_SUBSCRIPTION | FLAG_COMMIT_OFFSET;
        if !suspend_timeout.is_zero() {
            sys_flag |= FLAG_SUSPEND;
        }

        let header = PullMessageRequestHeader {
            consumer_group: self.options.group_name().to_string(),
            topic: mq.topic.clone(),
            queue_id: mq.queue_id,
            queue_offset: offset,
            max_msg_nums: max_nums,
            sys_flag,
            commit_offset: offset,
            suspend_timeout_millis: suspend_timeout.as_millis() as i64,
            subscription: subscription.sub_string.clone(),
            sub_version: subscription.sub_version,
            expression_type: subscription.expression_type.clone(),
        };

        let started = Instant::now();
        let (status, response_header, body) = self
            .client
            .name_server
            .pull_message(&broker_addr, header, PULL_RPC_TIMEOUT)
            .await?;
        debug!(message_queue = %mq, elapsed = ?started.elapsed(), ?status, "pull message completed");

        let messages = match status {
            PullStatus::Found => MessageExt::from_buffer(&body)?,
            _ => Vec::new(),
        };

        Ok(PullResult {
            status,
            next_begin_offset: response_header.next_begin_offset,
            min_offset: response_header.min_offset,
            max_offset: response_header.max_offset,
            messages,
        })
    }

    pub async fn fetch_consume_offset(&self, mq: &MessageQueue) -> i64 {
        self.offset_store.read(mq, ReadType::Store).await
    }

    pub fn update_consume_offset(&self, mq: &MessageQueue, offset: i64) {
        self.offset_store.update(mq, offset, false);
    }

    pub async fn persist_consume_offset(&self, mq: &MessageQueue) {
        self.offset_store.persist(std::slice::from_ref(mq)).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pull_result_found_carries_messages() {
        let result = PullResult {
            status: PullStatus::Found,
            next_begin_offset: 10,
            min_offset: 0,
            max_offset: 20,
            messages: Vec::new(),
        };
        assert_eq!(result.next_begin_offset, 10);
    }
}
