use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::client::{Client, SubscriptionData};
use crate::consumer::offset_store::OffsetStore;
use crate::consumer::pull_request::PullRequest;
use crate::consumer::pull_scheduler::ConsumeDispatch;
use crate::consumer::subscription::tag_matches;
use crate::consumer::MessageModel;
use crate::message::{MessageExt, Property};
use crate::protocol::request::ConsumerSendMsgBackRequestHeader;
use crate::resolver::Resolver;

const DEFAULT_MAX_RECONSUME_TIMES: i32 = 16;
const MAX_TIME_CONSUME_CONTINUOUSLY: Duration = Duration::from_secs(60);
const ORDERLY_LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeConcurrentlyStatus {
    ConsumeSuccess,
    ReconsumeLater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOrderlyStatus {
    Success,
    SuspendCurrentQueueAMoment,
}

#[async_trait]
pub trait MessageListenerConcurrently: Send + Sync {
    async fn consume_message(&self, msgs: &[MessageExt]) -> ConsumeConcurrentlyStatus;
}

#[async_trait]
pub trait MessageListenerOrderly: Send + Sync {
    async fn consume_message(&self, msgs: &[MessageExt]) -> ConsumeOrderlyStatus;
}

/// If a message's topic carries the retry-topic prefix for this group, restores the
/// original topic from the `RETRY_TOPIC` property so the user listener always sees the topic
/// it originally subscribed to.
fn restore_retry_topic(consumer_group: &str, msg: &mut MessageExt) {
    let retry_topic = format!("%RETRY%{}", consumer_group);
    if msg.message.topic != retry_topic {
        return;
    }
    if let Some(original) = msg.message.get_property(Property::RETRY_TOPIC).map(str::to_string) {
        msg.message.topic = original;
    }
}

async fn send_back_or_drop(
    client: &Client<Resolver>,
    consumer_group: &str,
    broker_name: &str,
    model: MessageModel,
    max_reconsume_times: i32,
    msg: &MessageExt,
) {
    match model {
        MessageModel::Broadcasting => {
            warn!(msg_id = %msg.msg_id, "broadcasting consumer failed to process message, dropping (application must be idempotent)");
        }
        MessageModel::Clustering => {
            let addr = match client.name_server.find_broker_addr_by_name(broker_name) {
                Some(addr) => addr,
                None => {
                    warn!(broker_name, "cannot send message back, broker address unknown");
                    return;
                }
            };
            let header = ConsumerSendMsgBackRequestHeader {
                group: consumer_group.to_string(),
                offset: msg.commit_log_offset,
                delay_level: 0,
                origin_msg_id: msg.msg_id.clone(),
                origin_topic: msg.topic().to_string(),
                unit_mode: false,
                max_reconsume_times,
            };
            if let Err(err) = client.name_server.consumer_send_msg_back(&addr, header).await {
                warn!(msg_id = %msg.msg_id, error = %err, "send message back to broker failed, message will be redelivered on next pull");
            }
        }
    }
}

/// Dispatches freshly-pulled batches to a bounded pool of worker tasks; no ordering is
/// preserved across or within a batch beyond the commit-offset invariant.
pub struct ConcurrentConsumeService {
    consumer_group: String,
    client: Client<Resolver>,
    offset_store: Arc<dyn OffsetStore + Send + Sync>,
    subscriptions: Arc<RwLock<HashMap<String, SubscriptionData>>>,
    listener: Arc<dyn MessageListenerConcurrently>,
    model: MessageModel,
    max_reconsume_times: i32,
    batch_max: usize,
    semaphore: Arc<Semaphore>,
}

impl ConcurrentConsumeService {
    pub fn new(
        consumer_group: String,
        client: Client<Resolver>,
        offset_store: Arc<dyn OffsetStore + Send + Sync>,
        subscriptions: Arc<RwLock<HashMap<String, SubscriptionData>>>,
        listener: Arc<dyn MessageListenerConcurrently>,
        model: MessageModel,
        thread_count: usize,
        batch_max: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            consumer_group,
            client,
            offset_store,
            subscriptions,
            listener,
            model,
            max_reconsume_times: DEFAULT_MAX_RECONSUME_TIMES,
            batch_max: batch_max.max(1),
            semaphore: Arc::new(Semaphore::new(thread_count.max(1))),
        })
    }
}

#[async_trait]
impl ConsumeDispatch for ConcurrentConsumeService {
    async fn submit(&self, request: Arc<PullRequest>, msgs: Vec<MessageExt>) {
        if msgs.is_empty() || request.dropped() {
            return;
        }
        let subscription = self.subscriptions.read().get(&request.message_queue.topic).cloned();
        for chunk in msgs.chunks(self.batch_max) {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let consumer_group = self.consumer_group.clone();
            let client = self.client.clone();
            let offset_store = self.offset_store.clone();
            let subscription = subscription.clone();
            let listener = self.listener.clone();
            let model = self.model;
            let max_reconsume_times = self.max_reconsume_times;
            let request = request.clone();
            let mut msgs = chunk.to_vec();
            tokio::spawn(async move {
                let _permit = permit;
                if request.dropped() {
                    return;
                }
                for msg in &mut msgs {
                    restore_retry_topic(&consumer_group, msg);
                }
                let offsets: Vec<i64> = msgs.iter().map(|m| m.queue_offset).collect();
                let deliverable: Vec<MessageExt> = match &subscription {
                    Some(sub) => msgs.into_iter().filter(|m| tag_matches(sub, m.tags())).collect(),
                    None => msgs,
                };
                if !deliverable.is_empty() {
                    let status = listener.consume_message(&deliverable).await;
                    if status == ConsumeConcurrentlyStatus::ReconsumeLater {
                        for msg in &deliverable {
                            send_back_or_drop(
                                &client,
                                &consumer_group,
                                &request.message_queue.broker_name,
                                model,
                                max_reconsume_times,
                                msg,
                            )
                            .await;
                        }
                    }
                }
                if request.dropped() {
                    return;
                }
                let commit = request.process_queue.remove_message(&offsets);
                if commit >= 0 {
                    offset_store.update(&request.message_queue, commit, true);
                }
            });
        }
    }
}

/// Dispatches per-queue, serialized by the `PullRequest`'s critical section so at most one
/// worker ever consumes a given queue at a time.
pub struct OrderlyConsumeService {
    consumer_group: String,
    client: Client<Resolver>,
    offset_store: Arc<dyn OffsetStore + Send + Sync>,
    subscriptions: Arc<RwLock<HashMap<String, SubscriptionData>>>,
    listener: Arc<dyn MessageListenerOrderly>,
    model: MessageModel,
    max_reconsume_times: i32,
    batch_max: usize,
    semaphore: Arc<Semaphore>,
}

impl OrderlyConsumeService {
    pub fn new(
        consumer_group: String,
        client: Client<Resolver>,
        offset_store: Arc<dyn OffsetStore + Send + Sync>,
        subscriptions: Arc<RwLock<HashMap<String, SubscriptionData>>>,
        listener: Arc<dyn MessageListenerOrderly>,
        model: MessageModel,
        thread_count: usize,
        batch_max: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            consumer_group,
            client,
            offset_store,
            subscriptions,
            listener,
            model,
            max_reconsume_times: DEFAULT_MAX_RECONSUME_TIMES,
            batch_max: batch_max.max(1),
            semaphore: Arc::new(Semaphore::new(thread_count.max(1))),
        })
    }
}

#[async_trait]
impl ConsumeDispatch for OrderlyConsumeService {
    // Orderly mode pulls directly from the ProcessQueue via `take_messages`, so the freshly
    // pulled batch handed in here only signals that there is new work for this queue.
    async fn submit(&self, request: Arc<PullRequest>, _msgs: Vec<MessageExt>) {
        if request.dropped() {
            return;
        }
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let consumer_group = self.consumer_group.clone();
        let client = self.client.clone();
        let offset_store = self.offset_store.clone();
        let subscription = self.subscriptions.read().get(&request.message_queue.topic).cloned();
        let listener = self.listener.clone();
        let model = self.model;
        let max_reconsume_times = self.max_reconsume_times;
        let batch_max = self.batch_max;
        tokio::spawn(async move {
            let _permit = permit;
            let guard = request.try_lock_consume(ORDERLY_LOCK_ACQUIRE_TIMEOUT);
            let _guard = match guard {
                Some(guard) => guard,
                None => return,
            };
            if model == MessageModel::Clustering
                && (!request.process_queue.locked() || request.process_queue.is_lock_expired())
            {
                debug!(message_queue = %request.message_queue, "queue not locked yet, deferring orderly consume");
                tokio::time::sleep(Duration::from_millis(100)).await;
                return;
            }

            let started = Instant::now();
            loop {
                if request.dropped() || started.elapsed() > MAX_TIME_CONSUME_CONTINUOUSLY {
                    break;
                }
                let mut batch = request.process_queue.take_messages(batch_max);
                if batch.is_empty() {
                    break;
                }
                for msg in &mut batch {
                    restore_retry_topic(&consumer_group, msg);
                }

                let mut dlq = Vec::new();
                batch.retain(|msg| {
                    if msg.reconsume_times > max_reconsume_times {
                        dlq.push(msg.clone());
                        false
                    } else {
                        true
                    }
                });
                for msg in &dlq {
                    send_back_or_drop(
                        &client,
                        &consumer_group,
                        &request.message_queue.broker_name,
                        model,
                        max_reconsume_times,
                        msg,
                    )
                    .await;
                }

                let deliverable: Vec<MessageExt> = match &subscription {
                    Some(sub) => batch.iter().filter(|m| tag_matches(sub, m.tags())).cloned().collect(),
                    None => batch.clone(),
                };

                let status = if deliverable.is_empty() {
                    ConsumeOrderlyStatus::Success
                } else {
                    listener.consume_message(&deliverable).await
                };

                match status {
                    ConsumeOrderlyStatus::Success => {
                        let commit = request.process_queue.commit();
                        offset_store.update(&request.message_queue, commit, true);
                    }
                    ConsumeOrderlyStatus::SuspendCurrentQueueAMoment => {
                        request.process_queue.make_message_to_consume_again(&batch);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::Message;

    fn msg_ext(topic: &str) -> MessageExt {
        MessageExt {
            message: Message::new(topic.to_string(), String::new(), String::new(), 0, Vec::new(), false),
            queue_id: 0,
            store_size: 0,
            queue_offset: 0,
            sys_flag: 0,
            born_timestamp: 0,
            store_timestamp: 0,
            msg_id: "1".to_string(),
            commit_log_offset: 0,
            body_crc: 0,
            reconsume_times: 0,
            prepared_transaction_offset: 0,
        }
    }

    #[test]
    fn test_restore_retry_topic_rewrites_when_matching() {
        let mut msg = msg_ext("%RETRY%my_group");
        msg.message.set_property(Property::RETRY_TOPIC, "orders".to_string());
        restore_retry_topic("my_group", &mut msg);
        assert_eq!(msg.message.topic, "orders");
    }

    #[test]
    fn test_restore_retry_topic_leaves_normal_topic_untouched() {
        let mut msg = msg_ext("orders");
        restore_retry_topic("my_group", &mut msg);
        assert_eq!(msg.message.topic, "orders");
    }
}
