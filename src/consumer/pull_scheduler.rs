use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::client::{Client, SubscriptionData};
use crate::consumer::offset_store::OffsetStore;
use crate::consumer::pull_request::PullRequest;
use crate::consumer::rebalance::Rebalance;
use crate::message::{MessageExt, MessageQueue};
use crate::protocol::request::PullMessageRequestHeader;
use crate::protocol::response::PullStatus;
use crate::resolver::Resolver;
use crate::Error;

const FLAG_COMMIT_OFFSET: i32 = 0x1;
const FLAG_SUSPEND: i32 = 0x1 << 1;
const FLAG_SUBSCRIPTION: i32 = 0x1 << 2;
const FLAG_CLASS_FILTER: i32 = 0x1 << 3;

const MAX_CACHED_MSG_COUNT: usize = 1000;
const MAX_CACHED_MSG_SIZE: usize = 100 * 1024 * 1024;
const MAX_ORDERLY_SPAN: i64 = 2000;

const SUPERVISOR_TICK: Duration = Duration::from_millis(100);
const SUSPEND_TIMEOUT: Duration = Duration::from_secs(15);
const PULL_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives a batch of newly-pulled messages for a queue. Implemented by the concurrent and
/// orderly consume services; the scheduler doesn't care which.
#[async_trait]
pub trait ConsumeDispatch {
    async fn submit(&self, request: Arc<PullRequest>, msgs: Vec<MessageExt>);
}

/// Drives every `PullRequest` assigned by a `Rebalance`, one dedicated pull loop per queue,
/// applying admission control and the broker response state machine.
pub struct PullScheduler {
    client: Client<Resolver>,
    rebalance: Arc<Rebalance>,
    offset_store: Arc<dyn OffsetStore + Send + Sync>,
    consume_service: Arc<dyn ConsumeDispatch + Send + Sync>,
    subscriptions: Arc<RwLock<HashMap<String, SubscriptionData>>>,
    orderly: bool,
    max_msg_nums: i32,
    started: Mutex<HashSet<MessageQueue>>,
    shutdown: Arc<AtomicBool>,
}

fn admission_defer_for(
    orderly: bool,
    msg_count: usize,
    msg_size: usize,
    max_span: i64,
    locked: bool,
) -> Option<Duration> {
    if msg_count > MAX_CACHED_MSG_COUNT {
        return Some(Duration::from_millis(50));
    }
    if msg_size > MAX_CACHED_MSG_SIZE {
        return Some(Duration::from_millis(50));
    }
    if orderly {
        if max_span > MAX_ORDERLY_SPAN {
            return Some(Duration::from_millis(50));
        }
        if !locked {
            return Some(Duration::from_secs(3));
        }
    }
    None
}

impl PullScheduler {
    pub fn new(
        client: Client<Resolver>,
        rebalance: Arc<Rebalance>,
        offset_store: Arc<dyn OffsetStore + Send + Sync>,
        consume_service: Arc<dyn ConsumeDispatch + Send + Sync>,
        subscriptions: Arc<RwLock<HashMap<String, SubscriptionData>>>,
        orderly: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            rebalance,
            offset_store,
            consume_service,
            subscriptions,
            orderly,
            max_msg_nums: 32,
            started: Mutex::new(HashSet::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Supervisor loop: every tick, spawns a dedicated driver task for any request the
    /// rebalance has newly assigned.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(SUPERVISOR_TICK);
        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let assigned = self.rebalance.assigned_requests();
            let mut started = self.started.lock();
            started.retain(|mq| assigned.iter().any(|req| &req.message_queue == mq));
            for request in assigned {
                if started.insert(request.message_queue.clone()) {
                    let scheduler = self.clone();
                    tokio::spawn(async move { scheduler.drive(request).await });
                }
            }
        }
    }

    /// Owns one `PullRequest`'s lifetime: issues pull RPCs one at a time, applies admission
    /// control and the response state machine, until the request is dropped or the scheduler
    /// shuts down.
    async fn drive(self: Arc<Self>, request: Arc<PullRequest>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) || request.dropped() {
                return;
            }
            let defer = self.admission_defer(&request);
            if let Some(wait) = defer {
                tokio::time::sleep(wait).await;
                continue;
            }
            if !request.try_begin_pull() {
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
            let outcome = self.pull_once(&request).await;
            request.end_pull();
            match outcome {
                Ok(next_delay) => {
                    if let Some(delay) = next_delay {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    warn!(message_queue = %request.message_queue, error = %err, "pull message failed, retrying in 3s");
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
            }
        }
    }

    /// Returns `Some(delay)` if the request should be deferred before a pull is attempted.
    fn admission_defer(&self, request: &PullRequest) -> Option<Duration> {
        let pq = &request.process_queue;
        admission_defer_for(
            self.orderly,
            pq.get_cached_msg_count(),
            pq.get_cached_msg_size(),
            pq.get_max_span(),
            pq.locked(),
        )
    }

    /// Issues one pull RPC and runs the broker response state machine. Returns the delay to
    /// apply before the next pull (`None` means re-enqueue immediately).
    async fn pull_once(&self, request: &Arc<PullRequest>) -> Result<Option<Duration>, Error> {
        let mq = &request.message_queue;
        let broker_addr = self
            .client
            .name_server
            .find_broker_addr_by_name(&mq.broker_name)
            .ok_or_else(|| Error::BrokerNotFound(mq.broker_name.clone()))?;

        let subscription = self.subscriptions.read().get(&mq.topic).cloned();
        let subscription = match subscription {
            Some(sub) => sub,
            None => {
                debug!(topic = %mq.topic, "no subscription registered, skipping pull");
                return Ok(Some(Duration::from_secs(1)));
            }
        };

        let commit_offset = request.process_queue.commit_offset();
        let mut sys_flag = FLAG_SUBSCRIPTION | FLAG_SUSPEND | FLAG_COMMIT_OFFSET;
        if subscription.class_filter_mode {
            sys_flag |= FLAG_CLASS_FILTER;
        }

        let header = PullMessageRequestHeader {
            consumer_group: request.consumer_group.clone(),
            topic: mq.topic.clone(),
            queue_id: mq.queue_id,
            queue_offset: request.next_offset(),
            max_msg_nums: self.max_msg_nums,
            sys_flag,
            commit_offset,
            suspend_timeout_millis: SUSPEND_TIMEOUT.as_millis() as i64,
            subscription: subscription.sub_string.clone(),
            sub_version: subscription.sub_version,
            expression_type: subscription.expression_type.clone(),
        };

        let (status, response_header, body) = self
            .client
            .name_server
            .pull_message(&broker_addr, header, PULL_RPC_TIMEOUT)
            .await?;

        match status {
            PullStatus::Found => {
                let msgs = MessageExt::from_buffer(&body)?;
                request.process_queue.touch_pull();
                request.process_queue.put_messages(msgs.clone());
                request.set_next_offset(response_header.next_begin_offset);
                self.consume_service.submit(request.clone(), msgs).await;
                Ok(None)
            }
            PullStatus::NoNewMsg => {
                request.set_next_offset(response_header.next_begin_offset);
                self.offset_store.update(mq, request.next_offset(), true);
                Ok(None)
            }
            PullStatus::NoMatchedMsg => {
                request.set_next_offset(response_header.next_begin_offset);
                self.offset_store.update(mq, request.next_offset(), true);
                Ok(None)
            }
            PullStatus::OffsetIllegal => {
                request.process_queue.clear_all_msgs();
                request.set_next_offset(response_header.next_begin_offset);
                self.offset_store.update(mq, request.next_offset(), false);
                self.offset_store.persist(std::slice::from_ref(mq)).await;
                Ok(Some(Duration::from_secs(10)))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_admission_defer_cached_count_and_size() {
        assert_eq!(
            admission_defer_for(false, MAX_CACHED_MSG_COUNT + 1, 0, 0, true),
            Some(Duration::from_millis(50))
        );
        assert_eq!(
            admission_defer_for(false, 0, MAX_CACHED_MSG_SIZE + 1, 0, true),
            Some(Duration::from_millis(50))
        );
        assert_eq!(admission_defer_for(false, 10, 10, 0, true), None);
    }

    #[test]
    fn test_admission_defer_orderly_span_and_lock() {
        assert_eq!(
            admission_defer_for(true, 0, 0, MAX_ORDERLY_SPAN + 1, true),
            Some(Duration::from_millis(50))
        );
        assert_eq!(
            admission_defer_for(true, 0, 0, 0, false),
            Some(Duration::from_secs(3))
        );
        assert_eq!(admission_defer_for(true, 0, 0, 0, true), None);
        // non-orderly mode ignores span/lock entirely
        assert_eq!(admission_defer_for(false, 0, 0, MAX_ORDERLY_SPAN + 1, false), None);
    }
}
