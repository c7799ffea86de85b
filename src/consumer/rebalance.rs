use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::consumer::offset_store::{OffsetStore, ReadType};
use crate::consumer::process_queue::ProcessQueue;
use crate::consumer::pull_request::PullRequest;
use crate::consumer::strategy::AllocateStrategy;
use crate::consumer::ConsumeFromWhere;
use crate::message::MessageQueue;
use crate::resolver::Resolver;
use crate::Error;

/// Whether this rebalance drives a pull dispatch loop (`RebalancePush`) or only tracks
/// assignment for an application-driven pull consumer (`RebalancePull`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceMode {
    Pull,
    Push,
}

/// Computes this consumer's share of a topic's queues and reconciles the result against the
/// live `PullRequest` table, creating and tearing down per-queue work items as the
/// assignment changes.
pub struct Rebalance {
    consumer_group: String,
    client_id: String,
    client: Client<Resolver>,
    mode: RebalanceMode,
    orderly: bool,
    consume_from_where: ConsumeFromWhere,
    strategy: AllocateStrategy,
    offset_store: Arc<dyn OffsetStore + Send + Sync>,
    request_table: Mutex<HashMap<MessageQueue, Arc<PullRequest>>>,
}

impl Rebalance {
    pub fn new(
        consumer_group: String,
        client: Client<Resolver>,
        mode: RebalanceMode,
        orderly: bool,
        consume_from_where: ConsumeFromWhere,
        strategy: AllocateStrategy,
        offset_store: Arc<dyn OffsetStore + Send + Sync>,
    ) -> Self {
        let client_id = client.client_id().to_string();
        Self {
            consumer_group,
            client_id,
            client,
            mode,
            orderly,
            consume_from_where,
            strategy,
            offset_store,
            request_table: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of every non-dropped `PullRequest` currently assigned, for the pull scheduler
    /// to drive.
    pub fn assigned_requests(&self) -> Vec<Arc<PullRequest>> {
        self.request_table
            .lock()
            .values()
            .filter(|req| !req.dropped())
            .cloned()
            .collect()
    }

    /// Recomputes this consumer's assignment for `topic` and reconciles the request table.
    /// `mq_all` is the topic's full live queue list (already sorted); `broker_addr` is used to
    /// fetch the group's live client-id list and, for newly assigned queues, to compute the
    /// initial pull offset.
    pub async fn rebalance_topic(
        &self,
        topic: &str,
        mq_all: &[MessageQueue],
        broker_addr: &str,
    ) -> Result<(), Error> {
        let mut cid_all = self
            .client
            .name_server
            .query_consumer_id_list_by_group(broker_addr, &self.consumer_group)
            .await?;
        cid_all.sort();
        if cid_all.is_empty() {
            warn!(consumer_group = %self.consumer_group, topic = %topic, "no live consumers found for group, skipping rebalance");
            return Ok(());
        }
        let cid_refs: Vec<&str> = cid_all.iter().map(String::as_str).collect();
        let mut mq_all_sorted = mq_all.to_vec();
        mq_all_sorted.sort();
        let assigned = self
            .strategy
            .allocate(&self.consumer_group, &self.client_id, &mq_all_sorted, &cid_refs);
        self.reconcile(topic, assigned, broker_addr).await;
        Ok(())
    }

    async fn reconcile(&self, topic: &str, assigned: Vec<MessageQueue>, broker_addr: &str) {
        let assigned_set: std::collections::HashSet<&MessageQueue> = assigned.iter().collect();
        let removed: Vec<MessageQueue> = {
            let table = self.request_table.lock();
            table
                .keys()
                .filter(|mq| mq.topic == topic && !assigned_set.contains(mq))
                .cloned()
                .collect()
        };
        let mut changed = !removed.is_empty();
        for mq in &removed {
            self.drop_queue(mq, broker_addr).await;
        }

        for mq in &assigned {
            if self.request_table.lock().contains_key(mq) {
                continue;
            }
            changed = true;
            let next_offset = self.compute_pull_from_where(mq, broker_addr).await;
            let request = Arc::new(PullRequest::new(self.consumer_group.clone(), mq.clone(), next_offset));
            self.request_table.lock().insert(mq.clone(), request);
            info!(consumer_group = %self.consumer_group, message_queue = %mq, next_offset, "assigned new message queue");
        }

        if changed {
            info!(consumer_group = %self.consumer_group, topic = %topic, assigned = assigned.len(), "message queue assignment changed");
        }

        if self.orderly && matches!(self.mode, RebalanceMode::Push) {
            self.lock_assigned(topic, broker_addr).await;
        }
    }

    async fn drop_queue(&self, mq: &MessageQueue, broker_addr: &str) {
        let request = self.request_table.lock().remove(mq);
        let request = match request {
            Some(request) => request,
            None => return,
        };
        request.set_dropped(true);
        request.process_queue.clear_all_msgs();
        self.offset_store.persist(std::slice::from_ref(mq)).await;
        if self.orderly {
            if let Err(err) = self
                .client
                .name_server
                .unlock_batch_mq(broker_addr, &self.client_id, &self.consumer_group, vec![mq.clone()])
                .await
            {
                warn!(message_queue = %mq, error = %err, "failed to unlock message queue on drop");
            }
        }
        debug!(consumer_group = %self.consumer_group, message_queue = %mq, "message queue dropped");
    }

    /// `CONSUME_FROM_LAST_OFFSET` uses the persisted offset if one exists, else the broker's
    /// current max; `CONSUME_FROM_FIRST_OFFSET` starts at 0; `CONSUME_FROM_TIMESTAMP` resolves
    /// via `searchOffsetByTimestamp`. Falls back to 0 on a transient broker failure so a
    /// newly assigned queue always gets a usable starting point.
    async fn compute_pull_from_where(&self, mq: &MessageQueue, broker_addr: &str) -> i64 {
        let persisted = self.offset_store.read(mq, ReadType::MemoryThenStore).await;
        if persisted >= 0 {
            return persisted;
        }
        let result = match self.consume_from_where {
            ConsumeFromWhere::ConsumeFromFirstOffset => Ok(0),
            ConsumeFromWhere::ConsumeFromLastOffset => {
                self.client.name_server.get_max_offset(broker_addr, &mq.topic, mq.queue_id).await
            }
            ConsumeFromWhere::ConsumeFromTimestamp(ts) => {
                self.client
                    .name_server
                    .search_offset_by_timestamp(broker_addr, &mq.topic, mq.queue_id, ts)
                    .await
            }
        };
        match result {
            Ok(offset) => offset,
            Err(err) => {
                warn!(message_queue = %mq, error = %err, "failed to compute initial pull offset, starting from 0");
                0
            }
        }
    }

    /// Sends `LOCK_BATCH_MQ` for every currently assigned queue; granted queues are marked
    /// `locked`. Run on first assignment and on the periodic orderly lock tick.
    pub async fn lock_assigned(&self, topic: &str, broker_addr: &str) {
        let mqs: Vec<MessageQueue> = {
            let table = self.request_table.lock();
            table
                .iter()
                .filter(|(mq, req)| mq.topic == topic && !req.dropped())
                .map(|(mq, _)| mq.clone())
                .collect()
        };
        if mqs.is_empty() {
            return;
        }
        match self
            .client
            .name_server
            .lock_batch_mq(broker_addr, &self.client_id, &self.consumer_group, mqs.clone())
            .await
        {
            Ok(granted) => {
                let granted: std::collections::HashSet<MessageQueue> = granted.into_iter().collect();
                let table = self.request_table.lock();
                for mq in &mqs {
                    if let Some(request) = table.get(mq) {
                        request.process_queue.set_locked(granted.contains(mq));
                    }
                }
            }
            Err(err) => {
                warn!(topic = %topic, error = %err, "lock_batch_mq failed");
            }
        }
    }

    /// Tests whether a single `MessageQueue`'s process queue lock has expired and needs
    /// re-acquisition, used by the periodic orderly lock tick to decide which topics to relock.
    pub fn needs_relock(&self, process_queue: &ProcessQueue) -> bool {
        !process_queue.locked() || process_queue.is_lock_expired()
    }

    pub fn orderly(&self) -> bool {
        self.orderly
    }

    /// Orderly-mode-only background tick: re-sends `LOCK_BATCH_MQ` for every topic with at
    /// least one queue whose lock is missing or expired.
    pub async fn run_relock_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(20));
        loop {
            ticker.tick().await;
            let topics: HashSet<String> = {
                let table = self.request_table.lock();
                table
                    .values()
                    .filter(|req| !req.dropped() && self.needs_relock(&req.process_queue))
                    .map(|req| req.message_queue.topic.clone())
                    .collect()
            };
            for topic in topics {
                let broker_addr = {
                    let table = self.request_table.lock();
                    table
                        .values()
                        .find(|req| req.message_queue.topic == topic)
                        .and_then(|req| {
                            self.client.name_server.find_broker_addr_by_name(&req.message_queue.broker_name)
                        })
                };
                if let Some(broker_addr) = broker_addr {
                    self.lock_assigned(&topic, &broker_addr).await;
                } else {
                    warn!(topic = %topic, "cannot relock topic, no broker address cached");
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn mq(id: u32) -> MessageQueue {
        MessageQueue::new("t", "b", id)
    }

    #[test]
    fn test_mq_ordering_for_allocation() {
        let mut mqs = vec![mq(2), mq(0), mq(1)];
        mqs.sort();
        assert_eq!(mqs, vec![mq(0), mq(1), mq(2)]);
    }
}
