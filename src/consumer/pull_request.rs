use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::consumer::process_queue::ProcessQueue;
use crate::message::MessageQueue;

/// One outstanding work item bound to a `MessageQueue`: created by rebalance when the queue
/// is first assigned, dropped (tombstoned) when the queue is revoked.
#[derive(Debug)]
pub struct PullRequest {
    pub consumer_group: String,
    pub message_queue: MessageQueue,
    pub process_queue: Arc<ProcessQueue>,
    next_offset: AtomicI64,
    /// Orderly-mode critical section: only one worker may be consuming this queue's
    /// messages at a time.
    critical_section: Mutex<()>,
    /// Set while a pull RPC for this request is outstanding, so the scheduler never issues
    /// two concurrent pulls against the same queue.
    in_flight: AtomicBool,
}

impl PullRequest {
    pub fn new(consumer_group: String, message_queue: MessageQueue, next_offset: i64) -> Self {
        Self {
            consumer_group,
            message_queue,
            process_queue: Arc::new(ProcessQueue::new()),
            next_offset: AtomicI64::new(next_offset),
            critical_section: Mutex::new(()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Marks this request as having an outstanding pull; returns `false` if one was already
    /// in flight, in which case the caller must not issue another.
    pub fn try_begin_pull(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_pull(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn next_offset(&self) -> i64 {
        self.next_offset.load(Ordering::Acquire)
    }

    pub fn set_next_offset(&self, offset: i64) {
        self.next_offset.store(offset, Ordering::Release);
    }

    pub fn dropped(&self) -> bool {
        self.process_queue.dropped()
    }

    pub fn set_dropped(&self, dropped: bool) {
        self.process_queue.set_dropped(dropped);
    }

    /// Attempts to acquire the orderly critical section within `timeout`; returns `None` if
    /// another worker already holds it, matching the "exit, another worker has it" rule.
    pub fn try_lock_consume(&self, timeout: Duration) -> Option<parking_lot::MutexGuard<'_, ()>> {
        self.critical_section.try_lock_for(timeout)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::MessageQueue;

    fn mq() -> MessageQueue {
        MessageQueue {
            topic: "t".to_string(),
            broker_name: "b".to_string(),
            queue_id: 0,
        }
    }

    #[test]
    fn test_pull_request_offset_and_drop() {
        let req = PullRequest::new("group".to_string(), mq(), 10);
        assert_eq!(req.next_offset(), 10);
        req.set_next_offset(20);
        assert_eq!(req.next_offset(), 20);
        assert!(!req.dropped());
        req.set_dropped(true);
        assert!(req.dropped());
    }

    #[test]
    fn test_pull_request_in_flight_admission() {
        let req = PullRequest::new("group".to_string(), mq(), 0);
        assert!(req.try_begin_pull());
        assert!(!req.try_begin_pull());
        req.end_pull();
        assert!(req.try_begin_pull());
    }

    #[test]
    fn test_pull_request_critical_section_exclusive() {
        let req = PullRequest::new("group".to_string(), mq(), 0);
        let guard = req.try_lock_consume(Duration::from_millis(10));
        assert!(guard.is_some());
        // held by the first guard, a second attempt must fail within the timeout
        assert!(req.try_lock_consume(Duration::from_millis(10)).is_none());
        drop(guard);
        assert!(req.try_lock_consume(Duration::from_millis(10)).is_some());
    }
}
