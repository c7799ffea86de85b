use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use time::OffsetDateTime;

use crate::message::MessageExt;

const LOCK_MAX_LIVE_TIME: Duration = Duration::from_secs(30);
const PULL_MAX_IDLE_TIME: Duration = Duration::from_secs(120);

#[derive(Debug, Default)]
struct Buffer {
    msgs: BTreeMap<i64, MessageExt>,
    consuming: BTreeMap<i64, MessageExt>,
    msg_size: usize,
}

/// Per-queue in-memory window of pulled-but-not-yet-acknowledged messages, plus the
/// ordering lock state used by orderly consumption.
#[derive(Debug)]
pub struct ProcessQueue {
    buffer: RwLock<Buffer>,
    queue_offset_max: AtomicI64,
    dropped: AtomicBool,
    last_pull_timestamp: AtomicI64,
    last_consume_timestamp: AtomicI64,
    locked: AtomicBool,
    last_lock_timestamp: AtomicI64,
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl ProcessQueue {
    pub fn new() -> Self {
        let ts = now();
        Self {
            buffer: RwLock::new(Buffer::default()),
            queue_offset_max: AtomicI64::new(-1),
            dropped: AtomicBool::new(false),
            last_pull_timestamp: AtomicI64::new(ts),
            last_consume_timestamp: AtomicI64::new(ts),
            locked: AtomicBool::new(false),
            last_lock_timestamp: AtomicI64::new(ts),
        }
    }

    pub fn dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub fn set_dropped(&self, dropped: bool) {
        self.dropped.store(dropped, Ordering::Release);
    }

    pub fn locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Release);
        if locked {
            self.last_lock_timestamp.store(now(), Ordering::Release);
        }
    }

    pub fn is_lock_expired(&self) -> bool {
        let last = self.last_lock_timestamp.load(Ordering::Acquire);
        now() - last > LOCK_MAX_LIVE_TIME.as_secs() as i64
    }

    pub fn is_pull_expired(&self) -> bool {
        let last = self.last_pull_timestamp.load(Ordering::Acquire);
        now() - last > PULL_MAX_IDLE_TIME.as_secs() as i64
    }

    pub fn touch_pull(&self) {
        self.last_pull_timestamp.store(now(), Ordering::Release);
    }

    pub fn touch_consume(&self) {
        self.last_consume_timestamp.store(now(), Ordering::Release);
    }

    pub fn last_consume_timestamp(&self) -> i64 {
        self.last_consume_timestamp.load(Ordering::Acquire)
    }

    pub fn queue_offset_max(&self) -> i64 {
        self.queue_offset_max.load(Ordering::Acquire)
    }

    /// Inserts messages whose offset exceeds the current max; duplicates are discarded.
    /// Returns `true` if at least one message was newly inserted.
    pub fn put_messages(&self, msgs: Vec<MessageExt>) -> bool {
        if self.dropped() {
            return false;
        }
        let mut buffer = self.buffer.write();
        let mut inserted = false;
        for msg in msgs {
            let offset = msg.queue_offset;
            if buffer.msgs.contains_key(&offset) {
                continue;
            }
            buffer.msg_size += msg.message.body.len();
            buffer.msgs.insert(offset, msg);
            inserted = true;
        }
        if let Some((&max_offset, _)) = buffer.msgs.iter().next_back() {
            self.queue_offset_max
                .fetch_max(max_offset, Ordering::AcqRel);
        }
        inserted
    }

    /// Deletes the given offsets, returning the offset now safe to commit: the smallest
    /// offset still present, or `queueOffsetMax + 1` if the queue is now empty.
    pub fn remove_message(&self, offsets: &[i64]) -> i64 {
        let mut buffer = self.buffer.write();
        for offset in offsets {
            if let Some(msg) = buffer.msgs.remove(offset) {
                buffer.msg_size = buffer.msg_size.saturating_sub(msg.message.body.len());
            }
        }
        match buffer.msgs.keys().next() {
            Some(&offset) => offset,
            None => self.queue_offset_max.load(Ordering::Acquire) + 1,
        }
    }

    /// Orderly only: moves up to `max_batch` messages from the main mapping into the
    /// in-flight `consuming` set, ordered by offset.
    pub fn take_messages(&self, max_batch: usize) -> Vec<MessageExt> {
        let mut buffer = self.buffer.write();
        let offsets: Vec<i64> = buffer.msgs.keys().take(max_batch).cloned().collect();
        let mut taken = Vec::with_capacity(offsets.len());
        for offset in offsets {
            if let Some(msg) = buffer.msgs.remove(&offset) {
                taken.push(msg.clone());
                buffer.consuming.insert(offset, msg);
            }
        }
        taken
    }

    /// Orderly only: clears the current `consuming` set as durably consumed, returning the
    /// new safe commit offset.
    pub fn commit(&self) -> i64 {
        let mut buffer = self.buffer.write();
        for (_, msg) in buffer.consuming.iter() {
            buffer.msg_size = buffer.msg_size.saturating_sub(msg.message.body.len());
        }
        buffer.consuming.clear();
        match buffer.msgs.keys().next() {
            Some(&offset) => offset,
            None => self.queue_offset_max.load(Ordering::Acquire) + 1,
        }
    }

    /// Orderly only: moves the given offsets back from `consuming` to the head of the main
    /// mapping, so a suspended batch is retried before anything pulled afterward.
    pub fn make_message_to_consume_again(&self, msgs: &[MessageExt]) {
        let mut buffer = self.buffer.write();
        for msg in msgs {
            if let Some(msg) = buffer.consuming.remove(&msg.queue_offset) {
                buffer.msgs.insert(msg.queue_offset, msg);
            }
        }
    }

    /// Empties the mapping and all counters. Idempotent; this is also the cleanup step run
    /// when a queue is dropped, so it must work regardless of `dropped`.
    pub fn clear_all_msgs(&self) {
        let mut buffer = self.buffer.write();
        buffer.msgs.clear();
        buffer.consuming.clear();
        buffer.msg_size = 0;
    }

    /// The offset safe to report as this queue's commit offset right now: the smallest
    /// offset still buffered, or `queueOffsetMax + 1` if nothing is buffered. Unlike
    /// `remove_message`/`commit`, this does not mutate anything.
    pub fn commit_offset(&self) -> i64 {
        let buffer = self.buffer.read();
        match buffer.msgs.keys().next().or_else(|| buffer.consuming.keys().next()) {
            Some(&offset) => offset,
            None => self.queue_offset_max.load(Ordering::Acquire) + 1,
        }
    }

    pub fn get_cached_msg_count(&self) -> usize {
        self.buffer.read().msgs.len()
    }

    pub fn get_cached_msg_size(&self) -> usize {
        self.buffer.read().msg_size
    }

    pub fn get_max_span(&self) -> i64 {
        let buffer = self.buffer.read();
        match (buffer.msgs.keys().next(), buffer.msgs.keys().next_back()) {
            (Some(&first), Some(&last)) => last - first,
            _ => 0,
        }
    }
}

impl Default for ProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::{Message, MessageExt};

    fn msg_ext(offset: i64, body: &[u8]) -> MessageExt {
        MessageExt {
            message: Message::new(
                "t".to_string(),
                String::new(),
                String::new(),
                0,
                body.to_vec(),
                false,
            ),
            queue_id: 0,
            store_size: 0,
            queue_offset: offset,
            sys_flag: 0,
            born_timestamp: 0,
            store_timestamp: 0,
            msg_id: offset.to_string(),
            commit_log_offset: 0,
            body_crc: 0,
            reconsume_times: 0,
            prepared_transaction_offset: 0,
        }
    }

    #[test]
    fn test_put_and_remove_messages() {
        let pq = ProcessQueue::new();
        assert!(pq.put_messages(vec![msg_ext(0, b"a"), msg_ext(1, b"b"), msg_ext(2, b"c")]));
        assert_eq!(pq.get_cached_msg_count(), 3);
        assert_eq!(pq.queue_offset_max(), 2);
        // duplicate insert is a no-op
        assert!(!pq.put_messages(vec![msg_ext(0, b"a")]));
        assert_eq!(pq.get_cached_msg_count(), 3);

        let commit = pq.remove_message(&[0]);
        assert_eq!(commit, 1);
        let commit = pq.remove_message(&[1, 2]);
        assert_eq!(commit, 3); // queueOffsetMax + 1
    }

    #[test]
    fn test_take_messages_and_commit_orderly() {
        let pq = ProcessQueue::new();
        pq.put_messages(vec![msg_ext(0, b"a"), msg_ext(1, b"b")]);
        let taken = pq.take_messages(1);
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].queue_offset, 0);
        assert_eq!(pq.get_cached_msg_count(), 1);

        let commit = pq.commit();
        assert_eq!(commit, 1);
        assert_eq!(pq.get_cached_msg_count(), 1);
    }

    #[test]
    fn test_make_message_to_consume_again() {
        let pq = ProcessQueue::new();
        pq.put_messages(vec![msg_ext(0, b"a")]);
        let taken = pq.take_messages(1);
        assert_eq!(pq.get_cached_msg_count(), 0);
        pq.make_message_to_consume_again(&taken);
        assert_eq!(pq.get_cached_msg_count(), 1);
    }

    #[test]
    fn test_max_span_and_dropped_clear() {
        let pq = ProcessQueue::new();
        pq.put_messages(vec![msg_ext(5, b"a"), msg_ext(9, b"b")]);
        assert_eq!(pq.get_max_span(), 4);
        pq.set_dropped(true);
        // dropped queues ignore further inserts but still accept final cleanup
        assert!(!pq.put_messages(vec![msg_ext(20, b"c")]));
        pq.clear_all_msgs();
        assert_eq!(pq.get_cached_msg_count(), 0);
    }
}
