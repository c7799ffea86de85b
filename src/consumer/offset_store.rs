use std::collections::HashMap;
use std::env;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::client::Client;
use crate::message::MessageQueue;
use crate::resolver::Resolver;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadType {
    Memory,
    Store,
    MemoryThenStore,
}

#[derive(Debug)]
pub enum OffsetStorage {
    LocalFile(LocalFileOffsetStore),
    RemoteBroker(RemoteBrokerOffsetStore),
}

#[async_trait]
impl OffsetStore for OffsetStorage {
    async fn persist(&self, mqs: &[MessageQueue]) {
        match self {
            OffsetStorage::LocalFile(s) => s.persist(mqs).await,
            OffsetStorage::RemoteBroker(s) => s.persist(mqs).await,
        }
    }

    fn remove(&self, mq: &MessageQueue) {
        match self {
            OffsetStorage::LocalFile(s) => s.remove(mq),
            OffsetStorage::RemoteBroker(s) => s.remove(mq),
        }
    }

    async fn read(&self, mq: &MessageQueue, read_type: ReadType) -> i64 {
        match self {
            OffsetStorage::LocalFile(s) => s.read(mq, read_type).await,
            OffsetStorage::RemoteBroker(s) => s.read(mq, read_type).await,
        }
    }

    fn update(&self, mq: &MessageQueue, offset: i64, increase_only: bool) {
        match self {
            OffsetStorage::LocalFile(s) => s.update(mq, offset, increase_only),
            OffsetStorage::RemoteBroker(s) => s.update(mq, offset, increase_only),
        }
    }
}

#[async_trait]
pub trait OffsetStore {
    async fn persist(&self, mqs: &[MessageQueue]);
    fn remove(&self, mq: &MessageQueue);
    async fn read(&self, mq: &MessageQueue, read_type: ReadType) -> i64;
    fn update(&self, mq: &MessageQueue, offset: i64, increase_only: bool);
}

/// Wire format for the local offset file: `{"offsetTable": {"MessageQueue [...]": offset}}`,
/// keyed by the queue's `Display` string the way the Java/C++ clients key it by
/// `MessageQueue#toString`.
#[derive(Debug, Deserialize, Serialize)]
struct OffsetTableWrapper {
    #[serde(rename = "offsetTable")]
    offset_table: HashMap<String, i64>,
}

fn mq_table_to_wire(table: &HashMap<MessageQueue, i64>) -> HashMap<String, i64> {
    table.iter().map(|(mq, offset)| (mq.to_string(), *offset)).collect()
}

fn wire_to_mq_table(wire: HashMap<String, i64>) -> HashMap<MessageQueue, i64> {
    wire.into_iter()
        .filter_map(|(key, offset)| parse_message_queue_key(&key).map(|mq| (mq, offset)))
        .collect()
}

fn parse_message_queue_key(key: &str) -> Option<MessageQueue> {
    let inner = key.strip_prefix("MessageQueue [")?.strip_suffix(']')?;
    let mut topic = None;
    let mut broker_name = None;
    let mut queue_id = None;
    for part in inner.split(", ") {
        let (k, v) = part.split_once('=')?;
        match k {
            "topic" => topic = Some(v.to_string()),
            "brokerName" => broker_name = Some(v.to_string()),
            "queueId" => queue_id = v.parse().ok(),
            _ => {}
        }
    }
    Some(MessageQueue {
        topic: topic?,
        broker_name: broker_name?,
        queue_id: queue_id?,
    })
}

#[derive(Debug)]
pub struct LocalFileOffsetStore {
    group: String,
    path: PathBuf,
    offset_table: Mutex<HashMap<MessageQueue, i64>>,
}

impl LocalFileOffsetStore {
    /// Offsets persist under `<store_path>/<client_id>/<group>/offsets.json`, where
    /// `client_id` is already `<ip>@<instance>` and `store_path` defaults to
    /// `~/.rocketmq_offsets`, overridable via `rocketmq.client.localOffsetStoreDir`.
    pub fn new(client_id: &str, group: &str) -> Result<Self, Error> {
        let store_path = match env::var("rocketmq.client.localOffsetStoreDir") {
            Ok(path) => path,
            Err(_) => {
                let home = env::var("HOME").map_err(|_| {
                    io::Error::new(io::ErrorKind::NotFound, "HOME environment variable not set")
                })?;
                home + "/.rocketmq_offsets"
            }
        };
        Ok(Self {
            group: group.to_string(),
            path: PathBuf::from(store_path)
                .join(client_id)
                .join(group)
                .join("offsets.json"),
            offset_table: Mutex::new(HashMap::new()),
        })
    }

    async fn load(&self) {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) => {
                warn!(
                    "read from local store error, try to use bak file: {:?}",
                    err
                );
                let mut bak_path = self.path.clone();
                bak_path.set_file_name("offsets.json.bak");
                match tokio::fs::read(&bak_path).await {
                    Ok(data) => data,
                    Err(err) => {
                        warn!("read from local store bak file error: {:?}", err);
                        return;
                    }
                }
            }
        };
        match serde_json::from_slice::<OffsetTableWrapper>(&data) {
            Ok(wrapper) => {
                *self.offset_table.lock() = wire_to_mq_table(wrapper.offset_table);
            }
            Err(err) => {
                warn!("deserialize local offset error: {:?}", err);
            }
        }
    }

    fn read_from_memory(&self, mq: &MessageQueue) -> i64 {
        self.offset_table.lock().get(mq).cloned().unwrap_or(-1)
    }
}

#[async_trait]
impl OffsetStore for LocalFileOffsetStore {
    async fn persist(&self, mqs: &[MessageQueue]) {
        if mqs.is_empty() {
            return;
        }
        let wrapper = OffsetTableWrapper {
            offset_table: mq_table_to_wire(&self.offset_table.lock()),
        };
        if let Some(parent) = self.path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                error!(path = %parent.display(), error = ?err, "failed to create local offset store directory");
                return;
            }
        }
        match serde_json::to_vec(&wrapper) {
            Ok(data) => {
                if let Err(err) = tokio::fs::write(&self.path, data).await {
                    error!(
                        "persist offset to {} failed: {:?}",
                        self.path.display(),
                        err
                    );
                }
            }
            Err(err) => error!(
                "persist offset to {} failed, serialize to json failed: {:?}",
                self.path.display(),
                err
            ),
        }
    }

    fn remove(&self, _mq: &MessageQueue) {
        // local offset file keeps history around; nothing to evict eagerly.
    }

    async fn read(&self, mq: &MessageQueue, read_type: ReadType) -> i64 {
        match read_type {
            ReadType::Memory | ReadType::MemoryThenStore => self.read_from_memory(mq),
            ReadType::Store => {
                self.load().await;
                self.read_from_memory(mq)
            }
        }
    }

    fn update(&self, mq: &MessageQueue, offset: i64, increase_only: bool) {
        self.offset_table
            .lock()
            .entry(mq.clone())
            .and_modify(|local_offset| {
                if increase_only {
                    if *local_offset < offset {
                        *local_offset = offset;
                    }
                } else {
                    *local_offset = offset;
                }
            })
            .or_insert(offset);
    }
}

#[derive(Debug)]
pub struct RemoteBrokerOffsetStore {
    group: String,
    client: Client<Resolver>,
    offset_table: Mutex<HashMap<MessageQueue, i64>>,
}

impl RemoteBrokerOffsetStore {
    pub fn new(group: &str, client: Client<Resolver>) -> Self {
        Self {
            group: group.to_string(),
            client,
            offset_table: Mutex::new(HashMap::new()),
        }
    }

    fn read_from_memory(&self, mq: &MessageQueue) -> i64 {
        self.offset_table.lock().get(mq).cloned().unwrap_or(-1)
    }

    /// Finds the broker for `mq`, refreshing the route once if the address isn't cached yet.
    async fn broker_addr(&self, mq: &MessageQueue) -> Result<String, Error> {
        if let Some(addr) = self.client.name_server.find_broker_addr_by_name(&mq.broker_name) {
            return Ok(addr);
        }
        let (route, changed) = self.client.name_server.update_topic_route_info(&mq.topic).await?;
        self.client.update_publish_info(&mq.topic, route, changed);
        self.client
            .name_server
            .find_broker_addr_by_name(&mq.broker_name)
            .ok_or_else(|| Error::BrokerNotFound(mq.broker_name.clone()))
    }

    async fn read_from_broker(&self, mq: &MessageQueue) -> Result<i64, Error> {
        let addr = self.broker_addr(mq).await?;
        self.client
            .name_server
            .query_consumer_offset(&addr, &self.group, &mq.topic, mq.queue_id)
            .await
    }
}

#[async_trait]
impl OffsetStore for RemoteBrokerOffsetStore {
    async fn persist(&self, mqs: &[MessageQueue]) {
        if mqs.is_empty() {
            return;
        }
        for mq in mqs {
            let offset = match self.offset_table.lock().get(mq).cloned() {
                Some(offset) => offset,
                None => continue,
            };
            let addr = match self.broker_addr(mq).await {
                Ok(addr) => addr,
                Err(err) => {
                    warn!(message_queue = ?mq, error = %err, "could not resolve broker to persist offset");
                    continue;
                }
            };
            if let Err(err) = self
                .client
                .name_server
                .update_consumer_offset_oneway(&addr, &self.group, &mq.topic, mq.queue_id, offset)
                .await
            {
                warn!(message_queue = ?mq, error = %err, "persist consumer offset to broker failed");
            }
        }
    }

    fn remove(&self, mq: &MessageQueue) {
        self.offset_table.lock().remove(mq);
        warn!(consumer_group = %self.group, message_queue = ?mq, "delete message queue from offset table");
    }

    async fn read(&self, mq: &MessageQueue, read_type: ReadType) -> i64 {
        match read_type {
            ReadType::Memory => self.read_from_memory(mq),
            ReadType::MemoryThenStore => {
                let offset = self.read_from_memory(mq);
                if offset != -1 {
                    return offset;
                }
                match self.read_from_broker(mq).await {
                    Ok(offset) => {
                        self.offset_table.lock().insert(mq.clone(), offset);
                        offset
                    }
                    Err(err) => {
                        warn!(message_queue = ?mq, error = %err, "read consumer offset from broker failed");
                        -1
                    }
                }
            }
            ReadType::Store => match self.read_from_broker(mq).await {
                Ok(offset) => offset,
                Err(err) => {
                    warn!(message_queue = ?mq, error = %err, "read consumer offset from broker failed");
                    -1
                }
            },
        }
    }

    fn update(&self, mq: &MessageQueue, offset: i64, increase_only: bool) {
        self.offset_table
            .lock()
            .entry(mq.clone())
            .and_modify(|local_offset| {
                if increase_only {
                    if *local_offset < offset {
                        *local_offset = offset;
                    }
                } else {
                    *local_offset = offset;
                }
            })
            .or_insert(offset);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_message_queue_key_roundtrip() {
        let mq = MessageQueue {
            topic: "TopicTest".to_string(),
            broker_name: "broker-a".to_string(),
            queue_id: 3,
        };
        let key = mq.to_string();
        assert_eq!(parse_message_queue_key(&key), Some(mq));
    }

    #[test]
    fn test_local_file_offset_store_update_and_read_from_memory() {
        let store = LocalFileOffsetStore::new("client1", "group1").unwrap();
        let mq = MessageQueue {
            topic: "t".to_string(),
            broker_name: "b".to_string(),
            queue_id: 0,
        };
        assert_eq!(store.read_from_memory(&mq), -1);
        store.update(&mq, 5, true);
        assert_eq!(store.read_from_memory(&mq), 5);
        store.update(&mq, 3, true);
        assert_eq!(store.read_from_memory(&mq), 5);
        store.update(&mq, 3, false);
        assert_eq!(store.read_from_memory(&mq), 3);
    }
}
