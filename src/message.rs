use std::collections::HashMap;
use std::convert::TryFrom;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::Error;

pub struct Property;

impl Property {
    pub const KEYS: &'static str = "KEYS";
    pub const TAGS: &'static str = "TAGS";
    pub const WAIT_STORE_MSG_OK: &'static str = "WAIT";
    pub const DELAY_TIME_LEVEL: &'static str = "DELAY";
    pub const RETRY_TOPIC: &'static str = "RETRY_TOPIC";
    pub const REAL_TOPIC: &'static str = "REAL_TOPIC";
    pub const REAL_QUEUE_ID: &'static str = "REAL_QID";
    pub const TRANSACTION_PREPARED: &'static str = "TRAN_MSG";
    pub const PRODUCER_GROUP: &'static str = "PGROUP";
    pub const MIN_OFFSET: &'static str = "MIN_OFFSET";
    pub const MAX_OFFSET: &'static str = "MAX_OFFSET";
    pub const BUYER_ID: &'static str = "BUYER_ID";
    pub const ORIGIN_MESSAGE_ID: &'static str = "ORIGIN_MESSAGE_ID";
    pub const TRANSFER_FLAG: &'static str = "TRANSFER_FLAG";
    pub const CORRECTION_FLAG: &'static str = "CORRECTION_FLAG";
    pub const MQ2_FLAG: &'static str = "MQ2_FLAG";
    pub const RECONSUME_TIME: &'static str = "RECONSUME_TIME";
    pub const MSG_REGION: &'static str = "MSG_REGION";
    pub const TRACE_SWITCH: &'static str = "TRACE_ON";
    pub const UNIQ_CLIENT_MSG_ID_KEY: &'static str = "UNIQ_KEY";
    pub const MAX_RECONSUME_TIMES: &'static str = "MAX_RECONSUME_TIMES";
    pub const TRANSACTION_PREPARED_QUEUE_OFFSET: &'static str = "TRAN_PREPARED_QUEUE_OFFSET";
    pub const TRANSACTION_CHECK_TIMES: &'static str = "TRANSACTION_CHECK_TIMES";
    pub const CHECK_IMMUNITY_TIME_IN_SECONDS: &'static str = "CHECK_IMMUNITY_TIME_IN_SECONDS";
    pub const KEY_SEPARATOR: &'static str = " ";
}

/// Bits of `MessageExt::sys_flag`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum MessageSysFlag {
    Compressed = 0x1,
    MultiTags = 0x1 << 1,
    TransactionNotType = 0x0,
    TransactionPreparedType = 0x1 << 2,
    TransactionCommitType = 0x2 << 2,
    TransactionRollbackType = 0x3 << 2,
    BornHostV6 = 0x1 << 4,
    StoreHostAddressV6 = 0x1 << 5,
}

/// Identifies a single queue of a topic hosted on a specific broker.
///
/// Ordered lexicographically by `(topic, broker_name, queue_id)` so it can be used as a
/// stable `BTreeMap`/sort key for rebalance allocation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageQueue {
    pub topic: String,
    #[serde(rename = "brokerName")]
    pub broker_name: String,
    #[serde(rename = "queueId")]
    pub queue_id: u32,
}

impl MessageQueue {
    pub fn new(topic: impl Into<String>, broker_name: impl Into<String>, queue_id: u32) -> Self {
        Self {
            topic: topic.into(),
            broker_name: broker_name.into(),
            queue_id,
        }
    }
}

impl std::fmt::Display for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MessageQueue [topic={}, brokerName={}, queueId={}]",
            self.topic, self.broker_name, self.queue_id
        )
    }
}

/// A producer-side message awaiting send.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub flag: i32,
    pub properties: HashMap<&'static str, String>,
    pub body: Vec<u8>,
    pub transaction_id: String,
    pub queue: Option<MessageQueue>,
    pub batch: bool,
    pub sys_flag: i32,
}

impl Message {
    pub fn new(
        topic: String,
        tags: String,
        keys: String,
        flag: i32,
        body: Vec<u8>,
        wait_store_msg_ok: bool,
    ) -> Message {
        let mut props = HashMap::new();
        if !tags.is_empty() {
            props.insert(Property::TAGS, tags);
        }
        if !keys.is_empty() {
            props.insert(Property::KEYS, keys);
        }
        props.insert(
            Property::WAIT_STORE_MSG_OK,
            wait_store_msg_ok.to_string(),
        );
        Message {
            topic,
            flag,
            body,
            properties: props,
            transaction_id: String::new(),
            queue: None,
            batch: false,
            sys_flag: 0,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: &'static str, value: String) {
        self.properties.insert(key, value);
    }

    /// Renders `properties` as the RocketMQ wire format: `key1\x01value1\x02key2\x01value2\x02`.
    pub fn dump_properties(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.properties {
            out.push_str(k);
            out.push('\x01');
            out.push_str(v);
            out.push('\x02');
        }
        out
    }

    pub fn unique_key(&self) -> Option<&str> {
        self.properties
            .get(Property::UNIQ_CLIENT_MSG_ID_KEY)
            .map(String::as_str)
    }

    /// Assigns `UNIQ_KEY` from the client id + an incrementing counter if not already set.
    pub fn set_default_unique_key(&mut self) {
        if self.unique_key().is_none() {
            let key = format!(
                "{:X}{:X}",
                std::process::id(),
                rand::random::<u32>()
            );
            self.properties
                .insert(Property::UNIQ_CLIENT_MSG_ID_KEY, key);
        }
    }

    /// Key used by `HashQueueSelector` to consistently route related messages to one queue.
    pub fn sharding_key(&self) -> Option<&str> {
        self.get_property(Property::KEYS)
    }

    /// Concatenates several messages into one RocketMQ "inner batch" message.
    ///
    /// All messages must share the same topic and wait-store flag; batch messages cannot
    /// themselves be batches and cannot carry a delay level.
    pub fn encode_batch(msgs: &[Message]) -> Result<Message, Error> {
        let first = msgs.first().ok_or(Error::EmptyBatchMessage)?;
        let topic = first.topic.clone();
        let mut body = Vec::new();
        for msg in msgs {
            if msg.get_property(Property::DELAY_TIME_LEVEL).is_some() {
                return Err(Error::InvalidHeader(
                    "TimeDelayLevel is not supported for batching".to_string(),
                ));
            }
            let props = msg.dump_properties();
            let props_bytes = props.as_bytes();
            body.extend_from_slice(&(0i32).to_be_bytes()); // magic code placeholder
            body.extend_from_slice(&(msg.flag).to_be_bytes());
            body.extend_from_slice(&(msg.body.len() as i32).to_be_bytes());
            body.extend_from_slice(&msg.body);
            body.extend_from_slice(&(props_bytes.len() as i16).to_be_bytes());
            body.extend_from_slice(props_bytes);
        }
        let mut batched = Message::new(topic, String::new(), String::new(), first.flag, body, true);
        batched.batch = true;
        Ok(batched)
    }
}

/// A message as delivered by the broker to a consumer, carrying store-assigned metadata.
#[derive(Debug, Clone)]
pub struct MessageExt {
    pub message: Message,
    pub queue_id: i32,
    pub store_size: i32,
    pub queue_offset: i64,
    pub sys_flag: i32,
    pub born_timestamp: i64,
    pub store_timestamp: i64,
    pub msg_id: String,
    pub commit_log_offset: i64,
    pub body_crc: i32,
    pub reconsume_times: i32,
    pub prepared_transaction_offset: i64,
}

impl MessageExt {
    pub fn topic(&self) -> &str {
        &self.message.topic
    }

    pub fn tags(&self) -> Option<&str> {
        self.message.get_property(Property::TAGS)
    }

    /// Decodes the concatenated message buffer returned by `PULL_MESSAGE`.
    ///
    /// Wire layout per message (all big-endian): storeSize, magicCode, bodyCRC, queueId,
    /// flag, queueOffset, physicOffset, sysFlag, bornTimestamp, bornHost(8), storeTimestamp,
    /// storeHost(8), reconsumeTimes, preparedTransactionOffset, bodyLen, body,
    /// propertiesLen(i16), properties.
    pub fn from_buffer(input: &[u8]) -> Result<Vec<Self>, Error> {
        const MAGIC_CODE: i32 = -626843481;
        let input_len = input.len() as u64;
        let mut rdr = Cursor::new(input);
        let mut msgs = Vec::new();
        while rdr.position() < input_len {
            let store_size = rdr.read_i32::<BigEndian>()?;
            let magic_code = rdr.read_i32::<BigEndian>()?;
            if magic_code != MAGIC_CODE {
                return Err(Error::InvalidHeader(format!(
                    "unexpected message magic code: {}",
                    magic_code
                )));
            }
            let body_crc = rdr.read_i32::<BigEndian>()?;
            let queue_id = rdr.read_i32::<BigEndian>()?;
            let flag = rdr.read_i32::<BigEndian>()?;
            let queue_offset = rdr.read_i64::<BigEndian>()?;
            let commit_log_offset = rdr.read_i64::<BigEndian>()?;
            let sys_flag = rdr.read_i32::<BigEndian>()?;
            let born_timestamp = rdr.read_i64::<BigEndian>()?;
            let born_host_len = if sys_flag & i32::from(MessageSysFlag::BornHostV6) != 0 {
                16
            } else {
                4
            };
            let mut born_host_buf = vec![0u8; born_host_len + 4];
            rdr.read_exact(&mut born_host_buf)?;
            let store_timestamp = rdr.read_i64::<BigEndian>()?;
            let store_host_len = if sys_flag & i32::from(MessageSysFlag::StoreHostAddressV6) != 0 {
                16
            } else {
                4
            };
            let mut store_host_buf = vec![0u8; store_host_len + 4];
            rdr.read_exact(&mut store_host_buf)?;
            let reconsume_times = rdr.read_i32::<BigEndian>()?;
            let prepared_transaction_offset = rdr.read_i64::<BigEndian>()?;
            let body_len = rdr.read_i32::<BigEndian>()? as usize;
            let mut body = vec![0u8; body_len];
            if body_len > 0 {
                rdr.read_exact(&mut body)?;
            }
            let props_len = rdr.read_i16::<BigEndian>()? as usize;
            let mut properties = HashMap::new();
            if props_len > 0 {
                let mut props_buf = vec![0u8; props_len];
                rdr.read_exact(&mut props_buf)?;
                let props_str = String::from_utf8(props_buf)?;
                for pair in props_str.split('\x02') {
                    if pair.is_empty() {
                        continue;
                    }
                    if let Some((k, v)) = pair.split_once('\x01') {
                        properties.insert(intern_property_key(k), v.to_string());
                    }
                }
            }
            let message = Message {
                topic: String::new(),
                flag,
                properties,
                body,
                transaction_id: String::new(),
                queue: None,
                batch: false,
                sys_flag,
            };
            msgs.push(MessageExt {
                message,
                queue_id,
                store_size,
                queue_offset,
                sys_flag,
                born_timestamp,
                store_timestamp,
                msg_id: String::new(),
                commit_log_offset,
                body_crc,
                reconsume_times,
                prepared_transaction_offset,
            });
        }
        Ok(msgs)
    }
}

/// Maps a decoded property key back to the `&'static str` constants used elsewhere, falling
/// back to leaking unrecognized keys (broker-defined custom properties are rare in practice).
fn intern_property_key(key: &str) -> &'static str {
    match key {
        Property::KEYS => Property::KEYS,
        Property::TAGS => Property::TAGS,
        Property::WAIT_STORE_MSG_OK => Property::WAIT_STORE_MSG_OK,
        Property::DELAY_TIME_LEVEL => Property::DELAY_TIME_LEVEL,
        Property::RETRY_TOPIC => Property::RETRY_TOPIC,
        Property::REAL_TOPIC => Property::REAL_TOPIC,
        Property::REAL_QUEUE_ID => Property::REAL_QUEUE_ID,
        Property::RECONSUME_TIME => Property::RECONSUME_TIME,
        Property::MAX_RECONSUME_TIMES => Property::MAX_RECONSUME_TIMES,
        Property::UNIQ_CLIENT_MSG_ID_KEY => Property::UNIQ_CLIENT_MSG_ID_KEY,
        Property::MSG_REGION => Property::MSG_REGION,
        Property::TRACE_SWITCH => Property::TRACE_SWITCH,
        _ => Box::leak(key.to_string().into_boxed_str()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_message_queue_ordering() {
        let mut mqs = vec![
            MessageQueue::new("t", "b", 2),
            MessageQueue::new("t", "b", 0),
            MessageQueue::new("t", "a", 5),
        ];
        mqs.sort();
        assert_eq!(mqs[0].broker_name, "a");
        assert_eq!(mqs[1].queue_id, 0);
        assert_eq!(mqs[2].queue_id, 2);
    }

    #[test]
    fn test_message_dump_properties_roundtrip() {
        let msg = Message::new(
            "topic".to_string(),
            "tagA".to_string(),
            "key1".to_string(),
            0,
            b"body".to_vec(),
            true,
        );
        let dumped = msg.dump_properties();
        assert!(dumped.contains("TAGS\x01tagA\x02"));
        assert!(dumped.contains("KEYS\x01key1\x02"));
    }

    #[test]
    fn test_encode_batch_requires_non_empty() {
        let err = Message::encode_batch(&[]).unwrap_err();
        assert!(matches!(err, Error::EmptyBatchMessage));
    }

    #[test]
    fn test_encode_batch_marks_batch_flag() {
        let msgs = vec![
            Message::new("t".to_string(), String::new(), String::new(), 0, b"a".to_vec(), false),
            Message::new("t".to_string(), String::new(), String::new(), 0, b"b".to_vec(), false),
        ];
        let batched = Message::encode_batch(&msgs).unwrap();
        assert!(batched.batch);
        assert_eq!(batched.topic, "t");
    }
}
