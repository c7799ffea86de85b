use std::collections::HashMap;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

#[repr(i16)]
#[derive(Debug, Copy, Clone, IntoPrimitive, TryFromPrimitive)]
pub enum RequestCode {
    SendMessage = 10,
    PullMessage = 11,
    QueryConsumerOffset = 14,
    UpdateConsumerOffset = 15,
    SearchOffsetByTimestamp = 29,
    GetMaxOffset = 30,
    Heartbeat = 34,
    ConsumerSendMsgBack = 36,
    EndTransaction = 37,
    GetConsumerListByGroup = 38,
    CheckTransactionState = 39,
    NotifyConsumerIdsChanged = 40,
    LockBatchMQ = 41,
    UnlockBatchMQ = 42,
    GetRouteInfoByTopic = 105,
    ResetConsumerOffset = 220,
    GetConsumerRunningInfo = 307,
    ConsumeMessageDirectly = 309,
    SendBatchMessage = 320,
    SendMessageV2 = 310,
}

/// Headers encode to a flat `extFields` map, matching the Java client's
/// `CommandCustomHeader#getAndCheckFields`.
pub trait EncodeRequestHeader {
    fn encode(&self) -> HashMap<String, String>;
}

#[derive(Debug, Clone)]
pub struct SendMessageRequestHeader {
    pub producer_group: String,
    pub topic: String,
    pub queue_id: u32,
    pub sys_flag: i32,
    pub born_timestamp: i64,
    pub flag: i32,
    pub properties: String,
    pub reconsume_times: i32,
    pub unit_mode: bool,
    pub max_reconsume_times: i32,
    pub batch: bool,
    pub default_topic: String,
    pub default_topic_queue_nums: i32,
}

impl EncodeRequestHeader for SendMessageRequestHeader {
    fn encode(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("producerGroup".to_string(), self.producer_group.clone());
        m.insert("topic".to_string(), self.topic.clone());
        m.insert("queueId".to_string(), self.queue_id.to_string());
        m.insert("sysFlag".to_string(), self.sys_flag.to_string());
        m.insert("bornTimestamp".to_string(), self.born_timestamp.to_string());
        m.insert("flag".to_string(), self.flag.to_string());
        m.insert("properties".to_string(), self.properties.clone());
        m.insert("reconsumeTimes".to_string(), self.reconsume_times.to_string());
        m.insert("unitMode".to_string(), self.unit_mode.to_string());
        m.insert(
            "maxReconsumeTimes".to_string(),
            self.max_reconsume_times.to_string(),
        );
        m.insert("batch".to_string(), self.batch.to_string());
        m.insert("defaultTopic".to_string(), self.default_topic.clone());
        m.insert(
            "defaultTopicQueueNums".to_string(),
            self.default_topic_queue_nums.to_string(),
        );
        m
    }
}

/// Same fields as V1, sent for `SendMessageV2`/batch sends; the broker accepts the same
/// `extFields` names so no key compaction is implemented here.
pub type SendMessageRequestV2Header = SendMessageRequestHeader;

#[derive(Debug, Clone)]
pub struct GetRouteInfoRequestHeader {
    pub topic: String,
}

impl EncodeRequestHeader for GetRouteInfoRequestHeader {
    fn encode(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("topic".to_string(), self.topic.clone());
        m
    }
}

#[derive(Debug, Clone)]
pub struct PullMessageRequestHeader {
    pub consumer_group: String,
    pub topic: String,
    pub queue_id: u32,
    pub queue_offset: i64,
    pub max_msg_nums: i32,
    pub sys_flag: i32,
    pub commit_offset: i64,
    pub suspend_timeout_millis: i64,
    pub subscription: String,
    pub sub_version: i64,
    pub expression_type: String,
}

impl EncodeRequestHeader for PullMessageRequestHeader {
    fn encode(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("consumerGroup".to_string(), self.consumer_group.clone());
        m.insert("topic".to_string(), self.topic.clone());
        m.insert("queueId".to_string(), self.queue_id.to_string());
        m.insert("queueOffset".to_string(), self.queue_offset.to_string());
        m.insert("maxMsgNums".to_string(), self.max_msg_nums.to_string());
        m.insert("sysFlag".to_string(), self.sys_flag.to_string());
        m.insert("commitOffset".to_string(), self.commit_offset.to_string());
        m.insert(
            "suspendTimeoutMillis".to_string(),
            self.suspend_timeout_millis.to_string(),
        );
        m.insert("subscription".to_string(), self.subscription.clone());
        m.insert("subVersion".to_string(), self.sub_version.to_string());
        m.insert("expressionType".to_string(), self.expression_type.clone());
        m
    }
}

#[derive(Debug, Clone)]
pub struct QueryConsumerOffsetRequestHeader {
    pub consumer_group: String,
    pub topic: String,
    pub queue_id: u32,
}

impl EncodeRequestHeader for QueryConsumerOffsetRequestHeader {
    fn encode(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("consumerGroup".to_string(), self.consumer_group.clone());
        m.insert("topic".to_string(), self.topic.clone());
        m.insert("queueId".to_string(), self.queue_id.to_string());
        m
    }
}

#[derive(Debug, Clone)]
pub struct UpdateConsumerOffsetRequestHeader {
    pub consumer_group: String,
    pub topic: String,
    pub queue_id: u32,
    pub commit_offset: i64,
}

impl EncodeRequestHeader for UpdateConsumerOffsetRequestHeader {
    fn encode(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("consumerGroup".to_string(), self.consumer_group.clone());
        m.insert("topic".to_string(), self.topic.clone());
        m.insert("queueId".to_string(), self.queue_id.to_string());
        m.insert("commitOffset".to_string(), self.commit_offset.to_string());
        m
    }
}

#[derive(Debug, Clone)]
pub struct SearchOffsetByTimestampRequestHeader {
    pub topic: String,
    pub queue_id: u32,
    pub timestamp: i64,
}

impl EncodeRequestHeader for SearchOffsetByTimestampRequestHeader {
    fn encode(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("topic".to_string(), self.topic.clone());
        m.insert("queueId".to_string(), self.queue_id.to_string());
        m.insert("timestamp".to_string(), self.timestamp.to_string());
        m
    }
}

#[derive(Debug, Clone)]
pub struct GetMaxOffsetRequestHeader {
    pub topic: String,
    pub queue_id: u32,
}

impl EncodeRequestHeader for GetMaxOffsetRequestHeader {
    fn encode(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("topic".to_string(), self.topic.clone());
        m.insert("queueId".to_string(), self.queue_id.to_string());
        m
    }
}

#[derive(Debug, Clone)]
pub struct GetConsumerListByGroupRequestHeader {
    pub consumer_group: String,
}

impl EncodeRequestHeader for GetConsumerListByGroupRequestHeader {
    fn encode(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("consumerGroup".to_string(), self.consumer_group.clone());
        m
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerSendMsgBackRequestHeader {
    pub group: String,
    pub offset: i64,
    pub delay_level: i32,
    pub origin_msg_id: String,
    pub origin_topic: String,
    pub unit_mode: bool,
    pub max_reconsume_times: i32,
}

impl EncodeRequestHeader for ConsumerSendMsgBackRequestHeader {
    fn encode(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("group".to_string(), self.group.clone());
        m.insert("offset".to_string(), self.offset.to_string());
        m.insert("delayLevel".to_string(), self.delay_level.to_string());
        m.insert("originMsgId".to_string(), self.origin_msg_id.clone());
        m.insert("originTopic".to_string(), self.origin_topic.clone());
        m.insert("unitMode".to_string(), self.unit_mode.to_string());
        m.insert(
            "maxReconsumeTimes".to_string(),
            self.max_reconsume_times.to_string(),
        );
        m
    }
}

/// Body of `LOCK_BATCH_MQ` / `UNLOCK_BATCH_MQ` requests (orderly-consume queue locking).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockBatchMqBody {
    #[serde(rename = "consumerGroup")]
    pub consumer_group: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "mqSet")]
    pub mq_set: Vec<crate::message::MessageQueue>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_send_message_request_header_encode() {
        let header = SendMessageRequestHeader {
            producer_group: "pg".to_string(),
            topic: "t".to_string(),
            queue_id: 1,
            sys_flag: 0,
            born_timestamp: 123,
            flag: 0,
            properties: String::new(),
            reconsume_times: 0,
            unit_mode: false,
            max_reconsume_times: 0,
            batch: false,
            default_topic: "TBW102".to_string(),
            default_topic_queue_nums: 4,
        };
        let fields = header.encode();
        assert_eq!(fields["producerGroup"], "pg");
        assert_eq!(fields["queueId"], "1");
    }
}
