use std::collections::HashMap;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::message::MessageQueue;
use crate::Error;

#[repr(i16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum ResponseCode {
    Success = 0,
    SystemError = 1,
    FlushDiskTimeout = 10,
    SlaveNotAvailable = 11,
    FlushSlaveTimeout = 12,
    TopicNotExist = 17,
    PullNotFound = 19,
    PullRetryImmediately = 20,
    PullOffsetMoved = 21,
    QueryNotFound = 22,
    SubscriptionParseFailed = 23,
    SubscriptionNotExist = 24,
    SubscriptionNotLatest = 25,
    SubscriptionGroupNotExist = 26,
    NoPermission = 205,
    ConsumerNotOnline = 206,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    Found,
    NoNewMsg,
    NoMatchedMsg,
    OffsetIllegal,
}

#[derive(Debug, Clone)]
pub struct SendMessageResponse {
    pub msg_id: String,
    pub queue_id: i32,
    pub queue_offset: i64,
    pub transaction_id: String,
    pub msg_region: String,
}

#[derive(Debug, Clone)]
pub struct PullMessageResponseHeader {
    pub suggest_which_broker_id: i64,
    pub next_begin_offset: i64,
    pub min_offset: i64,
    pub max_offset: i64,
}

impl PullMessageResponseHeader {
    pub fn from_ext_fields(ext_fields: &HashMap<String, String>) -> Result<Self, Error> {
        let parse = |key: &str| -> Result<i64, Error> {
            ext_fields
                .get(key)
                .ok_or_else(|| Error::InvalidHeader(format!("missing pull response field {}", key)))?
                .parse()
                .map_err(|_| Error::InvalidHeader(format!("malformed pull response field {}", key)))
        };
        Ok(Self {
            suggest_which_broker_id: parse("suggestWhichBrokerId").unwrap_or(0),
            next_begin_offset: parse("nextBeginOffset")?,
            min_offset: parse("minOffset")?,
            max_offset: parse("maxOffset")?,
        })
    }
}

impl From<ResponseCode> for PullStatus {
    fn from(code: ResponseCode) -> Self {
        match code {
            ResponseCode::Success => PullStatus::Found,
            ResponseCode::PullNotFound => PullStatus::NoNewMsg,
            ResponseCode::PullRetryImmediately => PullStatus::NoMatchedMsg,
            ResponseCode::PullOffsetMoved => PullStatus::OffsetIllegal,
            _ => PullStatus::NoNewMsg,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetConsumerListByGroupResponseBody {
    #[serde(rename = "consumerIdList")]
    pub consumer_id_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockBatchMqResponseBody {
    #[serde(rename = "lockOKMQSet")]
    pub lock_ok_mq_set: Vec<MessageQueue>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pull_status_from_response_code() {
        assert_eq!(PullStatus::from(ResponseCode::Success), PullStatus::Found);
        assert_eq!(
            PullStatus::from(ResponseCode::PullNotFound),
            PullStatus::NoNewMsg
        );
        assert_eq!(
            PullStatus::from(ResponseCode::PullOffsetMoved),
            PullStatus::OffsetIllegal
        );
    }

    #[test]
    fn test_pull_message_response_header_from_ext_fields() {
        let mut fields = HashMap::new();
        fields.insert("nextBeginOffset".to_string(), "10".to_string());
        fields.insert("minOffset".to_string(), "0".to_string());
        fields.insert("maxOffset".to_string(), "100".to_string());
        let header = PullMessageResponseHeader::from_ext_fields(&fields).unwrap();
        assert_eq!(header.next_begin_offset, 10);
        assert_eq!(header.max_offset, 100);
    }
}
