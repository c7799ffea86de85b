use std::collections::HashMap;

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::message::MessageQueue;
use crate::permission::Permission;
use crate::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueData {
    #[serde(rename = "brokerName")]
    pub broker_name: String,
    #[serde(rename = "readQueueNums")]
    pub read_queue_nums: u32,
    #[serde(rename = "writeQueueNums")]
    pub write_queue_nums: u32,
    pub perm: Permission,
    #[serde(rename = "topicSyncFlag")]
    pub topic_sync_flag: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerData {
    pub cluster: String,
    #[serde(rename = "brokerName")]
    pub broker_name: String,
    #[serde(rename = "brokerAddrs")]
    pub broker_addrs: HashMap<i64, String>,
}

impl BrokerData {
    /// Selects a (preferably master) broker address from the registered list.
    /// If the master's address cannot be found, a slave broker address is selected in a random manner.
    pub fn select_broker_addr(&self) -> Option<&str> {
        self.broker_addrs.get(&0).map(String::as_str).or_else(|| {
            let addrs: Vec<_> = self.broker_addrs.values().collect();
            if addrs.is_empty() {
                return None;
            }
            let mut rng = rand::thread_rng();
            let index = rng.gen_range(0, addrs.len());
            addrs.get(index).map(|s| s.as_str())
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicRouteData {
    #[serde(rename = "orderTopicConf", default)]
    pub order_topic_conf: String,
    #[serde(rename = "queueDatas")]
    pub queue_datas: Vec<QueueData>,
    #[serde(rename = "brokerDatas")]
    pub broker_datas: Vec<BrokerData>,
    #[serde(rename = "filterServerTable", default)]
    pub filter_server_table: HashMap<String, Vec<String>>,
}

impl TopicRouteData {
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Expands into the set of queues a producer is allowed to publish into, ordered by
    /// `(broker_name, queue_id)` the way the name server returns them.
    pub fn to_publish_info(&self, topic: &str) -> TopicPublishInfo {
        let mut message_queues = Vec::new();
        let order_topic = !self.order_topic_conf.is_empty();
        if order_topic {
            for segment in self.order_topic_conf.split(';') {
                let mut parts = segment.splitn(2, ':');
                if let (Some(broker_name), Some(nums)) = (parts.next(), parts.next()) {
                    if let Ok(nums) = nums.parse::<u32>() {
                        for queue_id in 0..nums {
                            message_queues.push(MessageQueue::new(topic, broker_name, queue_id));
                        }
                    }
                }
            }
        } else {
            let mut queue_datas = self.queue_datas.clone();
            queue_datas.sort_by(|a, b| a.broker_name.cmp(&b.broker_name));
            for qd in &queue_datas {
                if !qd.perm.is_writeable() {
                    continue;
                }
                let has_broker = self.broker_datas.iter().any(|bd| bd.broker_name == qd.broker_name);
                if !has_broker {
                    continue;
                }
                for queue_id in 0..qd.write_queue_nums {
                    message_queues.push(MessageQueue::new(topic, &qd.broker_name, queue_id));
                }
            }
        }
        TopicPublishInfo {
            order_topic,
            have_topic_router_info: true,
            message_queues,
            send_which_queue: 0,
        }
    }

    /// Expands into the set of queues a consumer is allowed to subscribe to.
    pub fn to_subscribe_info(&self, topic: &str) -> Vec<MessageQueue> {
        let mut mqs = Vec::new();
        for qd in &self.queue_datas {
            if !qd.perm.is_readable() {
                continue;
            }
            for queue_id in 0..qd.read_queue_nums {
                mqs.push(MessageQueue::new(topic, &qd.broker_name, queue_id));
            }
        }
        mqs.sort();
        mqs
    }
}

/// Per-topic view cached by producers: the set of queues it may publish to.
#[derive(Debug, Clone, Default)]
pub struct TopicPublishInfo {
    pub order_topic: bool,
    pub have_topic_router_info: bool,
    pub message_queues: Vec<MessageQueue>,
    send_which_queue: usize,
}

impl TopicPublishInfo {
    /// Round-robins through `message_queues`, skipping `last_broker_name` when possible.
    pub fn select_one_queue(&mut self, last_broker_name: Option<&str>) -> Option<MessageQueue> {
        if self.message_queues.is_empty() {
            return None;
        }
        if let Some(last_broker_name) = last_broker_name {
            for _ in 0..self.message_queues.len() {
                self.send_which_queue = self.send_which_queue.wrapping_add(1);
                let index = self.send_which_queue % self.message_queues.len();
                let mq = &self.message_queues[index];
                if mq.broker_name != last_broker_name {
                    return Some(mq.clone());
                }
            }
        }
        self.send_which_queue = self.send_which_queue.wrapping_add(1);
        let index = self.send_which_queue % self.message_queues.len();
        Some(self.message_queues[index].clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_route() -> TopicRouteData {
        let mut broker_addrs = HashMap::new();
        broker_addrs.insert(0, "10.0.0.1:10911".to_string());
        TopicRouteData {
            order_topic_conf: String::new(),
            queue_datas: vec![QueueData {
                broker_name: "broker-a".to_string(),
                read_queue_nums: 4,
                write_queue_nums: 4,
                perm: Permission::READ | Permission::WRITE,
                topic_sync_flag: 0,
            }],
            broker_datas: vec![BrokerData {
                cluster: "DefaultCluster".to_string(),
                broker_name: "broker-a".to_string(),
                broker_addrs,
            }],
            filter_server_table: HashMap::new(),
        }
    }

    #[test]
    fn test_to_publish_info_expands_write_queues() {
        let route = sample_route();
        let info = route.to_publish_info("test-topic");
        assert_eq!(info.message_queues.len(), 4);
        assert!(info.have_topic_router_info);
    }

    #[test]
    fn test_to_subscribe_info_expands_read_queues() {
        let route = sample_route();
        let mqs = route.to_subscribe_info("test-topic");
        assert_eq!(mqs.len(), 4);
        assert_eq!(mqs[0].queue_id, 0);
    }

    #[test]
    fn test_select_one_queue_round_robins() {
        let mut info = sample_route().to_publish_info("test-topic");
        let first = info.select_one_queue(None).unwrap();
        let second = info.select_one_queue(None).unwrap();
        assert_ne!(first.queue_id, second.queue_id);
    }
}
