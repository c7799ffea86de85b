use std::collections::HashMap;
use std::convert::TryFrom;
use std::time::Duration;

use parking_lot::Mutex;

use crate::client::Credentials;
use crate::message::MessageQueue;
use crate::protocol::{
    request::{
        ConsumerSendMsgBackRequestHeader, GetConsumerListByGroupRequestHeader,
        GetMaxOffsetRequestHeader, GetRouteInfoRequestHeader, LockBatchMqBody,
        PullMessageRequestHeader, QueryConsumerOffsetRequestHeader, RequestCode,
        SearchOffsetByTimestampRequestHeader, UpdateConsumerOffsetRequestHeader,
    },
    response::{
        GetConsumerListByGroupResponseBody, LockBatchMqResponseBody, PullMessageResponseHeader,
        PullStatus, ResponseCode,
    },
    RemotingCommand,
};
use crate::remoting::RemotingClient;
use crate::resolver::NsResolver;
use crate::route::TopicRouteData;
use crate::Error;

#[derive(Debug, Default)]
struct NameServerInner {
    servers: Vec<String>,
    index: usize,
    /// broker_name -> (brokerId -> addr), merged from every topic route seen so far.
    broker_addr_table: HashMap<String, HashMap<i64, String>>,
    /// topic -> last-seen route, used to detect route changes for producers/consumers.
    topic_route_table: HashMap<String, TopicRouteData>,
}

/// Resolves and caches broker/route information, and carries the remoting connection pool
/// shared by both name-server and broker RPCs.
#[derive(Debug)]
pub struct NameServer<NR: NsResolver> {
    inner: Mutex<NameServerInner>,
    resolver: NR,
    remoting_client: RemotingClient,
}

impl<NR: NsResolver> NameServer<NR> {
    pub fn new(resolver: NR, credentials: Option<Credentials>) -> Result<Self, Error> {
        Ok(Self {
            inner: Mutex::new(NameServerInner::default()),
            resolver,
            remoting_client: RemotingClient::new(credentials),
        })
    }

    pub(crate) fn remoting_client(&self) -> &RemotingClient {
        &self.remoting_client
    }

    pub fn get_address(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        if inner.servers.is_empty() {
            return None;
        }
        let index = inner.index % inner.servers.len();
        inner.index = inner.index.wrapping_add(1);
        Some(
            inner.servers[index]
                .trim_start_matches("http(s)://")
                .to_string(),
        )
    }

    pub fn len(&self) -> usize {
        self.inner.lock().servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().servers.is_empty()
    }

    /// Re-resolves the name server address list; called periodically by the client's poll
    /// loop so DNS/env/http changes are picked up without a restart.
    pub async fn update(&self) -> Result<(), Error> {
        let servers = self.resolver.resolve().await?;
        if !servers.is_empty() {
            self.inner.lock().servers = servers;
        }
        Ok(())
    }

    pub fn find_broker_addr_by_name(&self, broker_name: &str) -> Option<String> {
        self.inner
            .lock()
            .broker_addr_table
            .get(broker_name)
            .and_then(|addrs| addrs.get(&0).or_else(|| addrs.values().next()))
            .cloned()
    }

    /// Every broker master address this name server has resolved so far, used to fan a
    /// heartbeat out to all of them.
    pub fn all_broker_addrs(&self) -> Vec<String> {
        self.inner
            .lock()
            .broker_addr_table
            .values()
            .filter_map(|addrs| addrs.get(&0).or_else(|| addrs.values().next()))
            .cloned()
            .collect()
    }

    fn cache_route(&self, topic: &str, route: &TopicRouteData) {
        let mut inner = self.inner.lock();
        for broker_data in &route.broker_datas {
            inner
                .broker_addr_table
                .entry(broker_data.broker_name.clone())
                .or_default()
                .extend(broker_data.broker_addrs.clone());
        }
        inner
            .topic_route_table
            .insert(topic.to_string(), route.clone());
    }

    pub async fn query_topic_route_info(&self, topic: &str) -> Result<TopicRouteData, Error> {
        let servers = self.inner.lock().servers.clone();
        if servers.is_empty() {
            return Err(Error::EmptyNameServers);
        }
        let header = GetRouteInfoRequestHeader {
            topic: topic.to_string(),
        };
        let mut last_err = Error::EmptyRouteData;
        for addr in &servers {
            let cmd = RemotingCommand::with_header(
                RequestCode::GetRouteInfoByTopic.into(),
                header.clone(),
                Vec::new(),
            );
            match self.remoting_client.invoke(addr, cmd).await {
                Ok(res) => match ResponseCode::try_from(res.code()).unwrap_or(ResponseCode::SystemError) {
                    ResponseCode::Success => {
                        if res.body.is_empty() {
                            return Err(Error::EmptyRouteData);
                        }
                        let route_data = TopicRouteData::from_bytes(&res.body)?;
                        self.cache_route(topic, &route_data);
                        return Ok(route_data);
                    }
                    ResponseCode::TopicNotExist => {
                        return Err(Error::TopicNotExist(topic.to_string()))
                    }
                    _ => {
                        last_err = Error::ResponseError {
                            code: res.code(),
                            message: res.header.remark.clone(),
                        }
                    }
                },
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    /// Fetches the route for `topic`, comparing against the cached copy to report whether a
    /// producer/consumer should recompute its queue list.
    pub async fn update_topic_route_info(&self, topic: &str) -> Result<(TopicRouteData, bool), Error> {
        let route = self.query_topic_route_info(topic).await?;
        let changed = self
            .inner
            .lock()
            .topic_route_table
            .get(topic)
            .map(|cached| !routes_equal(cached, &route))
            .unwrap_or(true);
        Ok((route, changed))
    }

    /// Like `update_topic_route_info`, but falls back to synthesizing a route from
    /// `default_topic` (usually `TBW102`) when `topic` has not been created yet — mirrors
    /// auto topic creation in the Java/C++ clients.
    pub async fn update_topic_route_info_with_default(
        &self,
        topic: &str,
        default_topic: &str,
        default_queue_nums: i32,
    ) -> Result<(TopicRouteData, bool), Error> {
        match self.update_topic_route_info(topic).await {
            Ok(result) => Ok(result),
            Err(Error::TopicNotExist(_)) => {
                let mut route = self.query_topic_route_info(default_topic).await?;
                for qd in &mut route.queue_datas {
                    qd.read_queue_nums = default_queue_nums as u32;
                    qd.write_queue_nums = default_queue_nums as u32;
                }
                self.cache_route(topic, &route);
                Ok((route, true))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn query_consumer_id_list_by_group(
        &self,
        broker_addr: &str,
        group: &str,
    ) -> Result<Vec<String>, Error> {
        let header = GetConsumerListByGroupRequestHeader {
            consumer_group: group.to_string(),
        };
        let cmd = RemotingCommand::with_header(
            RequestCode::GetConsumerListByGroup.into(),
            header,
            Vec::new(),
        );
        let res = self.remoting_client.invoke(broker_addr, cmd).await?;
        let body: GetConsumerListByGroupResponseBody = serde_json::from_slice(&res.body)?;
        Ok(body.consumer_id_list)
    }

    pub async fn lock_batch_mq(
        &self,
        broker_addr: &str,
        client_id: &str,
        group: &str,
        mqs: Vec<MessageQueue>,
    ) -> Result<Vec<MessageQueue>, Error> {
        let body = LockBatchMqBody {
            consumer_group: group.to_string(),
            client_id: client_id.to_string(),
            mq_set: mqs,
        };
        let cmd = RemotingCommand::new(
            0,
            RequestCode::LockBatchMQ.into(),
            0,
            String::new(),
            HashMap::new(),
            serde_json::to_vec(&body)?,
        );
        let res = self.remoting_client.invoke(broker_addr, cmd).await?;
        let body: LockBatchMqResponseBody = serde_json::from_slice(&res.body)?;
        Ok(body.lock_ok_mq_set)
    }

    pub async fn unlock_batch_mq(
        &self,
        broker_addr: &str,
        client_id: &str,
        group: &str,
        mqs: Vec<MessageQueue>,
    ) -> Result<(), Error> {
        let body = LockBatchMqBody {
            consumer_group: group.to_string(),
            client_id: client_id.to_string(),
            mq_set: mqs,
        };
        let cmd = RemotingCommand::new(
            0,
            RequestCode::UnlockBatchMQ.into(),
            0,
            String::new(),
            HashMap::new(),
            serde_json::to_vec(&body)?,
        );
        self.remoting_client.invoke_oneway(broker_addr, cmd).await
    }

    pub async fn search_offset_by_timestamp(
        &self,
        broker_addr: &str,
        topic: &str,
        queue_id: u32,
        timestamp: i64,
    ) -> Result<i64, Error> {
        let header = SearchOffsetByTimestampRequestHeader {
            topic: topic.to_string(),
            queue_id,
            timestamp,
        };
        let cmd = RemotingCommand::with_header(
            RequestCode::SearchOffsetByTimestamp.into(),
            header,
            Vec::new(),
        );
        let res = self.remoting_client.invoke(broker_addr, cmd).await?;
        self.require_success(&res)?;
        parse_offset_field(&res.header.ext_fields, "offset")
    }

    pub async fn get_max_offset(
        &self,
        broker_addr: &str,
        topic: &str,
        queue_id: u32,
    ) -> Result<i64, Error> {
        let header = GetMaxOffsetRequestHeader {
            topic: topic.to_string(),
            queue_id,
        };
        let cmd = RemotingCommand::with_header(RequestCode::GetMaxOffset.into(), header, Vec::new());
        let res = self.remoting_client.invoke(broker_addr, cmd).await?;
        self.require_success(&res)?;
        parse_offset_field(&res.header.ext_fields, "offset")
    }

    pub async fn query_consumer_offset(
        &self,
        broker_addr: &str,
        group: &str,
        topic: &str,
        queue_id: u32,
    ) -> Result<i64, Error> {
        let header = QueryConsumerOffsetRequestHeader {
            consumer_group: group.to_string(),
            topic: topic.to_string(),
            queue_id,
        };
        let cmd =
            RemotingCommand::with_header(RequestCode::QueryConsumerOffset.into(), header, Vec::new());
        let res = self.remoting_client.invoke(broker_addr, cmd).await?;
        self.require_success(&res)?;
        parse_offset_field(&res.header.ext_fields, "offset")
    }

    pub async fn update_consumer_offset_oneway(
        &self,
        broker_addr: &str,
        group: &str,
        topic: &str,
        queue_id: u32,
        offset: i64,
    ) -> Result<(), Error> {
        let header = UpdateConsumerOffsetRequestHeader {
            consumer_group: group.to_string(),
            topic: topic.to_string(),
            queue_id,
            commit_offset: offset,
        };
        let cmd = RemotingCommand::with_header(
            RequestCode::UpdateConsumerOffset.into(),
            header,
            Vec::new(),
        );
        self.remoting_client.invoke_oneway(broker_addr, cmd).await
    }

    pub async fn pull_message(
        &self,
        broker_addr: &str,
        header: PullMessageRequestHeader,
        timeout: Duration,
    ) -> Result<(PullStatus, PullMessageResponseHeader, Vec<u8>), Error> {
        let cmd = RemotingCommand::with_header(RequestCode::PullMessage.into(), header, Vec::new());
        let res = tokio::time::timeout(timeout, self.remoting_client.invoke(broker_addr, cmd))
            .await
            .map_err(|_| {
                Error::ResponseError {
                    code: -1,
                    message: "pull message timed out".to_string(),
                }
            })??;
        let code = ResponseCode::try_from(res.code()).unwrap_or(ResponseCode::SystemError);
        let status = PullStatus::from(code);
        let response_header = PullMessageResponseHeader::from_ext_fields(&res.header.ext_fields)?;
        Ok((status, response_header, res.body))
    }

    /// Sends a consumed-but-failed message back to the broker for delayed redelivery
    /// (`CONSUMER_SEND_MSG_BACK`).
    pub async fn consumer_send_msg_back(
        &self,
        broker_addr: &str,
        header: ConsumerSendMsgBackRequestHeader,
    ) -> Result<(), Error> {
        let cmd = RemotingCommand::with_header(
            RequestCode::ConsumerSendMsgBack.into(),
            header,
            Vec::new(),
        );
        let res = self.remoting_client.invoke(broker_addr, cmd).await?;
        self.require_success(&res)
    }

    fn require_success(&self, cmd: &RemotingCommand) -> Result<(), Error> {
        match ResponseCode::try_from(cmd.code()).unwrap_or(ResponseCode::SystemError) {
            ResponseCode::Success => Ok(()),
            _ => Err(Error::ResponseError {
                code: cmd.code(),
                message: cmd.header.remark.clone(),
            }),
        }
    }
}

fn parse_offset_field(ext_fields: &HashMap<String, String>, key: &str) -> Result<i64, Error> {
    ext_fields
        .get(key)
        .ok_or_else(|| Error::InvalidHeader(format!("missing response field {}", key)))?
        .parse()
        .map_err(|_| Error::InvalidHeader(format!("malformed response field {}", key)))
}

fn routes_equal(a: &TopicRouteData, b: &TopicRouteData) -> bool {
    serde_json::to_string(a).ok() == serde_json::to_string(b).ok()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resolver::StaticResolver;

    #[tokio::test]
    async fn test_query_topic_route_info_with_empty_namesrv() {
        let namesrv = NameServer::new(StaticResolver::new(vec![]), None).unwrap();
        let res = namesrv.query_topic_route_info("test").await;
        assert!(res.is_err());
    }

    #[test]
    fn test_find_broker_addr_by_name_unknown() {
        let namesrv = NameServer::new(StaticResolver::new(vec![]), None).unwrap();
        assert!(namesrv.find_broker_addr_by_name("unknown-broker").is_none());
    }
}
