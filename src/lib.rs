mod client;
/// RocketMQ consumer
pub mod consumer;
mod error;
/// RocketMQ message types
pub mod message;
mod namesrv;
mod permission;
/// RocketMQ producer
pub mod producer;
mod protocol;
mod remoting;
/// RocketMQ name server resolver
pub mod resolver;
mod route;
mod utils;

pub use consumer::consume_service::{
    ConsumeConcurrentlyStatus, ConsumeOrderlyStatus, MessageListenerConcurrently, MessageListenerOrderly,
};
pub use consumer::strategy::AllocateStrategy;
pub use consumer::pull::{PullConsumer, PullResult, PullStatus};
pub use consumer::{ConsumeFromWhere, ConsumerOptions, MessageModel, PushConsumer};
pub use error::Error;
pub use message::{Message, MessageExt, MessageQueue};
pub use producer::{Producer, ProducerOptions};
