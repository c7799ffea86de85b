use std::sync::Arc;

use super::consume_service::{MessageListenerConcurrently, MessageListenerOrderly};
use super::{Consumer, ConsumerOptions};
use crate::Error;

/// RocketMQ push consumer: messages are delivered to a registered listener as they arrive,
/// driven by a background rebalance and pull loop rather than the application calling `pull`.
#[derive(Debug)]
pub struct PushConsumer {
    consumer: Consumer,
}

impl PushConsumer {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            consumer: Consumer::new()?,
        })
    }

    pub fn with_options(options: ConsumerOptions) -> Result<Self, Error> {
        Ok(Self {
            consumer: Consumer::with_options(options)?,
        })
    }

    pub fn subscribe(&self, topic: &str, sub_expression: &str) -> Result<(), Error> {
        self.consumer.subscribe(topic, sub_expression)
    }

    /// Registers an unordered listener; messages within and across queues may be delivered out
    /// of order and concurrently, bounded by the configured consume thread count.
    pub fn register_message_listener_concurrently(&self, listener: Arc<dyn MessageListenerConcurrently>) {
        self.consumer.register_message_listener_concurrently(listener);
    }

    /// Registers an ordered listener; messages within a single queue are delivered one at a
    /// time, in offset order.
    pub fn register_message_listener_orderly(&self, listener: Arc<dyn MessageListenerOrderly>) {
        self.consumer.register_message_listener_orderly(listener);
    }

    pub fn start(&self) -> Result<(), Error> {
        self.consumer.start()
    }

    pub fn shutdown(&self) {
        self.consumer.shutdown();
    }
}
