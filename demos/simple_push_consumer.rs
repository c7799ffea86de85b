use std::sync::Arc;

use async_trait::async_trait;
use rocketmq_client::{ConsumeConcurrentlyStatus, ConsumerOptions, MessageExt, MessageListenerConcurrently, PushConsumer};

struct PrintListener;

#[async_trait]
impl MessageListenerConcurrently for PrintListener {
    async fn consume_message(&self, msgs: &[MessageExt]) -> ConsumeConcurrentlyStatus {
        for msg in msgs {
            println!("{}: {}", msg.msg_id, String::from_utf8_lossy(&msg.message.body));
        }
        ConsumeConcurrentlyStatus::ConsumeSuccess
    }
}

#[tokio::main]
async fn main() {
    let mut options = ConsumerOptions::default();
    options.set_name_server(vec!["localhost:9876".to_string()]);
    let consumer = PushConsumer::with_options(options).unwrap();
    consumer.subscribe("TEST_TOPIC", "*").unwrap();
    consumer.register_message_listener_concurrently(Arc::new(PrintListener));
    consumer.start().unwrap();

    tokio::signal::ctrl_c().await.unwrap();
    consumer.shutdown();
}
