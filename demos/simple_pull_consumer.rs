use rocketmq_client::{ConsumerOptions, PullConsumer, PullStatus};

#[tokio::main]
async fn main() {
    let mut options = ConsumerOptions::default();
    options.set_name_server(vec!["localhost:9876".to_string()]);
    let consumer = PullConsumer::with_options(options).unwrap();
    consumer.start();

    let mqs = consumer.fetch_subscribe_message_queues("TEST_TOPIC").await.unwrap();
    for mq in &mqs {
        let mut offset = consumer.fetch_consume_offset(mq).await.max(0);
        loop {
            let result = consumer.pull_blocking_if_not_found(mq, "*", offset, 32).await.unwrap();
            if result.status != PullStatus::Found {
                break;
            }
            for msg in &result.messages {
                println!("{}: {}", msg.msg_id, String::from_utf8_lossy(&msg.message.body));
            }
            offset = result.next_begin_offset;
            consumer.update_consume_offset(mq, offset);
        }
    }
    consumer.shutdown();
}
