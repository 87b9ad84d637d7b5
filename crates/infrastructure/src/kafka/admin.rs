use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::types::RDKafkaErrorCode;
use tracing::info;

use super::error::{KafkaError, KafkaResult};

/// 创建缺失的 topic；已存在的 topic 视为成功。
pub async fn ensure_topics(
    brokers: &str,
    topics: &[&str],
    partitions: i32,
    replication_factor: i32,
) -> KafkaResult<()> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .create()?;

    let new_topics: Vec<NewTopic<'_>> = topics
        .iter()
        .map(|name| NewTopic::new(name, partitions, TopicReplication::Fixed(replication_factor)))
        .collect();

    for result in admin.create_topics(&new_topics, &AdminOptions::new()).await? {
        match result {
            Ok(topic) => info!(topic = %topic, partitions, "已创建 Kafka topic"),
            Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
            Err((topic, code)) => {
                return Err(KafkaError::AdminError {
                    topic,
                    message: code.to_string(),
                })
            }
        }
    }
    Ok(())
}
