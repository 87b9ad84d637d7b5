//! 基于 Kafka 的消息总线
//!
//! 以房间 ID 作为记录 key，同一房间的记录落在同一分区，保持提交顺序。
//! 发布不重试（至多一次），失败直接返回给调用方。

use std::time::Duration;

use application::{BusError, Envelope, MessageBus, Subscription};
use async_trait::async_trait;
use config::KafkaConfig;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::{debug, info};

use super::error::{KafkaError, KafkaResult};

const ENVELOPE_ID_HEADER: &str = "envelope-id";

pub struct KafkaMessageBus {
    producer: FutureProducer,
    brokers: String,
    client_id: String,
    send_timeout: Duration,
}

impl KafkaMessageBus {
    pub fn new(config: &KafkaConfig) -> KafkaResult<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", config.send_timeout_ms.to_string())
            .set("acks", "1")
            .set("retries", "0")
            .set("enable.idempotence", "false")
            .set("linger.ms", "5");

        let producer: FutureProducer =
            client_config
                .create()
                .map_err(|e| KafkaError::ConfigError {
                    message: format!("创建 Kafka 生产者失败: {}", e),
                })?;

        info!(brokers = %config.brokers, "Kafka 生产者创建成功");

        Ok(Self {
            producer,
            brokers: config.brokers.clone(),
            client_id: config.client_id.clone(),
            send_timeout: config.send_timeout(),
        })
    }

    fn consumer_config(&self, group: &str) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("group.id", group)
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "10000")
            .set("heartbeat.interval.ms", "3000")
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "1000")
            .set("auto.offset.reset", "latest")
            .set("fetch.wait.max.ms", "100");
        client_config
    }
}

#[async_trait]
impl MessageBus for KafkaMessageBus {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), BusError> {
        let headers = OwnedHeaders::new().insert(Header {
            key: ENVELOPE_ID_HEADER,
            value: Some(envelope.id.as_str()),
        });
        let mut record = FutureRecord::to(topic)
            .payload(&envelope.payload)
            .headers(headers);
        if let Some(key) = envelope.key.as_deref() {
            record = record.key(key);
        }

        self.producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map_err(|(err, _)| BusError::Publish {
                topic: topic.to_owned(),
                message: err.to_string(),
            })?;

        debug!(topic, envelope_id = %envelope.id, "记录已写入 Kafka");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, BusError> {
        let subscribe_error = |message: String| BusError::Subscribe {
            topic: topic.to_owned(),
            message,
        };

        let consumer: StreamConsumer = self
            .consumer_config(group)
            .create()
            .map_err(|e| subscribe_error(format!("创建 Kafka 消费者失败: {}", e)))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| subscribe_error(e.to_string()))?;

        info!(topic, group, "Kafka 消费者已订阅");

        Ok(Box::new(KafkaSubscription {
            consumer,
            topic: topic.to_owned(),
        }))
    }
}

pub struct KafkaSubscription {
    consumer: StreamConsumer,
    topic: String,
}

fn to_envelope(message: &BorrowedMessage<'_>) -> Envelope {
    let key = message
        .key()
        .and_then(|key| std::str::from_utf8(key).ok())
        .map(str::to_owned);
    let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
    let mut envelope = Envelope::new(key, payload);

    let header_id = message.headers().and_then(|headers| {
        headers
            .iter()
            .find(|header| header.key == ENVELOPE_ID_HEADER)
            .and_then(|header| header.value)
            .and_then(|value| std::str::from_utf8(value).ok())
            .map(str::to_owned)
    });
    if let Some(id) = header_id {
        envelope.id = id;
    }
    envelope
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next(&mut self) -> Option<Result<Envelope, BusError>> {
        let result = match self.consumer.recv().await {
            Ok(message) => Ok(to_envelope(&message)),
            Err(err) => Err(BusError::Receive {
                topic: self.topic.clone(),
                message: err.to_string(),
            }),
        };
        Some(result)
    }
}
