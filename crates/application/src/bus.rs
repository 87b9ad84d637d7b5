//! 消息总线抽象
//!
//! 具名 topic 的发布/订阅，按分区键保证同键有序，订阅方通过消费组分摊。
//! 生产环境由 Kafka 实现，测试使用 [`memory::MemoryMessageBus`]。

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// 总线上的一条记录。`id` 与消息自身的 ID 无关。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(key: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key,
            payload,
        }
    }

    pub fn keyed(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(Some(key.into()), payload)
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },
    #[error("subscribe to {topic} failed: {message}")]
    Subscribe { topic: String, message: String },
    #[error("receive from {topic} failed: {message}")]
    Receive { topic: String, message: String },
    #[error("topic administration failed: {0}")]
    Admin(String),
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), BusError>;

    /// 以消费组 `group` 订阅 `topic`
    async fn subscribe(&self, topic: &str, group: &str)
        -> Result<Box<dyn Subscription>, BusError>;
}

/// 订阅流。返回 `None` 表示订阅已结束。
#[async_trait]
pub trait Subscription: Send {
    async fn next(&mut self) -> Option<Result<Envelope, BusError>>;
}

pub mod memory {
    use std::collections::hash_map::DefaultHasher;
    use std::collections::{HashMap, HashSet};
    use std::hash::{Hash, Hasher};

    use tokio::sync::{mpsc, Mutex};

    use super::*;

    #[derive(Default)]
    struct GroupState {
        members: Vec<mpsc::UnboundedSender<Envelope>>,
        cursor: usize,
    }

    #[derive(Default)]
    struct TopicState {
        groups: HashMap<String, GroupState>,
        log: Vec<Envelope>,
    }

    /// 进程内总线：每个消费组内按分区键选择成员，无键时轮询。
    #[derive(Default)]
    pub struct MemoryMessageBus {
        topics: Mutex<HashMap<String, TopicState>>,
        failing: Mutex<HashSet<String>>,
    }

    impl MemoryMessageBus {
        pub fn new() -> Self {
            Self::default()
        }

        /// 让后续发往 `topic` 的发布全部失败
        pub async fn fail_topic(&self, topic: &str) {
            self.failing.lock().await.insert(topic.to_owned());
        }

        /// 已成功发布到 `topic` 的记录
        pub async fn published(&self, topic: &str) -> Vec<Envelope> {
            self.topics
                .lock()
                .await
                .get(topic)
                .map(|state| state.log.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl MessageBus for MemoryMessageBus {
        async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), BusError> {
            if self.failing.lock().await.contains(topic) {
                return Err(BusError::Publish {
                    topic: topic.to_owned(),
                    message: "injected failure".into(),
                });
            }

            let mut topics = self.topics.lock().await;
            let state = topics.entry(topic.to_owned()).or_default();
            state.log.push(envelope.clone());

            for group in state.groups.values_mut() {
                group.members.retain(|member| !member.is_closed());
                if group.members.is_empty() {
                    continue;
                }
                let index = match &envelope.key {
                    Some(key) => {
                        let mut hasher = DefaultHasher::new();
                        key.hash(&mut hasher);
                        (hasher.finish() % group.members.len() as u64) as usize
                    }
                    None => {
                        group.cursor = group.cursor.wrapping_add(1);
                        group.cursor % group.members.len()
                    }
                };
                // 接收端刚好关闭时丢弃，与至多一次投递一致
                let _ = group.members[index].send(envelope.clone());
            }
            Ok(())
        }

        async fn subscribe(
            &self,
            topic: &str,
            group: &str,
        ) -> Result<Box<dyn Subscription>, BusError> {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut topics = self.topics.lock().await;
            topics
                .entry(topic.to_owned())
                .or_default()
                .groups
                .entry(group.to_owned())
                .or_default()
                .members
                .push(tx);
            Ok(Box::new(MemorySubscription { receiver: rx }))
        }
    }

    pub struct MemorySubscription {
        receiver: mpsc::UnboundedReceiver<Envelope>,
    }

    #[async_trait]
    impl Subscription for MemorySubscription {
        async fn next(&mut self) -> Option<Result<Envelope, BusError>> {
            self.receiver.recv().await.map(Ok)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn every_group_receives_each_envelope_once() {
            let bus = MemoryMessageBus::new();
            let mut a1 = bus.subscribe("t", "a").await.unwrap();
            let mut a2 = bus.subscribe("t", "a").await.unwrap();
            let mut b = bus.subscribe("t", "b").await.unwrap();

            bus.publish("t", Envelope::keyed("7", b"x".to_vec()))
                .await
                .unwrap();

            let got_b = b.next().await.unwrap().unwrap();
            assert_eq!(got_b.payload, b"x");

            let first = tokio::time::timeout(std::time::Duration::from_millis(20), a1.next()).await;
            let second =
                tokio::time::timeout(std::time::Duration::from_millis(20), a2.next()).await;
            assert_eq!(
                first.is_ok() as u8 + second.is_ok() as u8,
                1,
                "exactly one member of group a consumes the envelope"
            );
        }

        #[tokio::test]
        async fn same_key_sticks_to_one_member() {
            let bus = MemoryMessageBus::new();
            let mut m1 = bus.subscribe("t", "g").await.unwrap();
            let mut m2 = bus.subscribe("t", "g").await.unwrap();
            for i in 0..5u8 {
                bus.publish("t", Envelope::keyed("room-1", vec![i]))
                    .await
                    .unwrap();
            }
            drop(bus);

            let mut collected = Vec::new();
            for sub in [&mut m1, &mut m2] {
                let mut mine = Vec::new();
                while let Ok(Some(Ok(env))) =
                    tokio::time::timeout(std::time::Duration::from_millis(20), sub.next()).await
                {
                    mine.push(env.payload[0]);
                }
                collected.push(mine);
            }
            let non_empty: Vec<_> = collected.into_iter().filter(|v| !v.is_empty()).collect();
            assert_eq!(non_empty, vec![vec![0, 1, 2, 3, 4]]);
        }

        #[tokio::test]
        async fn injected_failures_are_reported_per_topic() {
            let bus = MemoryMessageBus::new();
            bus.fail_topic("broken").await;
            assert!(bus
                .publish("broken", Envelope::new(None, vec![]))
                .await
                .is_err());
            assert!(bus.publish("fine", Envelope::new(None, vec![])).await.is_ok());
            assert_eq!(bus.published("fine").await.len(), 1);
            assert!(bus.published("broken").await.is_empty());
        }
    }
}
