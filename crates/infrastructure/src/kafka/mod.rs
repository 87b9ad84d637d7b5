//! Kafka 消息总线模块
//!
//! 入口 topic 承载前端提交的房间消息，每个前端实例另有一个独占的路由 topic。

pub mod admin;
pub mod bus;
pub mod error;

pub use admin::ensure_topics;
pub use bus::{KafkaMessageBus, KafkaSubscription};
pub use error::{KafkaError, KafkaResult};
