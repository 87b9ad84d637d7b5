//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储、bcrypt 密码哈希、Redis 在线目录与限流存储、
//! Kafka 消息总线以及在线目录 HTTP 客户端，实现应用层定义的接口。

pub mod builder;
pub mod kafka;
pub mod migrations;
pub mod password;
pub mod presence_client;
pub mod redis;
pub mod repository;

pub use builder::{FanoutInfrastructure, FrontendInfrastructure, Infrastructure, InfrastructureError};
pub use kafka::{KafkaError, KafkaMessageBus};
pub use migrations::MIGRATOR;
pub use password::BcryptPasswordHasher;
pub use presence_client::HttpPresenceClient;
pub use self::redis::{RedisError, RedisPresenceStore, RedisRateLimitStore};
pub use repository::{create_pg_pool, PgMessageRepository, PgRoomRepository, PgStorage};
