use std::sync::Arc;

use application::{
    ApplicationError, Clock, FrontendDependencies, IdGenerator, MessageBus, PresenceStore,
};
use config::AppConfig;
use thiserror::Error;
use tracing::info;

use crate::{
    kafka::{ensure_topics, KafkaError, KafkaMessageBus},
    migrations::MIGRATOR,
    password::BcryptPasswordHasher,
    presence_client::HttpPresenceClient,
    redis::{self as redis_adapter, RedisError, RedisPresenceStore, RedisRateLimitStore},
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("presence client error: {0}")]
    Presence(#[from] ApplicationError),
}

/// 前端实例所需的全部外部适配器
#[derive(Clone)]
pub struct FrontendInfrastructure {
    pub storage: Arc<PgStorage>,
    pub password_hasher: Arc<BcryptPasswordHasher>,
    pub rate_limit_store: Arc<RedisRateLimitStore>,
    pub presence_client: Arc<HttpPresenceClient>,
    pub bus: Arc<KafkaMessageBus>,
}

impl FrontendInfrastructure {
    /// 与 ID 生成器、时钟一起组装成应用层依赖
    pub fn into_dependencies(
        self,
        id_generator: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> FrontendDependencies {
        FrontendDependencies {
            room_repository: self.storage.room_repository.clone(),
            message_repository: self.storage.message_repository.clone(),
            password_hasher: self.password_hasher,
            id_generator,
            presence: self.presence_client,
            bus: self.bus,
            rate_limit_store: self.rate_limit_store,
            clock,
        }
    }
}

/// 扇出层所需的外部适配器
#[derive(Clone)]
pub struct FanoutInfrastructure {
    pub presence_store: Arc<dyn PresenceStore>,
    pub bus: Arc<dyn MessageBus>,
}

pub struct Infrastructure;

impl Infrastructure {
    pub async fn connect_frontend(
        config: &AppConfig,
    ) -> Result<FrontendInfrastructure, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        if config.database.run_migrations {
            MIGRATOR.run(&pool).await?;
            info!("数据库迁移完成");
        }

        let redis = redis_adapter::connect(&config.redis.url).await?;
        let bus = KafkaMessageBus::new(&config.kafka)?;
        let presence_client = HttpPresenceClient::new(
            &config.frontend.presence_endpoint,
            config.frontend.rpc_deadline(),
        )?;

        Ok(FrontendInfrastructure {
            storage: Arc::new(PgStorage::new(pool)),
            password_hasher: Arc::new(BcryptPasswordHasher::new(config.security.bcrypt_cost)),
            rate_limit_store: Arc::new(RedisRateLimitStore::new(redis)),
            presence_client: Arc::new(presence_client),
            bus: Arc::new(bus),
        })
    }

    pub async fn connect_fanout(
        config: &AppConfig,
    ) -> Result<FanoutInfrastructure, InfrastructureError> {
        let redis = redis_adapter::connect(&config.redis.url).await?;
        let bus = KafkaMessageBus::new(&config.kafka)?;
        Ok(FanoutInfrastructure {
            presence_store: Arc::new(RedisPresenceStore::new(redis)),
            bus: Arc::new(bus),
        })
    }

    /// 创建入口 topic 与（可选的）本实例路由 topic
    pub async fn ensure_topics(
        config: &AppConfig,
        extra: Option<&str>,
    ) -> Result<(), InfrastructureError> {
        let mut topics = vec![config.kafka.ingress_topic.as_str()];
        topics.extend(extra);
        ensure_topics(
            &config.kafka.brokers,
            &topics,
            config.kafka.partitions,
            config.kafka.replication_factor,
        )
        .await?;
        Ok(())
    }
}
