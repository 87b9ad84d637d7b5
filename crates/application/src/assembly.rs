//! 显式装配
//!
//! 两个进程各有一个装配入口，接收能力 trait 对象（真实适配器或内存实现），
//! 返回连接好的组件。

use std::sync::Arc;
use std::time::Duration;

use config::AppConfig;
use domain::RouteId;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::clock::Clock;
use crate::consumer::{spawn_consumer, ConsumerHandle};
use crate::error::ApplicationError;
use crate::fanout::FanoutCoordinator;
use crate::frontend::{RoomFrontend, RoomFrontendDependencies, RouteDeliveryHandler};
use crate::id_generator::IdGenerator;
use crate::password::PasswordHasher;
use crate::presence::{PresenceClient, PresenceDirectory, PresenceStore};
use crate::rate_limiter::{RateLimitStore, RateLimiter, TokenBucket};
use crate::repository::{MessageRepository, RoomRepository};
use crate::services::{RoomService, RoomServiceDependencies};
use crate::session::ConnectionManager;

pub struct FrontendDependencies {
    pub room_repository: Arc<dyn RoomRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub id_generator: Arc<dyn IdGenerator>,
    pub presence: Arc<dyn PresenceClient>,
    pub bus: Arc<dyn MessageBus>,
    pub rate_limit_store: Arc<dyn RateLimitStore>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct FrontendSettings {
    pub route_id: RouteId,
    pub ingress_topic: String,
    pub rpc_deadline: Duration,
    pub session_queue_capacity: usize,
    pub max_connections: usize,
    pub create_room_bucket: TokenBucket,
    pub create_room_tokens: f64,
}

impl FrontendSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ApplicationError> {
        let bucket = &config.rate_limit.create_room;
        Ok(Self {
            route_id: resolve_route_id(config.frontend.route_id.as_deref())?,
            ingress_topic: config.kafka.ingress_topic.clone(),
            rpc_deadline: config.frontend.rpc_deadline(),
            session_queue_capacity: config.frontend.session_queue_capacity,
            max_connections: config.frontend.max_connections,
            create_room_bucket: TokenBucket::from_config(bucket)?,
            create_room_tokens: bucket.tokens_per_request,
        })
    }
}

/// 使用配置的路由；未配置时生成 `chat.room.<uuid>`
pub fn resolve_route_id(configured: Option<&str>) -> Result<RouteId, ApplicationError> {
    let route = match configured {
        Some(route) => RouteId::parse(route)?,
        None => RouteId::parse(format!("chat.room.{}", Uuid::new_v4()))?,
    };
    Ok(route)
}

/// 房间前端进程的组件
pub struct FrontendAssembly {
    pub room_service: Arc<RoomService>,
    pub frontend: Arc<RoomFrontend>,
    pub connections: Arc<ConnectionManager>,
    pub create_room_limiter: Arc<RateLimiter>,
    pub create_room_tokens: f64,
    bus: Arc<dyn MessageBus>,
    route_id: RouteId,
}

impl FrontendAssembly {
    pub fn assemble(deps: FrontendDependencies, settings: FrontendSettings) -> Self {
        let room_service = Arc::new(RoomService::new(RoomServiceDependencies {
            room_repository: deps.room_repository,
            password_hasher: deps.password_hasher,
            id_generator: deps.id_generator,
        }));

        let frontend = Arc::new(RoomFrontend::new(
            RoomFrontendDependencies {
                room_service: room_service.clone(),
                message_repository: deps.message_repository,
                presence: deps.presence,
                bus: deps.bus.clone(),
                clock: deps.clock.clone(),
            },
            settings.route_id.clone(),
            settings.ingress_topic,
            settings.rpc_deadline,
        ));

        let connections = Arc::new(ConnectionManager::new(
            settings.max_connections,
            settings.session_queue_capacity,
        ));

        let create_room_limiter = Arc::new(RateLimiter::new(
            deps.rate_limit_store,
            settings.create_room_bucket,
            deps.clock,
        ));

        Self {
            room_service,
            frontend,
            connections,
            create_room_limiter,
            create_room_tokens: settings.create_room_tokens,
            bus: deps.bus,
            route_id: settings.route_id,
        }
    }

    pub fn route_id(&self) -> &RouteId {
        &self.route_id
    }

    /// 订阅本实例的路由 topic（消费组即路由本身）并开始投递
    pub async fn start_route_consumer(
        &self,
        cancel: CancellationToken,
    ) -> Result<ConsumerHandle, ApplicationError> {
        let topic = self.route_id.as_str();
        let subscription = self.bus.subscribe(topic, topic).await?;
        let handler = Arc::new(RouteDeliveryHandler::new(self.connections.clone()));
        Ok(spawn_consumer(topic, subscription, handler, cancel))
    }
}

#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub ingress_topic: String,
    pub consumer_group: String,
}

impl FanoutSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ingress_topic: config.kafka.ingress_topic.clone(),
            consumer_group: config.kafka.fanout_group.clone(),
        }
    }
}

/// 在线目录与扇出进程的组件
pub struct FanoutAssembly {
    pub directory: Arc<PresenceDirectory>,
    pub coordinator: Arc<FanoutCoordinator>,
    bus: Arc<dyn MessageBus>,
    settings: FanoutSettings,
}

impl FanoutAssembly {
    pub fn assemble(
        store: Arc<dyn PresenceStore>,
        bus: Arc<dyn MessageBus>,
        settings: FanoutSettings,
    ) -> Self {
        let directory = Arc::new(PresenceDirectory::new(store));
        let coordinator = Arc::new(FanoutCoordinator::new(directory.clone(), bus.clone()));
        Self {
            directory,
            coordinator,
            bus,
            settings,
        }
    }

    pub async fn start_consumer(
        &self,
        cancel: CancellationToken,
    ) -> Result<ConsumerHandle, ApplicationError> {
        let subscription = self
            .bus
            .subscribe(&self.settings.ingress_topic, &self.settings.consumer_group)
            .await?;
        Ok(spawn_consumer(
            self.settings.ingress_topic.clone(),
            subscription,
            self.coordinator.clone(),
            cancel,
        ))
    }
}

