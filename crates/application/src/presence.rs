//! 在线目录
//!
//! 记录 (房间, 用户) -> 路由 的映射：每个房间一个哈希，字段为用户名，值为持有该用户
//! 连接的前端实例路由。查询时对路由去重，扇出层据此把房间消息投递到各实例。

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{RoomId, RouteId, UserName};

use crate::error::ApplicationError;

/// 具备哈希语义、按 key 串行化的键值存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), ApplicationError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), ApplicationError>;
    async fn hvals(&self, key: &str) -> Result<Vec<String>, ApplicationError>;
}

/// 房间订阅者哈希的键
pub fn subscriber_key(room_id: RoomId) -> String {
    format!("subscriber:{room_id}")
}

pub struct PresenceDirectory {
    store: Arc<dyn PresenceStore>,
}

impl PresenceDirectory {
    pub fn new(store: Arc<dyn PresenceStore>) -> Self {
        Self { store }
    }

    /// 幂等写入，后写覆盖先写
    pub async fn add_subscriber(
        &self,
        room_id: RoomId,
        user_name: &UserName,
        route_id: &RouteId,
    ) -> Result<(), ApplicationError> {
        self.store
            .hset(
                &subscriber_key(room_id),
                user_name.as_str(),
                route_id.as_str(),
            )
            .await?;
        tracing::debug!(room_id = %room_id, user_name = %user_name, route_id = %route_id, "subscriber added");
        Ok(())
    }

    pub async fn remove_subscriber(
        &self,
        room_id: RoomId,
        user_name: &UserName,
    ) -> Result<(), ApplicationError> {
        self.store
            .hdel(&subscriber_key(room_id), user_name.as_str())
            .await?;
        tracing::debug!(room_id = %room_id, user_name = %user_name, "subscriber removed");
        Ok(())
    }

    /// 去重后的路由集合；为空表示房间内没有在线连接
    pub async fn list_routes(&self, room_id: RoomId) -> Result<BTreeSet<RouteId>, ApplicationError> {
        let values = self.store.hvals(&subscriber_key(room_id)).await?;
        let mut routes = BTreeSet::new();
        for value in values {
            match RouteId::parse(value) {
                Ok(route) => {
                    routes.insert(route);
                }
                Err(err) => {
                    tracing::warn!(room_id = %room_id, error = %err, "ignoring malformed route entry");
                }
            }
        }
        Ok(routes)
    }
}

/// 在线目录 RPC 契约（前端实例调用扇出层）
#[async_trait]
pub trait PresenceClient: Send + Sync {
    async fn add_room_subscriber(
        &self,
        room_id: RoomId,
        user_name: &UserName,
        route_id: &RouteId,
    ) -> Result<(), ApplicationError>;

    async fn remove_room_subscriber(
        &self,
        room_id: RoomId,
        user_name: &UserName,
    ) -> Result<(), ApplicationError>;
}

/// 进程内客户端，直接调用目录（单进程部署与测试）
pub struct LocalPresenceClient {
    directory: Arc<PresenceDirectory>,
}

impl LocalPresenceClient {
    pub fn new(directory: Arc<PresenceDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl PresenceClient for LocalPresenceClient {
    async fn add_room_subscriber(
        &self,
        room_id: RoomId,
        user_name: &UserName,
        route_id: &RouteId,
    ) -> Result<(), ApplicationError> {
        self.directory
            .add_subscriber(room_id, user_name, route_id)
            .await
    }

    async fn remove_room_subscriber(
        &self,
        room_id: RoomId,
        user_name: &UserName,
    ) -> Result<(), ApplicationError> {
        self.directory.remove_subscriber(room_id, user_name).await
    }
}

pub mod memory {
    use std::collections::HashMap;

    use tokio::sync::RwLock;

    use super::*;

    #[derive(Default)]
    pub struct MemoryPresenceStore {
        hashes: RwLock<HashMap<String, HashMap<String, String>>>,
    }

    impl MemoryPresenceStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl PresenceStore for MemoryPresenceStore {
        async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), ApplicationError> {
            self.hashes
                .write()
                .await
                .entry(key.to_owned())
                .or_default()
                .insert(field.to_owned(), value.to_owned());
            Ok(())
        }

        async fn hdel(&self, key: &str, field: &str) -> Result<(), ApplicationError> {
            let mut hashes = self.hashes.write().await;
            if let Some(hash) = hashes.get_mut(key) {
                hash.remove(field);
                if hash.is_empty() {
                    hashes.remove(key);
                }
            }
            Ok(())
        }

        async fn hvals(&self, key: &str) -> Result<Vec<String>, ApplicationError> {
            Ok(self
                .hashes
                .read()
                .await
                .get(key)
                .map(|hash| hash.values().cloned().collect())
                .unwrap_or_default())
        }
    }
}
