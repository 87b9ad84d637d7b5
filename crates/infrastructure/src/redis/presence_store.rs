use application::{ApplicationError, PresenceStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::error::RedisError;

/// 基于 Redis 哈希的在线目录存储（`HSET` / `HDEL` / `HVALS`）
#[derive(Clone)]
pub struct RedisPresenceStore {
    conn: ConnectionManager,
}

impl RedisPresenceStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), ApplicationError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(key, field, value)
            .await
            .map_err(|e| RedisError::command("HSET", e))?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), ApplicationError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hdel(key, field)
            .await
            .map_err(|e| RedisError::command("HDEL", e))?;
        Ok(())
    }

    async fn hvals(&self, key: &str) -> Result<Vec<String>, ApplicationError> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn
            .hvals(key)
            .await
            .map_err(|e| RedisError::command("HVALS", e))?;
        Ok(values)
    }
}
