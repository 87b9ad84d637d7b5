//! Redis 适配器：在线目录存储与令牌桶限流存储。

pub mod error;
pub mod presence_store;
pub mod rate_limit_store;

pub use error::{RedisError, RedisResult};
pub use presence_store::RedisPresenceStore;
pub use rate_limit_store::RedisRateLimitStore;

/// 建立带自动重连的连接
pub async fn connect(url: &str) -> RedisResult<redis::aio::ConnectionManager> {
    let client = redis::Client::open(url)?;
    Ok(client.get_connection_manager().await?)
}
