//! Redis 错误类型定义

use application::{ApplicationError, RateLimitError};
use thiserror::Error;

/// Redis 操作错误
#[derive(Error, Debug)]
pub enum RedisError {
    /// 连接错误
    #[error("Redis 连接错误: {message}")]
    ConnectionError { message: String },

    /// 命令执行错误
    #[error("Redis 命令 {operation} 失败: {message}")]
    CommandError { operation: String, message: String },

    /// 脚本返回值无法解析
    #[error("Redis 脚本返回值无效: {message}")]
    UnexpectedReply { message: String },

    /// 配置错误
    #[error("配置错误: {message}")]
    ConfigError { message: String },
}

/// Redis 结果类型
pub type RedisResult<T> = Result<T, RedisError>;

impl RedisError {
    pub fn command(operation: impl Into<String>, err: redis::RedisError) -> Self {
        RedisError::CommandError {
            operation: operation.into(),
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for RedisError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::InvalidClientConfig => RedisError::ConfigError {
                message: err.to_string(),
            },
            _ => RedisError::ConnectionError {
                message: err.to_string(),
            },
        }
    }
}

impl From<RedisError> for ApplicationError {
    fn from(err: RedisError) -> Self {
        let message = err.to_string();
        ApplicationError::infrastructure_with_source(message, err)
    }
}

impl From<RedisError> for RateLimitError {
    fn from(err: RedisError) -> Self {
        RateLimitError::store(err.to_string())
    }
}
