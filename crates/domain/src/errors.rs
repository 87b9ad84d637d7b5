//! 领域模型错误定义
//!
//! 定义了房间、消息以及存储层的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 房间不存在
    #[error("room not found")]
    RoomNotFound,

    /// 消息不存在
    #[error("message not found")]
    MessageNotFound,

    /// 房间数据违反不变式（受保护房间必须带密码哈希）
    #[error("room invariant violated: {0}")]
    RoomInvariant(String),

    /// 无法解码客户端帧
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_frame(reason: impl Into<String>) -> Self {
        Self::MalformedFrame(reason.into())
    }
}

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
