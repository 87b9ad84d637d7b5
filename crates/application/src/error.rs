use std::time::Duration;

use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::bus::BusError;
use crate::id_generator::IdGeneratorError;
use crate::password::PasswordHasherError;
use crate::rate_limiter::RateLimitError;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("message bus error: {0}")]
    Bus(#[from] BusError),
    #[error("id generator error: {0}")]
    IdGenerator(#[from] IdGeneratorError),
    #[error("rate limiter error: {0}")]
    RateLimit(#[from] RateLimitError),
    #[error("infrastructure error: {message}")]
    Infrastructure {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("authentication failed")]
    Authentication,
}

/// 错误分类，决定对外的呈现方式（HTTP 状态码 / WebSocket 关闭码）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Auth,
    Dependency,
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带底层错误源的基础设施错误
    pub fn infrastructure_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ApplicationError::Infrastructure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ApplicationError::Domain(err) => match err {
                DomainError::InvalidArgument { .. } | DomainError::MalformedFrame(_) => {
                    ErrorCategory::Validation
                }
                DomainError::RoomNotFound | DomainError::MessageNotFound => ErrorCategory::NotFound,
                DomainError::RoomInvariant(_) => ErrorCategory::Dependency,
            },
            ApplicationError::Repository(RepositoryError::NotFound) => ErrorCategory::NotFound,
            ApplicationError::Authentication => ErrorCategory::Auth,
            ApplicationError::Repository(_)
            | ApplicationError::Password(_)
            | ApplicationError::Bus(_)
            | ApplicationError::IdGenerator(_)
            | ApplicationError::RateLimit(_)
            | ApplicationError::Infrastructure { .. }
            | ApplicationError::Timeout { .. } => ErrorCategory::Dependency,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;

/// 为远程调用附加截止时间；超时即视为失败，本层不重试。
pub async fn with_deadline<T, F>(
    operation: &'static str,
    deadline: Duration,
    future: F,
) -> ApplicationResult<T>
where
    F: std::future::Future<Output = ApplicationResult<T>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(ApplicationError::Timeout {
            operation,
            after: deadline,
        }),
    }
}
