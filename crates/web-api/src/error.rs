use application::{ApplicationError, ErrorCategory, RateLimitDecision, RateLimitError};
use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, RepositoryError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    /// 429，附带向上取整的 `Retry-After` 秒数
    pub fn rate_limited(decision: &RateLimitDecision) -> Self {
        let mut err = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "too many requests",
        );
        err.retry_after = Some(decision.retry_after_header());
        err
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;

        match error {
            AppErr::Domain(DomainError::InvalidArgument { field, reason }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                format!("{}: {}", field, reason),
            ),
            AppErr::Domain(DomainError::RoomNotFound) => {
                ApiError::new(StatusCode::NOT_FOUND, "ROOM_NOT_FOUND", "room not found")
            }
            AppErr::Repository(RepositoryError::NotFound) => ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "requested resource not found",
            ),
            AppErr::Repository(RepositoryError::Conflict) => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT", "resource already exists")
            }
            AppErr::Timeout { operation, .. } => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "TIMEOUT",
                format!("{operation} timed out"),
            ),
            other => match other.category() {
                ErrorCategory::Validation => ApiError::bad_request(other.to_string()),
                ErrorCategory::NotFound => {
                    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", other.to_string())
                }
                ErrorCategory::Auth | ErrorCategory::Dependency => {
                    tracing::error!(error = %other, "request failed on a dependency");
                    ApiError::internal_server_error("internal server error")
                }
            },
        }
    }
}

impl From<RateLimitError> for ApiError {
    fn from(error: RateLimitError) -> Self {
        match error {
            RateLimitError::InvalidParameters(message) => {
                ApiError::internal_server_error(format!("rate limiter misconfigured: {message}"))
            }
            RateLimitError::Store { message } => {
                tracing::error!(error = %message, "rate limit store failed");
                ApiError::internal_server_error("rate limiter unavailable")
            }
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        ApiError::from(ApplicationError::from(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after;
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn categories_map_to_status_codes() {
        let cases = [
            (
                ApplicationError::from(DomainError::invalid_argument("name", "empty")),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApplicationError::from(DomainError::RoomNotFound),
                StatusCode::NOT_FOUND,
            ),
            (
                ApplicationError::from(RepositoryError::storage("down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApplicationError::Timeout {
                    operation: "presence rpc",
                    after: Duration::from_millis(10),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let response = ApiError::rate_limited(&RateLimitDecision::rejected(2.2)).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "3");
    }
}
