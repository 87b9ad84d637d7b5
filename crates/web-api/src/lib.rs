//! Web API 层。
//!
//! 房间前端的 HTTP / WebSocket 路由，以及扇出进程对外提供的在线目录接口。

mod error;
mod presence_routes;
mod rate_limit;
mod routes;
mod shutdown;
mod state;
mod ws_connection;

use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub use error::{ApiError, ErrorBody};
pub use presence_routes::presence_router;
pub use rate_limit::client_ip;
pub use routes::router;
pub use shutdown::shutdown_signal;
pub use state::{AppState, PresenceState};

/// 按配置的来源列表构建 CORS；`*` 或空列表表示允许任意来源
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
