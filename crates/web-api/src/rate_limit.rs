//! 创建房间接口的限流中间件，按客户端 IP 计桶。

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::{error::ApiError, state::AppState};

const CREATE_ROOM_SUFFIX: &str = ":create_room";

/// 客户端地址：优先 `X-Forwarded-For` 的第一个地址，其次 `X-Real-IP`，最后是对端地址
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_owned();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_owned();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

pub async fn limit_create_room(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = format!("{}{}", client_ip(request.headers(), peer), CREATE_ROOM_SUFFIX);

    let decision = state
        .create_room_limiter
        .allow(&key, state.create_room_tokens)
        .await?;
    if !decision.allowed {
        tracing::info!(key = %key, retry_after = decision.retry_after_header(), "创建房间被限流");
        return Err(ApiError::rate_limited(&decision));
    }

    Ok(next.run(request).await)
}
