//! 在线目录 HTTP 接口，由扇出进程对前端实例提供。

use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use domain::{RoomId, RouteId, UserName};

use crate::{error::ApiError, state::PresenceState};

#[derive(Debug, Deserialize)]
struct SubscribePayload {
    route_id: String,
}

#[derive(Debug, Serialize)]
struct RoutesResponse {
    routes: BTreeSet<RouteId>,
}

pub fn presence_router(state: PresenceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/presence/rooms/{room_id}/subscribers/{user_name}",
            put(add_subscriber).delete(remove_subscriber),
        )
        .route("/api/presence/rooms/{room_id}/routes", get(list_routes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn add_subscriber(
    State(state): State<PresenceState>,
    Path((room_id, user_name)): Path<(String, String)>,
    Json(payload): Json<SubscribePayload>,
) -> Result<StatusCode, ApiError> {
    let room_id: RoomId = room_id.parse()?;
    let user_name = UserName::parse(user_name)?;
    let route_id = RouteId::parse(payload.route_id)?;

    state
        .directory
        .add_subscriber(room_id, &user_name, &route_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_subscriber(
    State(state): State<PresenceState>,
    Path((room_id, user_name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let room_id: RoomId = room_id.parse()?;
    let user_name = UserName::parse(user_name)?;

    state.directory.remove_subscriber(room_id, &user_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_routes(
    State(state): State<PresenceState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoutesResponse>, ApiError> {
    let room_id: RoomId = room_id.parse()?;
    let routes = state.directory.list_routes(room_id).await?;
    Ok(Json(RoutesResponse { routes }))
}
