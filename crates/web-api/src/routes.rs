use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    middleware,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use application::{CreateRoomRequest, RegisterError, RoomDto};
use domain::{RoomId, UserName};

use crate::{error::ApiError, rate_limit::limit_create_room, state::AppState, ws_connection};

#[derive(Debug, Deserialize)]
struct JoinRoomQuery {
    #[serde(rename = "userName")]
    user_name: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/rooms",
            post(create_room).route_layer(middleware::from_fn_with_state(state, limit_create_room)),
        )
        .route("/rooms/{room_id}", get(join_room))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn create_room(
    State(state): State<AppState>,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomDto>), ApiError> {
    let dto = state.room_service.create_room(payload).await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

async fn join_room(
    State(state): State<AppState>,
    Path(raw_room_id): Path<String>,
    Query(query): Query<JoinRoomQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let room_id: RoomId = raw_room_id.parse()?;
    let user_name = query
        .user_name
        .ok_or_else(|| ApiError::bad_request("userName is required"))
        .and_then(|name| UserName::parse(name).map_err(ApiError::from))?;

    if !state.room_service.room_exists(room_id).await? {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "ROOM_NOT_FOUND",
            "room not found",
        ));
    }

    let ws = ws.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let registration = state
        .connections
        .register(user_name.clone(), room_id)
        .map_err(|err| match err {
            RegisterError::LimitReached { max } => {
                tracing::warn!(max, "连接数已达上限，拒绝升级");
                ApiError::service_unavailable("too many connections")
            }
            RegisterError::ShuttingDown => ApiError::service_unavailable("server shutting down"),
        })?;

    tracing::info!(room_id = %room_id, user_name = %user_name, "WebSocket 升级");
    let frontend = state.frontend.clone();
    Ok(ws.on_upgrade(move |socket| ws_connection::run(socket, frontend, registration)))
}
