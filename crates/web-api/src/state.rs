use std::sync::Arc;

use application::{
    ConnectionManager, FrontendAssembly, PresenceDirectory, RateLimiter, RoomFrontend, RoomService,
};

/// 房间前端（`chatroom`）路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub room_service: Arc<RoomService>,
    pub frontend: Arc<RoomFrontend>,
    pub connections: Arc<ConnectionManager>,
    pub create_room_limiter: Arc<RateLimiter>,
    pub create_room_tokens: f64,
}

impl AppState {
    pub fn from_assembly(assembly: &FrontendAssembly) -> Self {
        Self {
            room_service: assembly.room_service.clone(),
            frontend: assembly.frontend.clone(),
            connections: assembly.connections.clone(),
            create_room_limiter: assembly.create_room_limiter.clone(),
            create_room_tokens: assembly.create_room_tokens,
        }
    }
}

/// 在线目录服务（`chat-fanout`）路由共享状态
#[derive(Clone)]
pub struct PresenceState {
    pub directory: Arc<PresenceDirectory>,
}

impl PresenceState {
    pub fn new(directory: Arc<PresenceDirectory>) -> Self {
        Self { directory }
    }
}
