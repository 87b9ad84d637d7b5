mod room_service;

pub use room_service::{CreateRoomRequest, RoomDto, RoomService, RoomServiceDependencies};
