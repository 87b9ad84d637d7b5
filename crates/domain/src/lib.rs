//! 聊天室系统核心领域模型
//!
//! 包含房间、消息、密码帧等核心类型，以及相关的校验规则。

pub mod chat_room;
pub mod errors;
pub mod message;
pub mod password_frame;
pub mod value_objects;

// 重新导出常用类型
pub use chat_room::Room;
pub use errors::*;
pub use message::{Action, Message, MessageEvent};
pub use password_frame::PasswordFrame;
pub use value_objects::{MessageId, PasswordHash, RoomId, RouteId, UserName};
