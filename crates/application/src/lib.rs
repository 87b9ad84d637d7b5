//! 应用层实现。
//!
//! 围绕领域模型的用例与协议：在线目录、消息扇出、房间前端会话状态机、
//! 令牌桶限流、分布式 ID，以及对外部适配器（存储、总线、密码哈希）的能力抽象。

pub mod assembly;
pub mod bus;
pub mod clock;
pub mod consumer;
pub mod error;
pub mod fanout;
pub mod frontend;
pub mod id_generator;
pub mod password;
pub mod presence;
pub mod rate_limiter;
pub mod repository;
pub mod services;
pub mod session;

pub use assembly::{
    FanoutAssembly, FanoutSettings, FrontendAssembly, FrontendDependencies, FrontendSettings,
};
pub use bus::{BusError, Envelope, MessageBus, Subscription};
pub use clock::{Clock, ManualClock, SystemClock};
pub use consumer::{spawn_consumer, ConsumerHandle, EnvelopeHandler, ShutdownOutcome};
pub use error::{with_deadline, ApplicationError, ApplicationResult, ErrorCategory};
pub use fanout::{FanoutCoordinator, FanoutReport};
pub use frontend::{RoomFrontend, RouteDeliveryHandler, SessionFlow};
pub use id_generator::{IdGenerator, IdGeneratorError, SnowflakeGenerator};
pub use password::{PasswordHasher, PasswordHasherError};
pub use presence::{LocalPresenceClient, PresenceClient, PresenceDirectory, PresenceStore};
pub use rate_limiter::{RateLimitDecision, RateLimitError, RateLimitStore, RateLimiter, TokenBucket};
pub use repository::{MessageRepository, RoomRepository};
pub use services::{CreateRoomRequest, RoomDto, RoomService};
pub use session::{
    CloseReason, ConnectionManager, Outbound, RegisterError, SessionHandle, SessionRegistration,
    SessionState,
};

/// 测试与单进程部署用的内存实现
pub mod memory {
    pub use crate::bus::memory::MemoryMessageBus;
    pub use crate::password::memory::PlainPasswordHasher;
    pub use crate::presence::memory::MemoryPresenceStore;
    pub use crate::rate_limiter::memory::MemoryRateLimitStore;
    pub use crate::repository::memory::{MemoryMessageRepository, MemoryRoomRepository};
}
