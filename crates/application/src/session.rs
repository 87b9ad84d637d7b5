//! WebSocket 会话与连接注册表
//!
//! 每个会话有一个有界出站队列：房间内投递使用 `try_send`，队列满时会话被驱逐
//! （关闭码 4008），慢客户端不会拖慢其他会话。注册表是显式持有的值，由装配代码注入。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use domain::{RoomId, UserName};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

pub type SessionId = u64;

/// 会话状态机：`Unauthenticated -> Authenticated(room) -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(RoomId),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: &'static str,
}

impl CloseReason {
    pub const INVALID_PASSWORD: CloseReason = CloseReason {
        code: 4001,
        reason: "invalid password",
    };
    pub const JOIN_FAILED: CloseReason = CloseReason {
        code: 4003,
        reason: "join failed",
    };
    pub const SLOW_CONSUMER: CloseReason = CloseReason {
        code: 4008,
        reason: "slow consumer",
    };
    pub const GOING_AWAY: CloseReason = CloseReason {
        code: 1001,
        reason: "server shutting down",
    };
    pub const INTERNAL: CloseReason = CloseReason {
        code: 1011,
        reason: "internal error",
    };
}

/// 写入 WebSocket 的出站指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Skipped,
    Delivered,
    Evicted,
}

pub struct SessionHandle {
    id: SessionId,
    user_name: UserName,
    room_id: RoomId,
    state: Mutex<SessionState>,
    outbound: mpsc::Sender<Outbound>,
    evicted: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_name(&self) -> &UserName {
        &self.user_name
    }

    /// 握手时请求的房间
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// 已加入的房间；未认证或已关闭时为 `None`
    pub fn attached_room(&self) -> Option<RoomId> {
        match self.state() {
            SessionState::Authenticated(room_id) => Some(room_id),
            _ => None,
        }
    }

    /// 仅允许从 `Unauthenticated` 迁移到 `Authenticated`
    pub fn attach(&self) -> bool {
        let mut state = self.lock_state();
        if *state == SessionState::Unauthenticated {
            *state = SessionState::Authenticated(self.room_id);
            true
        } else {
            false
        }
    }

    /// 进入 `Closed` 并返回之前的状态
    pub fn close(&self) -> SessionState {
        std::mem::replace(&mut *self.lock_state(), SessionState::Closed)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Delivery {
        self.push(Outbound::Text(text.into()))
    }

    /// 排队关闭帧，保证其在已排队的文本之后发出
    pub fn request_close(&self, reason: CloseReason) {
        if self.push(Outbound::Close(reason)) == Delivery::Evicted {
            tracing::debug!(session_id = self.id, "close frame dropped, session already evicted");
        }
    }

    /// 投递房间消息；只有已加入同一房间的会话会收到
    pub fn deliver(&self, room_id: RoomId, text: &str) -> Delivery {
        if self.attached_room() != Some(room_id) {
            return Delivery::Skipped;
        }
        self.send_text(text)
    }

    pub fn evicted(&self) -> &CancellationToken {
        &self.evicted
    }

    fn push(&self, item: Outbound) -> Delivery {
        if self.evicted.is_cancelled() {
            return Delivery::Evicted;
        }
        match self.outbound.try_send(item) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    session_id = self.id,
                    user_name = %self.user_name,
                    "outbound queue full, evicting slow session"
                );
                self.evicted.cancel();
                Delivery::Evicted
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.evicted.cancel();
                Delivery::Evicted
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("connection limit of {max} reached")]
    LimitReached { max: usize },
    #[error("server is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: usize,
    pub evicted: usize,
}

pub struct ConnectionManager {
    sessions: Mutex<HashMap<SessionId, Arc<SessionHandle>>>,
    next_id: AtomicU64,
    max_connections: usize,
    queue_capacity: usize,
    shutdown: CancellationToken,
    drained: Notify,
}

impl ConnectionManager {
    pub fn new(max_connections: usize, queue_capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_connections,
            queue_capacity: queue_capacity.max(1),
            shutdown: CancellationToken::new(),
            drained: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_capacity(&self) -> bool {
        self.len() < self.max_connections
    }

    /// 注册新会话。返回的登记在 drop 时自动注销。
    pub fn register(
        self: &Arc<Self>,
        user_name: UserName,
        room_id: RoomId,
    ) -> Result<SessionRegistration, RegisterError> {
        if self.shutdown.is_cancelled() {
            return Err(RegisterError::ShuttingDown);
        }
        let mut sessions = self.lock_sessions();
        if sessions.len() >= self.max_connections {
            return Err(RegisterError::LimitReached {
                max: self.max_connections,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let session = Arc::new(SessionHandle {
            id,
            user_name,
            room_id,
            state: Mutex::new(SessionState::Unauthenticated),
            outbound: tx,
            evicted: CancellationToken::new(),
        });
        sessions.insert(id, session.clone());

        Ok(SessionRegistration {
            session,
            outbound: Some(rx),
            manager: Arc::clone(self),
        })
    }

    pub fn unregister(&self, id: SessionId) {
        let mut sessions = self.lock_sessions();
        sessions.remove(&id);
        if sessions.is_empty() {
            self.drained.notify_waiters();
        }
    }

    /// 进程停机信号，连接驱动据此主动关闭会话（关闭码 1001）
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// 通知所有会话停机并拒绝新的注册
    pub fn shutdown(&self) {
        tracing::info!(sessions = self.len(), "关闭全部 WebSocket 会话");
        self.shutdown.cancel();
    }

    /// 等待所有会话注销，超时返回 `false`
    pub async fn drain(&self, grace_period: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.drained.notified();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace_period, wait).await.is_ok()
    }

    /// 向本实例中加入了 `room_id` 的会话投递消息，被驱逐的会话随即注销
    pub fn deliver_to_room(&self, room_id: RoomId, text: &str) -> DeliveryStats {
        let sessions: Vec<Arc<SessionHandle>> = self.lock_sessions().values().cloned().collect();

        let mut stats = DeliveryStats::default();
        for session in sessions {
            match session.deliver(room_id, text) {
                Delivery::Delivered => stats.delivered += 1,
                Delivery::Evicted => {
                    stats.evicted += 1;
                    self.unregister(session.id());
                }
                Delivery::Skipped => {}
            }
        }
        stats
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<SessionHandle>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SessionRegistration {
    session: Arc<SessionHandle>,
    outbound: Option<mpsc::Receiver<Outbound>>,
    manager: Arc<ConnectionManager>,
}

impl SessionRegistration {
    pub fn session(&self) -> &Arc<SessionHandle> {
        &self.session
    }

    /// 出站队列的接收端，只能取一次
    pub fn take_outbound(&mut self) -> Option<mpsc::Receiver<Outbound>> {
        self.outbound.take()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.manager.shutdown_token().clone()
    }
}

impl Drop for SessionRegistration {
    fn drop(&mut self) {
        self.manager.unregister(self.session.id());
    }
}
