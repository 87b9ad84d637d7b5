//! 房间前端
//!
//! 驱动每个 WebSocket 会话的状态机，负责受保护房间的密码校验、在线目录注册/注销、
//! 把客户端消息发布到入口 topic，以及把本实例路由 topic 上的消息投递给本地会话。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    Action, DomainError, Message, MessageEvent, MessageId, PasswordFrame, RepositoryError, RoomId,
    RouteId,
};

use crate::bus::{Envelope, MessageBus};
use crate::clock::Clock;
use crate::consumer::EnvelopeHandler;
use crate::error::{with_deadline, ApplicationError, ErrorCategory};
use crate::presence::PresenceClient;
use crate::repository::MessageRepository;
use crate::services::RoomService;
use crate::session::{CloseReason, ConnectionManager, SessionHandle, SessionState};

pub const PASSWORD_CHALLENGE: &str = "This room is protected, please enter the password";
pub const INVALID_PASSWORD: &str = "Invalid password";

/// 处理完一个事件后会话的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlow {
    Continue,
    Close(CloseReason),
}

pub struct RoomFrontendDependencies {
    pub room_service: Arc<RoomService>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub presence: Arc<dyn PresenceClient>,
    pub bus: Arc<dyn MessageBus>,
    pub clock: Arc<dyn Clock>,
}

pub struct RoomFrontend {
    deps: RoomFrontendDependencies,
    route_id: RouteId,
    ingress_topic: String,
    rpc_deadline: Duration,
}

impl RoomFrontend {
    pub fn new(
        deps: RoomFrontendDependencies,
        route_id: RouteId,
        ingress_topic: impl Into<String>,
        rpc_deadline: Duration,
    ) -> Self {
        Self {
            deps,
            route_id,
            ingress_topic: ingress_topic.into(),
            rpc_deadline,
        }
    }

    pub fn route_id(&self) -> &RouteId {
        &self.route_id
    }

    pub async fn on_connect(&self, session: &SessionHandle) -> SessionFlow {
        let room_id = session.room_id();
        match self.deps.room_service.is_protected(room_id).await {
            Ok(true) => {
                tracing::info!(room_id = %room_id, user_name = %session.user_name(), "受保护房间，等待密码");
                session.send_text(PASSWORD_CHALLENGE);
                SessionFlow::Continue
            }
            Ok(false) => self.join(session).await,
            Err(err) => {
                tracing::error!(room_id = %room_id, error = %err, "failed to load room on connect");
                match err.category() {
                    ErrorCategory::NotFound => SessionFlow::Close(CloseReason::JOIN_FAILED),
                    _ => SessionFlow::Close(CloseReason::INTERNAL),
                }
            }
        }
    }

    pub async fn on_frame(&self, session: &SessionHandle, text: &str) -> SessionFlow {
        match session.state() {
            SessionState::Unauthenticated => self.authenticate(session, text).await,
            SessionState::Authenticated(room_id) => {
                if let Err(err) = self.dispatch(session, room_id, text).await {
                    match err.category() {
                        ErrorCategory::Validation | ErrorCategory::NotFound => {
                            tracing::debug!(room_id = %room_id, error = %err, "dropping client frame");
                        }
                        _ => {
                            tracing::error!(room_id = %room_id, user_name = %session.user_name(), error = %err, "failed to handle client frame");
                        }
                    }
                }
                SessionFlow::Continue
            }
            SessionState::Closed => SessionFlow::Continue,
        }
    }

    pub async fn on_close(&self, session: &SessionHandle) {
        let SessionState::Authenticated(room_id) = session.close() else {
            tracing::debug!(session_id = session.id(), "unauthenticated session closed");
            return;
        };
        let user_name = session.user_name();

        if let Err(err) = with_deadline(
            "presence.remove_room_subscriber",
            self.rpc_deadline,
            self.deps.presence.remove_room_subscriber(room_id, user_name),
        )
        .await
        {
            tracing::error!(room_id = %room_id, user_name = %user_name, error = %err, "failed to remove subscriber");
        }

        let left = Message::action(
            MessageId::UNASSIGNED,
            room_id,
            user_name,
            Action::Left,
            self.deps.clock.now_millis(),
        );
        if let Err(err) = self.publish(&left).await {
            tracing::error!(room_id = %room_id, user_name = %user_name, error = %err, "failed to publish leave");
        }
        tracing::info!(room_id = %room_id, user_name = %user_name, "用户离开房间");
    }

    async fn authenticate(&self, session: &SessionHandle, text: &str) -> SessionFlow {
        let room_id = session.room_id();
        let Some(frame) = PasswordFrame::parse(text).filter(|frame| frame.targets(room_id)) else {
            session.send_text(PASSWORD_CHALLENGE);
            return SessionFlow::Continue;
        };

        match self
            .deps
            .room_service
            .verify_password(room_id, &frame.password)
            .await
        {
            Ok(()) => self.join(session).await,
            Err(err) if err.category() == ErrorCategory::Auth => {
                tracing::info!(room_id = %room_id, user_name = %session.user_name(), "密码错误");
                session.send_text(INVALID_PASSWORD);
                SessionFlow::Close(CloseReason::INVALID_PASSWORD)
            }
            Err(err) => {
                tracing::error!(room_id = %room_id, error = %err, "password verification failed");
                SessionFlow::Close(CloseReason::INTERNAL)
            }
        }
    }

    /// 先注册在线目录，成功后才挂载房间并广播 joined
    async fn join(&self, session: &SessionHandle) -> SessionFlow {
        let room_id = session.room_id();
        let user_name = session.user_name();

        if let Err(err) = with_deadline(
            "presence.add_room_subscriber",
            self.rpc_deadline,
            self.deps
                .presence
                .add_room_subscriber(room_id, user_name, &self.route_id),
        )
        .await
        {
            tracing::error!(room_id = %room_id, user_name = %user_name, error = %err, "presence registration failed, aborting join");
            return SessionFlow::Close(CloseReason::JOIN_FAILED);
        }

        if !session.attach() {
            return SessionFlow::Continue;
        }
        tracing::info!(room_id = %room_id, user_name = %user_name, route_id = %self.route_id, "用户加入房间");

        let joined = Message::action(
            MessageId::UNASSIGNED,
            room_id,
            user_name,
            Action::Joined,
            self.deps.clock.now_millis(),
        );
        if let Err(err) = self.publish(&joined).await {
            tracing::error!(room_id = %room_id, user_name = %user_name, error = %err, "failed to publish join");
        }
        SessionFlow::Continue
    }

    async fn dispatch(
        &self,
        session: &SessionHandle,
        room_id: RoomId,
        text: &str,
    ) -> Result<(), ApplicationError> {
        let mut message = Message::decode(text.as_bytes())?;
        let now = self.deps.clock.now_millis();
        message.room_id = room_id;
        message.user_name = session.user_name().as_str().to_owned();
        message.time_millis = now;

        match message.event {
            MessageEvent::Action => {
                if Action::parse(&message.payload).is_none() {
                    return Err(DomainError::invalid_argument(
                        "payload",
                        format!("unknown action {:?}", message.payload),
                    )
                    .into());
                }
                message.id = MessageId::UNASSIGNED;
                message.seen = false;
                self.publish(&message).await
            }
            MessageEvent::Text => {
                message.id = self.deps.room_service.next_message_id()?;
                message.seen = false;
                self.deps.message_repository.save(&message).await?;
                self.publish(&message).await
            }
            MessageEvent::Seen => {
                let acknowledged = message.acknowledged_id()?;
                self.deps
                    .message_repository
                    .mark_seen(room_id, acknowledged)
                    .await
                    .map_err(seen_target_error)?;
                let seen = Message::seen_ack(room_id, session.user_name(), acknowledged, now);
                self.publish(&seen).await
            }
            MessageEvent::File => {
                tracing::debug!(room_id = %room_id, "ignoring file frame");
                Ok(())
            }
        }
    }

    async fn publish(&self, message: &Message) -> Result<(), ApplicationError> {
        let envelope = Envelope::keyed(message.room_id.to_string(), message.encode()?);
        self.deps.bus.publish(&self.ingress_topic, envelope).await?;
        tracing::debug!(room_id = %message.room_id, event = %message.event, "message published");
        Ok(())
    }
}

fn seen_target_error(err: RepositoryError) -> ApplicationError {
    match err {
        RepositoryError::NotFound => DomainError::MessageNotFound.into(),
        other => other.into(),
    }
}

/// 消费本实例路由 topic，把消息投递给加入了对应房间的本地会话
pub struct RouteDeliveryHandler {
    connections: Arc<ConnectionManager>,
}

impl RouteDeliveryHandler {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl EnvelopeHandler for RouteDeliveryHandler {
    async fn handle(&self, envelope: Envelope) {
        let message = match Message::decode(&envelope.payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(envelope_id = %envelope.id, error = %err, "skipping undecodable route message");
                return;
            }
        };
        let text = match String::from_utf8(envelope.payload) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "route message is not valid utf-8");
                return;
            }
        };
        let stats = self.connections.deliver_to_room(message.room_id, &text);
        tracing::debug!(
            room_id = %message.room_id,
            delivered = stats.delivered,
            evicted = stats.evicted,
            "route message delivered"
        );
    }
}
