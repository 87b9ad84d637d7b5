use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{MessageId, RoomId, UserName};

/// 消息事件类型，线上格式为整数 0..=3。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageEvent {
    Text,
    Action,
    Seen,
    File,
}

impl TryFrom<u8> for MessageEvent {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Text),
            1 => Ok(Self::Action),
            2 => Ok(Self::Seen),
            3 => Ok(Self::File),
            other => Err(DomainError::invalid_argument(
                "event",
                format!("unknown event code {other}"),
            )),
        }
    }
}

impl From<MessageEvent> for u8 {
    fn from(value: MessageEvent) -> Self {
        match value {
            MessageEvent::Text => 0,
            MessageEvent::Action => 1,
            MessageEvent::Seen => 2,
            MessageEvent::File => 3,
        }
    }
}

impl fmt::Display for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Action => "action",
            Self::Seen => "seen",
            Self::File => "file",
        };
        f.write_str(name)
    }
}

/// `Action` 事件的负载取值。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Joined,
    Left,
    IsTyping,
    EndTyping,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Joined => "joined",
            Action::Left => "left",
            Action::IsTyping => "istyping",
            Action::EndTyping => "endtyping",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "joined" => Some(Action::Joined),
            "left" => Some(Action::Left),
            "istyping" => Some(Action::IsTyping),
            "endtyping" => Some(Action::EndTyping),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 房间消息。`room_id` 是总线上的分区键，同一房间的消息按提交顺序处理。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "message_id", default)]
    pub id: MessageId,
    pub event: MessageEvent,
    #[serde(default)]
    pub room_id: RoomId,
    #[serde(rename = "username", default)]
    pub user_name: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub seen: bool,
    #[serde(rename = "time", default)]
    pub time_millis: i64,
}

impl Message {
    pub fn action(
        id: MessageId,
        room_id: RoomId,
        user_name: &UserName,
        action: Action,
        time_millis: i64,
    ) -> Self {
        Self {
            id,
            event: MessageEvent::Action,
            room_id,
            user_name: user_name.as_str().to_owned(),
            payload: action.as_str().to_owned(),
            seen: false,
            time_millis,
        }
    }

    pub fn seen_ack(
        room_id: RoomId,
        user_name: &UserName,
        acknowledged: MessageId,
        time_millis: i64,
    ) -> Self {
        Self {
            id: acknowledged,
            event: MessageEvent::Seen,
            room_id,
            user_name: user_name.as_str().to_owned(),
            payload: acknowledged.to_string(),
            seen: true,
            time_millis,
        }
    }

    /// `Seen` 事件确认的目标消息：优先取 `message_id`，否则解析 `payload`。
    pub fn acknowledged_id(&self) -> Result<MessageId, DomainError> {
        if self.id.is_assigned() {
            return Ok(self.id);
        }
        self.payload
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .map(MessageId)
            .ok_or_else(|| DomainError::invalid_argument("payload", "seen event needs a message id"))
    }

    pub fn encode(&self) -> Result<Vec<u8>, DomainError> {
        serde_json::to_vec(self).map_err(|err| DomainError::malformed_frame(err.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DomainError> {
        serde_json::from_slice(bytes).map_err(|err| DomainError::malformed_frame(err.to_string()))
    }
}
