//! 受保护房间首帧（密码帧）解析
//!
//! 支持三种格式：
//! - JSON：`{"password": "...", "room_id": 7}`（`room_id` 可选）
//! - 前缀格式：`<room_id>-password=<password>`
//! - 纯文本：整帧即为密码

use serde::Deserialize;

use crate::value_objects::RoomId;

/// 已解析的密码帧
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordFrame {
    pub room_id: Option<RoomId>,
    pub password: String,
}

#[derive(Deserialize)]
struct JsonPasswordFrame {
    password: String,
    #[serde(default)]
    room_id: Option<RoomId>,
}

const PREFIX_MARKER: &str = "-password=";

impl PasswordFrame {
    /// 解析首帧文本；空密码返回 `None`，调用方应重新发送提示。
    ///
    /// 去除空白只用于判断帧格式，密码本身按原样保留。
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.starts_with('{') {
            // 看起来像 JSON 但解析失败时不退化为纯文本密码
            let frame: JsonPasswordFrame = serde_json::from_str(trimmed).ok()?;
            return Self::non_empty(frame.room_id, frame.password);
        }

        if let Some((prefix, password)) = raw.split_once(PREFIX_MARKER) {
            if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) {
                let room_id = prefix.parse::<u64>().ok().map(RoomId);
                return Self::non_empty(room_id, password.to_owned());
            }
        }

        Self::non_empty(None, raw.to_owned())
    }

    /// 帧内携带的房间号与会话房间不一致时视为无效帧。
    pub fn targets(&self, room_id: RoomId) -> bool {
        match self.room_id {
            Some(id) => id == room_id,
            None => true,
        }
    }

    fn non_empty(room_id: Option<RoomId>, password: String) -> Option<Self> {
        if password.is_empty() {
            None
        } else {
            Some(Self { room_id, password })
        }
    }
}

impl std::fmt::Debug for PasswordFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordFrame")
            .field("room_id", &self.room_id)
            .field("password", &"***")
            .finish()
    }
}
