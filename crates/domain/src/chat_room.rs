use crate::errors::DomainError;
use crate::value_objects::{PasswordHash, RoomId};

/// 聊天室。创建后不可变。
///
/// 不变式：受保护房间一定带有密码哈希，公开房间一定没有。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    id: RoomId,
    name: String,
    password: Option<PasswordHash>,
}

impl Room {
    pub fn new_public(id: RoomId, name: impl Into<String>) -> Result<Self, DomainError> {
        let name = Self::validate_name(name.into())?;
        Ok(Self {
            id,
            name,
            password: None,
        })
    }

    pub fn new_protected(
        id: RoomId,
        name: impl Into<String>,
        password: PasswordHash,
    ) -> Result<Self, DomainError> {
        let name = Self::validate_name(name.into())?;
        Ok(Self {
            id,
            name,
            password: Some(password),
        })
    }

    /// 从存储记录还原，校验 protected 标志与哈希是否一致。
    pub fn restore(
        id: RoomId,
        name: String,
        protected: bool,
        password: Option<PasswordHash>,
    ) -> Result<Self, DomainError> {
        match (protected, password) {
            (true, Some(hash)) => Ok(Self {
                id,
                name,
                password: Some(hash),
            }),
            (false, None) => Ok(Self {
                id,
                name,
                password: None,
            }),
            (true, None) => Err(DomainError::RoomInvariant(format!(
                "protected room {id} has no password hash"
            ))),
            (false, Some(_)) => Err(DomainError::RoomInvariant(format!(
                "public room {id} carries a password hash"
            ))),
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_protected(&self) -> bool {
        self.password.is_some()
    }

    pub fn password_hash(&self) -> Option<&PasswordHash> {
        self.password.as_ref()
    }

    fn validate_name(name: String) -> Result<String, DomainError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("name", "cannot be empty"));
        }
        if trimmed.chars().count() > 60 {
            return Err(DomainError::invalid_argument("name", "too long"));
        }
        Ok(trimmed.to_owned())
    }
}
