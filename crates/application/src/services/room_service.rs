use std::sync::Arc;

use domain::{DomainError, MessageId, Room, RoomId};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApplicationError, id_generator::IdGenerator, password::PasswordHasher,
    repository::RoomRepository,
};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub password: Option<String>,
}

/// 对外暴露的房间信息，不含密码哈希
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomDto {
    pub room_id: RoomId,
    pub name: String,
    pub protected: bool,
}

impl From<&Room> for RoomDto {
    fn from(room: &Room) -> Self {
        Self {
            room_id: room.id(),
            name: room.name().to_owned(),
            protected: room.is_protected(),
        }
    }
}

pub struct RoomServiceDependencies {
    pub room_repository: Arc<dyn RoomRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub id_generator: Arc<dyn IdGenerator>,
}

pub struct RoomService {
    deps: RoomServiceDependencies,
}

impl RoomService {
    pub fn new(deps: RoomServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn create_room(&self, request: CreateRoomRequest) -> Result<RoomDto, ApplicationError> {
        let password = request.password.filter(|password| !password.is_empty());
        if request.protected && password.is_none() {
            return Err(
                DomainError::invalid_argument("password", "protected room requires a password")
                    .into(),
            );
        }

        let room_id = RoomId::new(self.deps.id_generator.next_id()?);
        let room = match password {
            Some(password) if request.protected => {
                let hashed = self.deps.password_hasher.hash(&password).await?;
                Room::new_protected(room_id, request.name, hashed)?
            }
            _ => Room::new_public(room_id, request.name)?,
        };

        let room = self.deps.room_repository.create(room).await?;
        tracing::info!(room_id = %room.id(), protected = room.is_protected(), "房间已创建");
        Ok(RoomDto::from(&room))
    }

    pub async fn find_room(&self, room_id: RoomId) -> Result<Room, ApplicationError> {
        self.deps
            .room_repository
            .find_by_id(room_id)
            .await?
            .ok_or_else(|| DomainError::RoomNotFound.into())
    }

    pub async fn room_exists(&self, room_id: RoomId) -> Result<bool, ApplicationError> {
        Ok(self
            .deps
            .room_repository
            .find_by_id(room_id)
            .await?
            .is_some())
    }

    pub async fn is_protected(&self, room_id: RoomId) -> Result<bool, ApplicationError> {
        Ok(self.find_room(room_id).await?.is_protected())
    }

    /// 只返回校验结果，哈希不离开本层
    pub async fn is_valid_password(
        &self,
        room_id: RoomId,
        password: &str,
    ) -> Result<bool, ApplicationError> {
        let room = self.find_room(room_id).await?;
        match room.password_hash() {
            Some(hash) => Ok(self.deps.password_hasher.verify(password, hash).await?),
            None => Ok(false),
        }
    }

    /// 密码不匹配（或房间未受保护）时返回 [`ApplicationError::Authentication`]
    pub async fn verify_password(&self, room_id: RoomId, password: &str) -> Result<(), ApplicationError> {
        if self.is_valid_password(room_id, password).await? {
            Ok(())
        } else {
            Err(ApplicationError::Authentication)
        }
    }

    pub fn next_message_id(&self) -> Result<MessageId, ApplicationError> {
        Ok(MessageId::new(self.deps.id_generator.next_id()?))
    }
}
