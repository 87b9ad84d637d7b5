use async_trait::async_trait;
use domain::{Message, MessageId, RepositoryError, Room, RoomId};

#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn create(&self, room: Room) -> Result<Room, RepositoryError>;
    async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    // 文本消息在发布前持久化
    async fn save(&self, message: &Message) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    // 消息不存在时返回 NotFound
    async fn mark_seen(&self, room_id: RoomId, id: MessageId) -> Result<(), RepositoryError>;
}

pub mod memory {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::RwLock;

    use super::*;

    #[derive(Default)]
    pub struct MemoryRoomRepository {
        rooms: RwLock<HashMap<RoomId, Room>>,
    }

    impl MemoryRoomRepository {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl RoomRepository for MemoryRoomRepository {
        async fn create(&self, room: Room) -> Result<Room, RepositoryError> {
            let mut rooms = self.rooms.write().await;
            if rooms.contains_key(&room.id()) {
                return Err(RepositoryError::Conflict);
            }
            rooms.insert(room.id(), room.clone());
            Ok(room)
        }

        async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError> {
            Ok(self.rooms.read().await.get(&id).cloned())
        }
    }

    /// 可注入写入失败的内存消息仓库
    #[derive(Default)]
    pub struct MemoryMessageRepository {
        messages: RwLock<HashMap<MessageId, Message>>,
        failing: AtomicBool,
    }

    impl MemoryMessageRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub async fn len(&self) -> usize {
            self.messages.read().await.len()
        }

        fn check(&self) -> Result<(), RepositoryError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(RepositoryError::storage("injected failure"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl MessageRepository for MemoryMessageRepository {
        async fn save(&self, message: &Message) -> Result<(), RepositoryError> {
            self.check()?;
            let mut messages = self.messages.write().await;
            if messages.contains_key(&message.id) {
                return Err(RepositoryError::Conflict);
            }
            messages.insert(message.id, message.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
            Ok(self.messages.read().await.get(&id).cloned())
        }

        async fn mark_seen(&self, room_id: RoomId, id: MessageId) -> Result<(), RepositoryError> {
            self.check()?;
            match self.messages.write().await.get_mut(&id) {
                Some(message) if message.room_id == room_id => {
                    message.seen = true;
                    Ok(())
                }
                _ => Err(RepositoryError::NotFound),
            }
        }
    }
}
