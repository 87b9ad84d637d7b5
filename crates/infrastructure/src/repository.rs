//! PostgreSQL 仓储实现
//!
//! 房间与消息的 ID 由雪花生成器分配，均为 63 位以内的正数，落库为 `BIGINT`。

use std::sync::Arc;

use application::{MessageRepository, RoomRepository};
use async_trait::async_trait;
use domain::{Message, MessageEvent, MessageId, PasswordHash, RepositoryError, Room, RoomId};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => RepositoryError::Conflict,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn to_db_id(id: u64) -> Result<i64, RepositoryError> {
    i64::try_from(id).map_err(|_| invalid_data(format!("id {id} does not fit in BIGINT")))
}

fn from_db_id(id: i64) -> Result<u64, RepositoryError> {
    u64::try_from(id).map_err(|_| invalid_data(format!("negative id {id} in storage")))
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: i64,
    name: String,
    protected: bool,
    password_hash: Option<String>,
}

impl TryFrom<RoomRecord> for Room {
    type Error = RepositoryError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        let password = value
            .password_hash
            .map(PasswordHash::new)
            .transpose()
            .map_err(|err| invalid_data(err.to_string()))?;

        Room::restore(
            RoomId(from_db_id(value.id)?),
            value.name,
            value.protected,
            password,
        )
        .map_err(|err| invalid_data(err.to_string()))
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    room_id: i64,
    username: String,
    event: i16,
    payload: String,
    seen: bool,
    sent_at_ms: i64,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let event = u8::try_from(value.event)
            .map_err(|_| invalid_data(format!("event code {} out of range", value.event)))
            .and_then(|code| {
                MessageEvent::try_from(code).map_err(|err| invalid_data(err.to_string()))
            })?;

        Ok(Message {
            id: MessageId(from_db_id(value.id)?),
            event,
            room_id: RoomId(from_db_id(value.room_id)?),
            user_name: value.username,
            payload: value.payload,
            seen: value.seen,
            time_millis: value.sent_at_ms,
        })
    }
}

#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn create(&self, room: Room) -> Result<Room, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"INSERT INTO rooms (id, name, protected, password_hash)
               VALUES ($1, $2, $3, $4)
               RETURNING id, name, protected, password_hash"#,
        )
        .bind(to_db_id(room.id().value())?)
        .bind(room.name())
        .bind(room.is_protected())
        .bind(room.password_hash().map(PasswordHash::as_str))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Room::try_from(record)
    }

    async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"SELECT id, name, protected, password_hash FROM rooms WHERE id = $1"#,
        )
        .bind(to_db_id(id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Room::try_from).transpose()
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn save(&self, message: &Message) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO messages (id, room_id, username, event, payload, seen, sent_at_ms)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(to_db_id(message.id.value())?)
        .bind(to_db_id(message.room_id.value())?)
        .bind(&message.user_name)
        .bind(i16::from(u8::from(message.event)))
        .bind(&message.payload)
        .bind(message.seen)
        .bind(message.time_millis)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"SELECT id, room_id, username, event, payload, seen, sent_at_ms
               FROM messages WHERE id = $1"#,
        )
        .bind(to_db_id(id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn mark_seen(&self, room_id: RoomId, id: MessageId) -> Result<(), RepositoryError> {
        let result = sqlx::query(r#"UPDATE messages SET seen = TRUE WHERE id = $1 AND room_id = $2"#)
            .bind(to_db_id(id.value())?)
            .bind(to_db_id(room_id.value())?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub room_repository: Arc<PgRoomRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            room_repository: Arc::new(PgRoomRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
