//! 需要真实 PostgreSQL：设置 `PG_INTEGRATION_TEST=postgres://...` 后运行。

use application::{MessageRepository, PasswordHasher, RoomRepository};
use domain::{Message, MessageEvent, MessageId, RepositoryError, Room, RoomId};
use infrastructure::{create_pg_pool, BcryptPasswordHasher, PgStorage, MIGRATOR};

fn database_url() -> Option<String> {
    match std::env::var("PG_INTEGRATION_TEST") {
        Ok(url) if url.starts_with("postgres") => Some(url),
        _ => {
            println!("跳过 PostgreSQL 集成测试（未设置 PG_INTEGRATION_TEST）");
            None
        }
    }
}

fn unique_id() -> u64 {
    (uuid::Uuid::new_v4().as_u128() as u64) >> 2
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rooms_and_messages_round_trip() {
    let Some(url) = database_url() else { return };
    let pool = create_pg_pool(&url, 5).await.expect("pool");
    MIGRATOR.run(&pool).await.expect("migrations");
    let storage = PgStorage::new(pool);

    let hasher = BcryptPasswordHasher::new(4);
    let hash = hasher.hash("secret").await.expect("hash");
    let room = Room::new_protected(RoomId(unique_id()), "vault", hash).expect("room");
    let stored = storage.room_repository.create(room.clone()).await.expect("create room");
    assert_eq!(stored, room);

    let duplicate = storage.room_repository.create(room.clone()).await;
    assert!(matches!(duplicate, Err(RepositoryError::Conflict)));

    let fetched = storage
        .room_repository
        .find_by_id(room.id())
        .await
        .expect("find room")
        .expect("room exists");
    assert!(fetched.is_protected());
    let stored_hash = fetched.password_hash().expect("hash present");
    assert!(hasher.verify("secret", stored_hash).await.expect("verify"));

    let message = Message {
        id: MessageId(unique_id()),
        event: MessageEvent::Text,
        room_id: room.id(),
        user_name: "alice".into(),
        payload: "hello".into(),
        seen: false,
        time_millis: 1_700_000_000_000,
    };
    storage.message_repository.save(&message).await.expect("save");
    storage
        .message_repository
        .mark_seen(room.id(), message.id)
        .await
        .expect("mark seen");
    let seen = storage
        .message_repository
        .find_by_id(message.id)
        .await
        .expect("find message")
        .expect("message exists");
    assert!(seen.seen);
    assert_eq!(seen.payload, "hello");

    let missing = storage
        .message_repository
        .mark_seen(room.id(), MessageId(unique_id()))
        .await;
    assert!(matches!(missing, Err(RepositoryError::NotFound)));
    assert!(storage
        .room_repository
        .find_by_id(RoomId(unique_id()))
        .await
        .expect("lookup")
        .is_none());
}
