//! 房间前端 + 扇出层的端到端流程（全部使用内存实现）

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use application::assembly::{FanoutAssembly, FanoutSettings, FrontendAssembly, FrontendDependencies, FrontendSettings};
use application::frontend::{INVALID_PASSWORD, PASSWORD_CHALLENGE};
use application::id_generator::EPOCH_MILLIS;
use application::memory::{
    MemoryMessageBus, MemoryMessageRepository, MemoryPresenceStore, MemoryRateLimitStore,
    MemoryRoomRepository, PlainPasswordHasher,
};
use application::{
    ApplicationError, CloseReason, ConsumerHandle, CreateRoomRequest, LocalPresenceClient,
    ManualClock, MessageRepository, Outbound, PresenceClient, PresenceDirectory,
    SessionFlow, SessionRegistration, SessionState, SnowflakeGenerator, TokenBucket,
};
use async_trait::async_trait;
use domain::{Message, MessageEvent, MessageId, RoomId, RouteId, UserName};
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;

const INGRESS: &str = "chat.msg.pub";

struct Cluster {
    bus: Arc<MemoryMessageBus>,
    directory: Arc<PresenceDirectory>,
    consumers: Vec<ConsumerHandle>,
    clock: Arc<ManualClock>,
}

struct Instance {
    assembly: FrontendAssembly,
    messages: Arc<MemoryMessageRepository>,
}

struct Client {
    registration: SessionRegistration,
    outbound: Receiver<Outbound>,
}

impl Client {
    async fn next(&mut self) -> Option<Outbound> {
        tokio::time::timeout(Duration::from_millis(500), self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    async fn next_message(&mut self) -> Message {
        match self.next().await {
            Some(Outbound::Text(text)) => Message::decode(text.as_bytes()).expect("room message"),
            other => panic!("expected room message, got {other:?}"),
        }
    }

    async fn assert_silent(&mut self) {
        let got = tokio::time::timeout(Duration::from_millis(100), self.outbound.recv()).await;
        assert!(got.is_err(), "unexpected outbound: {got:?}");
    }
}

async fn cluster() -> Cluster {
    let bus = Arc::new(MemoryMessageBus::new());
    let fanout = FanoutAssembly::assemble(
        Arc::new(MemoryPresenceStore::new()),
        bus.clone(),
        FanoutSettings {
            ingress_topic: INGRESS.into(),
            consumer_group: "chat-fanout".into(),
        },
    );
    let consumer = fanout.start_consumer(CancellationToken::new()).await.unwrap();
    Cluster {
        bus,
        directory: fanout.directory.clone(),
        consumers: vec![consumer],
        clock: Arc::new(ManualClock::new(EPOCH_MILLIS + 1_000)),
    }
}

impl Cluster {
    async fn instance(
        &mut self,
        route: &str,
        machine_id: u16,
        rooms: Arc<MemoryRoomRepository>,
        presence: Arc<dyn PresenceClient>,
    ) -> Instance {
        let messages = Arc::new(MemoryMessageRepository::new());
        let assembly = FrontendAssembly::assemble(
            FrontendDependencies {
                room_repository: rooms,
                message_repository: messages.clone(),
                password_hasher: Arc::new(PlainPasswordHasher),
                id_generator: Arc::new(
                    SnowflakeGenerator::new(machine_id, Duration::from_millis(10), self.clock.clone())
                        .unwrap(),
                ),
                presence,
                bus: self.bus.clone(),
                rate_limit_store: Arc::new(MemoryRateLimitStore::new()),
                clock: self.clock.clone(),
            },
            FrontendSettings {
                route_id: RouteId::parse(route).unwrap(),
                ingress_topic: INGRESS.into(),
                rpc_deadline: Duration::from_secs(1),
                session_queue_capacity: 64,
                max_connections: 100,
                create_room_bucket: TokenBucket::new(1.0, 30.0, Duration::from_secs(60)).unwrap(),
                create_room_tokens: 10.0,
            },
        );
        let consumer = assembly
            .start_route_consumer(CancellationToken::new())
            .await
            .unwrap();
        self.consumers.push(consumer);
        Instance { assembly, messages }
    }

    fn local_presence(&self) -> Arc<dyn PresenceClient> {
        Arc::new(LocalPresenceClient::new(self.directory.clone()))
    }
}

impl Instance {
    async fn connect(&self, user: &str, room: RoomId) -> (Client, SessionFlow) {
        let mut registration = self
            .assembly
            .connections
            .register(UserName::parse(user).unwrap(), room)
            .unwrap();
        let outbound = registration.take_outbound().unwrap();
        let flow = self.assembly.frontend.on_connect(registration.session()).await;
        (
            Client {
                registration,
                outbound,
            },
            flow,
        )
    }

    async fn send(&self, client: &Client, frame: &str) -> SessionFlow {
        self.assembly
            .frontend
            .on_frame(client.registration.session(), frame)
            .await
    }

    async fn close(&self, client: &Client) {
        self.assembly
            .frontend
            .on_close(client.registration.session())
            .await;
    }

    async fn create_room(&self, name: &str, password: Option<&str>) -> RoomId {
        self.assembly
            .room_service
            .create_room(CreateRoomRequest {
                name: name.into(),
                protected: password.is_some(),
                password: password.map(str::to_owned),
            })
            .await
            .unwrap()
            .room_id
    }
}

#[tokio::test]
async fn room_message_reaches_only_instances_with_subscribers() {
    let mut cluster = cluster().await;
    let rooms = Arc::new(MemoryRoomRepository::new());
    let a = cluster.instance("route-a", 1, rooms.clone(), cluster.local_presence()).await;
    let b = cluster.instance("route-b", 2, rooms.clone(), cluster.local_presence()).await;

    let room7 = a.create_room("seven", None).await;
    let room8 = a.create_room("eight", None).await;

    let (mut alice, flow) = a.connect("alice", room7).await;
    assert_eq!(flow, SessionFlow::Continue);
    let joined = alice.next_message().await;
    assert_eq!(joined.event, MessageEvent::Action);
    assert_eq!(joined.payload, "joined");

    let (mut bob, _) = b.connect("bob", room8).await;
    bob.next_message().await;

    a.send(&alice, r#"{"event":0,"room_id":999,"username":"mallory","payload":"hi"}"#)
        .await;
    let text = alice.next_message().await;
    assert_eq!(text.event, MessageEvent::Text);
    assert_eq!(text.room_id, room7);
    assert_eq!(text.user_name, "alice");
    assert!(text.id.is_assigned());

    bob.assert_silent().await;
    let route_b_log = cluster.bus.published("route-b").await;
    assert!(route_b_log
        .iter()
        .all(|env| Message::decode(&env.payload).unwrap().room_id == room8));
}

#[tokio::test]
async fn protected_room_requires_the_right_password() {
    let mut cluster = cluster().await;
    let rooms = Arc::new(MemoryRoomRepository::new());
    let a = cluster.instance("route-a", 1, rooms, cluster.local_presence()).await;
    let vault = a.create_room("vault", Some("secret")).await;

    let (mut intruder, flow) = a.connect("eve", vault).await;
    assert_eq!(flow, SessionFlow::Continue);
    assert_eq!(intruder.next().await, Some(Outbound::Text(PASSWORD_CHALLENGE.into())));

    assert_eq!(a.send(&intruder, "").await, SessionFlow::Continue);
    assert_eq!(intruder.next().await, Some(Outbound::Text(PASSWORD_CHALLENGE.into())));

    let flow = a.send(&intruder, "wrong").await;
    assert_eq!(flow, SessionFlow::Close(CloseReason::INVALID_PASSWORD));
    assert_eq!(intruder.next().await, Some(Outbound::Text(INVALID_PASSWORD.into())));
    assert_eq!(intruder.registration.session().state(), SessionState::Unauthenticated);
    a.close(&intruder).await;

    let (mut member, _) = a.connect("alice", vault).await;
    member.next().await;
    let flow = a.send(&member, &format!("{vault}-password=secret")).await;
    assert_eq!(flow, SessionFlow::Continue);
    assert_eq!(member.registration.session().attached_room(), Some(vault));
    assert_eq!(member.next_message().await.payload, "joined");
}

#[tokio::test]
async fn password_with_surrounding_spaces_is_matched_exactly() {
    let mut cluster = cluster().await;
    let rooms = Arc::new(MemoryRoomRepository::new());
    let a = cluster.instance("route-a", 1, rooms, cluster.local_presence()).await;
    let vault = a.create_room("vault", Some(" secret ")).await;

    let (mut raw, _) = a.connect("alice", vault).await;
    raw.next().await;
    assert_eq!(a.send(&raw, " secret ").await, SessionFlow::Continue);
    assert_eq!(raw.registration.session().attached_room(), Some(vault));

    let (mut prefixed, _) = a.connect("bob", vault).await;
    prefixed.next().await;
    let flow = a.send(&prefixed, &format!("{vault}-password= secret ")).await;
    assert_eq!(flow, SessionFlow::Continue);
    assert_eq!(prefixed.registration.session().attached_room(), Some(vault));

    let (trimmed, _) = a.connect("eve", vault).await;
    let flow = a.send(&trimmed, "secret").await;
    assert_eq!(flow, SessionFlow::Close(CloseReason::INVALID_PASSWORD));
}

#[tokio::test]
async fn unauthenticated_sessions_receive_nothing() {
    let mut cluster = cluster().await;
    let rooms = Arc::new(MemoryRoomRepository::new());
    let a = cluster.instance("route-a", 1, rooms, cluster.local_presence()).await;
    let vault = a.create_room("vault", Some("secret")).await;

    let (mut waiting, _) = a.connect("eve", vault).await;
    waiting.next().await;
    let (mut member, _) = a.connect("alice", vault).await;
    member.next().await;
    a.send(&member, r#"{"password":"secret"}"#).await;
    member.next_message().await;

    a.send(&member, r#"{"event":0,"payload":"psst"}"#).await;
    assert_eq!(member.next_message().await.payload, "psst");
    waiting.assert_silent().await;
}

struct FailingPresence {
    removals: AtomicUsize,
}

#[async_trait]
impl PresenceClient for FailingPresence {
    async fn add_room_subscriber(
        &self,
        _room_id: RoomId,
        _user_name: &UserName,
        _route_id: &RouteId,
    ) -> Result<(), ApplicationError> {
        Err(ApplicationError::infrastructure("presence tier unavailable"))
    }

    async fn remove_room_subscriber(
        &self,
        _room_id: RoomId,
        _user_name: &UserName,
    ) -> Result<(), ApplicationError> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn presence_failure_aborts_the_join() {
    let mut cluster = cluster().await;
    let rooms = Arc::new(MemoryRoomRepository::new());
    let presence = Arc::new(FailingPresence {
        removals: AtomicUsize::new(0),
    });
    let a = cluster.instance("route-a", 1, rooms, presence.clone()).await;
    let lobby = a.create_room("lobby", None).await;

    let (client, flow) = a.connect("alice", lobby).await;
    assert_eq!(flow, SessionFlow::Close(CloseReason::JOIN_FAILED));
    assert_eq!(client.registration.session().state(), SessionState::Unauthenticated);
    assert!(cluster.bus.published(INGRESS).await.is_empty());

    a.close(&client).await;
    assert_eq!(presence.removals.load(Ordering::SeqCst), 0);
    assert!(cluster.bus.published(INGRESS).await.is_empty());
}

#[tokio::test]
async fn leaving_removes_presence_and_broadcasts() {
    let mut cluster = cluster().await;
    let rooms = Arc::new(MemoryRoomRepository::new());
    let a = cluster.instance("route-a", 1, rooms, cluster.local_presence()).await;
    let lobby = a.create_room("lobby", None).await;

    let (mut alice, _) = a.connect("alice", lobby).await;
    alice.next_message().await;
    let (mut bob, _) = a.connect("bob", lobby).await;
    bob.next_message().await;
    assert_eq!(cluster.directory.list_routes(lobby).await.unwrap().len(), 1);

    a.close(&alice).await;
    let left = bob.next_message().await;
    assert_eq!(left.payload, "left");
    assert_eq!(left.user_name, "alice");

    a.close(&bob).await;
    assert!(cluster.directory.list_routes(lobby).await.unwrap().is_empty());
}

#[tokio::test]
async fn text_is_not_published_when_persistence_fails() {
    let mut cluster = cluster().await;
    let rooms = Arc::new(MemoryRoomRepository::new());
    let a = cluster.instance("route-a", 1, rooms, cluster.local_presence()).await;
    let lobby = a.create_room("lobby", None).await;
    let (mut alice, _) = a.connect("alice", lobby).await;
    alice.next_message().await;

    a.messages.set_failing(true);
    let before = cluster.bus.published(INGRESS).await.len();
    assert_eq!(
        a.send(&alice, r#"{"event":0,"payload":"lost"}"#).await,
        SessionFlow::Continue
    );
    assert_eq!(cluster.bus.published(INGRESS).await.len(), before);
    alice.assert_silent().await;
}

#[tokio::test]
async fn seen_marks_the_message_and_broadcasts_its_id() {
    let mut cluster = cluster().await;
    let rooms = Arc::new(MemoryRoomRepository::new());
    let a = cluster.instance("route-a", 1, rooms, cluster.local_presence()).await;
    let lobby = a.create_room("lobby", None).await;
    let (mut alice, _) = a.connect("alice", lobby).await;
    alice.next_message().await;

    a.send(&alice, r#"{"event":0,"payload":"read me"}"#).await;
    let text = alice.next_message().await;

    a.send(&alice, &format!(r#"{{"event":2,"payload":"{}"}}"#, text.id))
        .await;
    let seen = alice.next_message().await;
    assert_eq!(seen.event, MessageEvent::Seen);
    assert_eq!(seen.payload, text.id.to_string());
    assert!(seen.seen);

    let stored = a.messages.find_by_id(text.id).await.unwrap().unwrap();
    assert!(stored.seen);

    a.send(&alice, r#"{"event":2,"payload":"12345"}"#).await;
    a.send(&alice, r#"{"event":3,"payload":"blob"}"#).await;
    a.send(&alice, "{not json").await;
    alice.assert_silent().await;
    assert_eq!(alice.registration.session().attached_room(), Some(lobby));
    assert_eq!(a.messages.find_by_id(MessageId(12345)).await.unwrap(), None);
}

#[tokio::test]
async fn consumers_stop_gracefully() {
    let mut cluster = cluster().await;
    let rooms = Arc::new(MemoryRoomRepository::new());
    let _a = cluster.instance("route-a", 1, rooms, cluster.local_presence()).await;
    for consumer in cluster.consumers.drain(..) {
        assert_eq!(
            consumer.shutdown(Duration::from_secs(1)).await,
            application::ShutdownOutcome::Graceful
        );
    }
}
