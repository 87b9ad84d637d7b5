#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::assembly::{
    FanoutAssembly, FanoutSettings, FrontendAssembly, FrontendDependencies, FrontendSettings,
};
use application::memory::{
    MemoryMessageBus, MemoryMessageRepository, MemoryPresenceStore, MemoryRateLimitStore,
    MemoryRoomRepository, PlainPasswordHasher,
};
use application::{
    ConnectionManager, ConsumerHandle, LocalPresenceClient, PresenceDirectory, SnowflakeGenerator,
    SystemClock, TokenBucket,
};
use axum::Router;
use domain::RouteId;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use web_api::{presence_router, router, AppState, PresenceState};

const INGRESS: &str = "chat.msg.pub";
pub const ROUTE: &str = "chat.room.test";

pub struct Options {
    pub max_connections: usize,
    pub session_queue_capacity: usize,
    pub bucket_capacity: f64,
    pub tokens_per_request: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_connections: 100,
            session_queue_capacity: 64,
            bucket_capacity: 30.0,
            tokens_per_request: 10.0,
        }
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub directory: Arc<PresenceDirectory>,
    pub bus: Arc<MemoryMessageBus>,
    connections: Option<Arc<ConnectionManager>>,
    shutdown: Option<oneshot::Sender<()>>,
    server_task: Option<JoinHandle<()>>,
    consumers: Vec<ConsumerHandle>,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// 与 `chatroom` 进程相同的停机顺序：停止 HTTP、关闭会话，等待会话在宽限期内注销
    pub async fn shutdown_gracefully(&mut self, grace_period: Duration) -> bool {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.server_task.take() {
            let _ = task.await;
        }
        match &self.connections {
            Some(connections) => connections.drain(grace_period).await,
            None => true,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn serve(
    app: Router,
    connections: Option<Arc<ConnectionManager>>,
) -> (SocketAddr, oneshot::Sender<()>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
            if let Some(connections) = connections {
                connections.shutdown();
            }
        })
        .await
        .ok();
    });

    (addr, shutdown_tx, task)
}

/// 单个前端实例 + 进程内扇出层，全部使用内存实现
pub async fn spawn_chatroom(options: Options) -> TestServer {
    let bus = Arc::new(MemoryMessageBus::new());
    let clock = Arc::new(SystemClock);

    let fanout = FanoutAssembly::assemble(
        Arc::new(MemoryPresenceStore::new()),
        bus.clone(),
        FanoutSettings {
            ingress_topic: INGRESS.into(),
            consumer_group: "chat-fanout".into(),
        },
    );
    let fanout_consumer = fanout
        .start_consumer(CancellationToken::new())
        .await
        .expect("fanout consumer");

    let assembly = FrontendAssembly::assemble(
        FrontendDependencies {
            room_repository: Arc::new(MemoryRoomRepository::new()),
            message_repository: Arc::new(MemoryMessageRepository::new()),
            password_hasher: Arc::new(PlainPasswordHasher),
            id_generator: Arc::new(
                SnowflakeGenerator::new(1, Duration::from_millis(10), clock.clone())
                    .expect("id generator"),
            ),
            presence: Arc::new(LocalPresenceClient::new(fanout.directory.clone())),
            bus: bus.clone(),
            rate_limit_store: Arc::new(MemoryRateLimitStore::new()),
            clock: clock.clone(),
        },
        FrontendSettings {
            route_id: RouteId::parse(ROUTE).expect("route"),
            ingress_topic: INGRESS.into(),
            rpc_deadline: Duration::from_secs(1),
            session_queue_capacity: options.session_queue_capacity,
            max_connections: options.max_connections,
            create_room_bucket: TokenBucket::new(
                1.0 / 86_400.0,
                options.bucket_capacity,
                Duration::from_secs(86_400),
            )
            .expect("bucket"),
            create_room_tokens: options.tokens_per_request,
        },
    );
    let route_consumer = assembly
        .start_route_consumer(CancellationToken::new())
        .await
        .expect("route consumer");

    let connections = assembly.connections.clone();
    let (addr, shutdown, task) = serve(
        router(AppState::from_assembly(&assembly)),
        Some(connections.clone()),
    )
    .await;

    TestServer {
        addr,
        directory: fanout.directory.clone(),
        bus,
        connections: Some(connections),
        shutdown: Some(shutdown),
        server_task: Some(task),
        consumers: vec![fanout_consumer, route_consumer],
    }
}

/// 单独运行在线目录接口
pub async fn spawn_presence() -> TestServer {
    let directory = Arc::new(PresenceDirectory::new(Arc::new(MemoryPresenceStore::new())));
    let (addr, shutdown, task) =
        serve(presence_router(PresenceState::new(directory.clone())), None).await;
    TestServer {
        addr,
        directory,
        bus: Arc::new(MemoryMessageBus::new()),
        connections: None,
        shutdown: Some(shutdown),
        server_task: Some(task),
        consumers: Vec::new(),
    }
}

pub async fn create_room(server: &TestServer, body: serde_json::Value) -> serde_json::Value {
    let response = reqwest::Client::new()
        .post(server.http("/api/rooms"))
        .json(&body)
        .send()
        .await
        .expect("create room");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    response.json().await.expect("room json")
}

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect(server: &TestServer, room_id: u64, user: &str) -> WsClient {
    let url = server.ws(&format!("/api/rooms/{room_id}?userName={user}"));
    let (socket, _) = connect_async(url).await.expect("websocket connect");
    socket
}

/// 下一条帧（忽略 ping/pong），超时返回 `None`
pub async fn next_frame(socket: &mut WsClient) -> Option<WsMessage> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .ok()??
            .ok()?;
        match frame {
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => return Some(other),
        }
    }
}

pub async fn next_text(socket: &mut WsClient) -> String {
    match next_frame(socket).await {
        Some(WsMessage::Text(text)) => text.to_string(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

pub async fn next_json(socket: &mut WsClient) -> serde_json::Value {
    serde_json::from_str(&next_text(socket).await).expect("json frame")
}

pub async fn send_json(socket: &mut WsClient, value: serde_json::Value) {
    socket
        .send(WsMessage::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

pub async fn assert_silent(socket: &mut WsClient) {
    let got = tokio::time::timeout(Duration::from_millis(150), socket.next()).await;
    assert!(got.is_err(), "unexpected frame: {got:?}");
}
