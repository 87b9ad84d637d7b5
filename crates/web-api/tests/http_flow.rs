mod support;

use reqwest::{Client, StatusCode};
use serde_json::json;

use support::{create_room, spawn_chatroom, Options};

#[tokio::test]
async fn health_and_room_creation() {
    let server = spawn_chatroom(Options::default()).await;
    let client = Client::new();

    let health = client.get(server.http("/health")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let room = create_room(&server, json!({ "name": "lobby" })).await;
    assert_eq!(room["name"], "lobby");
    assert_eq!(room["protected"], false);
    assert!(room["room_id"].as_u64().unwrap() > 0);
    assert!(room.get("password").is_none());
}

#[tokio::test]
async fn invalid_room_requests_are_rejected() {
    let server = spawn_chatroom(Options::default()).await;
    let client = Client::new();

    let response = client
        .post(server.http("/api/rooms"))
        .json(&json!({ "name": "vault", "protected": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_ARGUMENT");

    let response = client
        .post(server.http("/api/rooms"))
        .json(&json!({ "name": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn room_creation_is_rate_limited_per_client() {
    let server = spawn_chatroom(Options::default()).await;
    let client = Client::new();

    for i in 0..3 {
        create_room(&server, json!({ "name": format!("room-{i}") })).await;
    }

    let response = client
        .post(server.http("/api/rooms"))
        .json(&json!({ "name": "one-too-many" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0);

    // 不同客户端地址使用独立的桶
    let response = client
        .post(server.http("/api/rooms"))
        .header("x-forwarded-for", "198.51.100.4")
        .json(&json!({ "name": "elsewhere" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn join_endpoint_validates_before_upgrading() {
    let server = spawn_chatroom(Options::default()).await;
    let client = Client::new();
    let room = create_room(&server, json!({ "name": "lobby" })).await;
    let room_id = room["room_id"].as_u64().unwrap();

    let bad_id = client
        .get(server.http("/api/rooms/not-a-number?userName=alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);

    let missing_user = client
        .get(server.http(&format!("/api/rooms/{room_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_user.status(), StatusCode::BAD_REQUEST);

    let unknown_room = client
        .get(server.http("/api/rooms/12345?userName=alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_room.status(), StatusCode::NOT_FOUND);

    let not_websocket = client
        .get(server.http(&format!("/api/rooms/{room_id}?userName=alice")))
        .send()
        .await
        .unwrap();
    assert_eq!(not_websocket.status(), StatusCode::BAD_REQUEST);
}
