//! End-to-end test over the actual wire protocol: a real WebSocket client against a
//! live server instance, driving auth -> create_room -> send_message -> leave/rejoin
//! exactly the path `ConnectionHub`/`router::dispatch` serve in production. The other
//! test files drive the service layer directly; this one is the one place a
//! members-as-userIds or a stale-history-after-send regression would actually surface.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use roomcast::config::Config;

const TEST_PORT: u16 = 18733;

fn test_config() -> (Config, String) {
    let db_path = format!("/tmp/roomcast_ws_it_{}.db", uuid::Uuid::new_v4());
    (
        Config {
            port: TEST_PORT,
            database_path: db_path.clone(),
            redis_url: None,
            db_pool_size: 5,
            log_level: "info".to_string(),
            node_env: "test".to_string(),
        },
        db_path,
    )
}

type TestSocket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn send_frame(ws: &mut TestSocket, value: Value) {
    ws.send(WsMessage::Text(value.to_string())).await.expect("send frame");
}

async fn recv_frame(ws: &mut TestSocket) -> Value {
    loop {
        let msg = ws.next().await.expect("stream ended unexpectedly").expect("ws error");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(&text).expect("server frame is valid json");
        }
    }
}

#[tokio::test]
async fn room_joined_carries_usernames_and_history_sees_messages_after_reconnect() {
    let (config, db_path) = test_config();
    let rocket = roomcast::rocket_with_config(config);
    tokio::spawn(rocket.launch());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let url = format!("ws://127.0.0.1:{TEST_PORT}/ws");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.expect("ws connect");

    let _connected = recv_frame(&mut ws).await; // system: connected

    send_frame(&mut ws, json!({"type": "auth", "username": "alice"})).await;
    let auth = recv_frame(&mut ws).await;
    assert_eq!(auth["type"], "auth_success");

    send_frame(&mut ws, json!({"type": "create_room", "room_name": "lobby-it"})).await;
    let created = recv_frame(&mut ws).await;
    assert_eq!(created["type"], "room_created");

    let joined = recv_frame(&mut ws).await;
    assert_eq!(joined["type"], "room_joined");
    let members: Vec<&str> = joined["members"]
        .as_array()
        .expect("members is an array")
        .iter()
        .map(|v| v.as_str().expect("member is a username string, not a userId"))
        .collect();
    assert_eq!(members, vec!["alice"]);

    let history = recv_frame(&mut ws).await;
    assert_eq!(history["type"], "message_history");
    assert!(history["messages"].as_array().unwrap().is_empty());

    send_frame(&mut ws, json!({"type": "send_message", "content": "first"})).await;
    send_frame(&mut ws, json!({"type": "send_message", "content": "second"})).await;

    // Sender never receives their own `message` frame back, so the next frame is
    // whatever `leave_room` triggers — proving the two sends above landed without
    // needing to read them back over the wire.
    send_frame(&mut ws, json!({"type": "leave_room"})).await;
    let left = recv_frame(&mut ws).await;
    assert_eq!(left["type"], "room_left");

    // Rejoining forces a fresh `message_history` read through the exact cache key
    // `send_message`'s invalidation must have reached.
    send_frame(&mut ws, json!({"type": "join_room", "room_name": "lobby-it"})).await;
    let rejoined = recv_frame(&mut ws).await;
    assert_eq!(rejoined["type"], "room_joined");

    let rejoined_history = recv_frame(&mut ws).await;
    assert_eq!(rejoined_history["type"], "message_history");
    let contents: Vec<&str> = rejoined_history["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["first", "second"]);

    let _ = ws.close(None).await;
    let _ = std::fs::remove_file(&db_path);
}
