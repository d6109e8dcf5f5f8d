//! End-to-end tests: a real relay on an ephemeral port, real websocket
//! clients, and a warp stand-in for the backend's `/messages` endpoints.

use std::sync::Arc;
use std::time::Duration;

use chat_relay::client::{ChatClient, Conversation};
use chat_relay::{
    room_key, routes, ChatMessage, HttpMessageStore, MessageStore, PersistError, Relay,
    ServerEvent,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use warp::http::StatusCode;
use warp::Filter;

const PAGE_ORIGIN: &str = "http://localhost:3000";

struct Backend {
    url: String,
    saved: mpsc::UnboundedReceiver<Value>,
}

/// Accepts `POST /messages` and answers `GET /messages/<room>` with `history`.
fn start_backend(history: Value, create_status: StatusCode) -> Backend {
    let (tx, saved) = mpsc::unbounded_channel();

    let create = warp::post()
        .and(warp::path("messages"))
        .and(warp::path::end())
        .and(warp::body::json())
        .map(move |payload: Value| {
            let _ = tx.send(payload);
            warp::reply::with_status(warp::reply::json(&json!({"message": "ok"})), create_status)
        });

    let list = warp::get()
        .and(warp::path!("messages" / String))
        .map(move |_room: String| warp::reply::json(&history));

    let (addr, server) = warp::serve(create.or(list)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    Backend {
        url: format!("http://{addr}"),
        saved,
    }
}

fn start_relay(store: Arc<dyn MessageStore>) -> (Relay, String) {
    let relay = Relay::new(store);
    let origin = PAGE_ORIGIN.parse().unwrap();
    let (addr, server) =
        warp::serve(routes(relay.clone(), &origin)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (relay, format!("ws://{addr}/ws"))
}

fn unreachable_store() -> Arc<dyn MessageStore> {
    // Nothing listens on port 1.
    Arc::new(HttpMessageStore::new("http://127.0.0.1:1").unwrap())
}

async fn wait_for_members(relay: &Relay, room: &str, count: usize) {
    timeout(Duration::from_secs(2), async {
        while relay.room_members(room).await.len() != count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("room membership did not settle");
}

async fn next_event(client: &mut ChatClient) -> ServerEvent {
    timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("timed out waiting for an event")
        .unwrap()
        .expect("connection closed")
}

async fn assert_silent(client: &mut ChatClient) {
    let result = timeout(Duration::from_millis(200), client.recv()).await;
    assert!(result.is_err(), "unexpected event: {result:?}");
}

fn chat(room: &str, sender: &str, text: &str) -> ChatMessage {
    ChatMessage {
        room_id: room.to_string(),
        message: text.to_string(),
        sender: sender.to_string(),
        created_at: Some("2024-05-01T10:00:00.000Z".to_string()),
    }
}

fn received(message: &ChatMessage) -> ServerEvent {
    ServerEvent::ReceiveMessage(serde_json::to_value(message).unwrap())
}

#[tokio::test]
async fn connection_event_carries_session_id() {
    let (relay, url) = start_relay(unreachable_store());

    let client = ChatClient::connect(&url).await.unwrap();

    assert!(!client.socket_id().is_empty());
    assert_eq!(relay.connection_count().await, 1);
}

#[tokio::test]
async fn message_reaches_room_members_only() {
    let (relay, url) = start_relay(unreachable_store());
    let mut c1 = ChatClient::connect(&url).await.unwrap();
    let mut c2 = ChatClient::connect(&url).await.unwrap();
    let mut c3 = ChatClient::connect(&url).await.unwrap();

    c1.join_room("r").await.unwrap();
    c2.join_room("r").await.unwrap();
    c3.join_room("r2").await.unwrap();
    wait_for_members(&relay, "r", 2).await;
    wait_for_members(&relay, "r2", 1).await;

    let sent = chat("r", "alice@x.com", "hello");
    c1.send_message(&sent).await.unwrap();

    assert_eq!(next_event(&mut c1).await, received(&sent));
    assert_eq!(next_event(&mut c2).await, received(&sent));
    assert_silent(&mut c3).await;
}

#[tokio::test]
async fn late_joiner_does_not_receive_earlier_messages() {
    let (relay, url) = start_relay(unreachable_store());
    let mut early = ChatClient::connect(&url).await.unwrap();
    early.join_room("r").await.unwrap();
    wait_for_members(&relay, "r", 1).await;

    let before = chat("r", "alice@x.com", "before");
    early.send_message(&before).await.unwrap();
    assert_eq!(next_event(&mut early).await, received(&before));

    let mut late = ChatClient::connect(&url).await.unwrap();
    late.join_room("r").await.unwrap();
    wait_for_members(&relay, "r", 2).await;

    let after = chat("r", "alice@x.com", "after");
    early.send_message(&after).await.unwrap();
    assert_eq!(next_event(&mut late).await, received(&after));
}

#[tokio::test]
async fn broadcast_survives_unreachable_backend() {
    let (relay, url) = start_relay(unreachable_store());
    let mut sender = ChatClient::connect(&url).await.unwrap();
    let mut reader = ChatClient::connect(&url).await.unwrap();
    sender.join_room("r").await.unwrap();
    reader.join_room("r").await.unwrap();
    wait_for_members(&relay, "r", 2).await;

    for text in ["one", "two"] {
        let sent = chat("r", "alice@x.com", text);
        sender.send_message(&sent).await.unwrap();
        assert_eq!(next_event(&mut reader).await, received(&sent));
    }
}

#[tokio::test]
async fn backend_error_status_does_not_block_broadcast() {
    let backend = start_backend(json!({"messages": []}), StatusCode::INTERNAL_SERVER_ERROR);
    let (relay, url) = start_relay(Arc::new(HttpMessageStore::new(&backend.url).unwrap()));
    let mut c1 = ChatClient::connect(&url).await.unwrap();
    c1.join_room("r").await.unwrap();
    wait_for_members(&relay, "r", 1).await;

    let sent = chat("r", "alice@x.com", "hi");
    c1.send_message(&sent).await.unwrap();
    assert_eq!(next_event(&mut c1).await, received(&sent));
}

#[tokio::test]
async fn back_to_back_messages_keep_order() {
    let (relay, url) = start_relay(unreachable_store());
    let mut sender = ChatClient::connect(&url).await.unwrap();
    let mut reader = ChatClient::connect(&url).await.unwrap();
    sender.join_room("r").await.unwrap();
    reader.join_room("r").await.unwrap();
    wait_for_members(&relay, "r", 2).await;

    let messages: Vec<ChatMessage> = (0..10)
        .map(|i| chat("r", "alice@x.com", &format!("m{i}")))
        .collect();
    for message in &messages {
        sender.send_message(message).await.unwrap();
    }

    for message in &messages {
        assert_eq!(next_event(&mut reader).await, received(message));
    }
}

#[tokio::test]
async fn disconnect_removes_connection_from_rooms() {
    let (relay, url) = start_relay(unreachable_store());
    let mut stays = ChatClient::connect(&url).await.unwrap();
    let mut leaves = ChatClient::connect(&url).await.unwrap();
    stays.join_room("r").await.unwrap();
    leaves.join_room("r").await.unwrap();
    leaves.join_room("elsewhere").await.unwrap();
    wait_for_members(&relay, "r", 2).await;
    wait_for_members(&relay, "elsewhere", 1).await;

    leaves.close().await.unwrap();
    wait_for_members(&relay, "r", 1).await;
    assert_eq!(relay.room_count().await, 1);
    assert_eq!(relay.connection_count().await, 1);

    let sent = chat("r", "alice@x.com", "anyone?");
    stays.send_message(&sent).await.unwrap();
    assert_eq!(next_event(&mut stays).await, received(&sent));
}

#[tokio::test]
async fn payload_is_persisted_verbatim() {
    let mut backend = start_backend(json!({"messages": []}), StatusCode::CREATED);
    let (relay, url) = start_relay(Arc::new(HttpMessageStore::new(&backend.url).unwrap()));
    let mut c1 = ChatClient::connect(&url).await.unwrap();
    c1.join_room("r").await.unwrap();
    wait_for_members(&relay, "r", 1).await;

    let sent = chat("r", "alice@x.com", "keep me");
    c1.send_message(&sent).await.unwrap();

    let persisted = timeout(Duration::from_secs(2), backend.saved.recv())
        .await
        .expect("backend never received the message")
        .unwrap();
    assert_eq!(persisted, serde_json::to_value(&sent).unwrap());
}

#[tokio::test]
async fn conversation_skips_own_echo() {
    let (relay, url) = start_relay(unreachable_store());
    let alice = ChatClient::connect(&url).await.unwrap();
    let bob = ChatClient::connect(&url).await.unwrap();

    let mut alice = Conversation::open(alice, " alice@x.com ", "bob@y.com")
        .await
        .unwrap();
    let mut bob = Conversation::open(bob, "bob@y.com", "alice@x.com")
        .await
        .unwrap();
    assert_eq!(alice.room_id(), "alice@x.com_bob@y.com");
    assert_eq!(alice.room_id(), bob.room_id());
    wait_for_members(&relay, alice.room_id(), 2).await;

    let local_echo = alice.say("hi bob").await.unwrap();
    assert_eq!(local_echo.sender, "alice@x.com");
    assert!(local_echo.created_at.is_some());

    let got = timeout(Duration::from_secs(2), bob.next_from_peer())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(got, local_echo);

    bob.say("hi alice").await.unwrap();
    let got = timeout(Duration::from_secs(2), alice.next_from_peer())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(got.message, "hi alice", "alice's own echo must be skipped");
}

#[tokio::test]
async fn history_is_loaded_from_backend() {
    let room = room_key("alice@x.com", "bob@y.com");
    let backend = start_backend(
        json!({"messages": [
            {"room_id": room, "sender": "alice@x.com", "message": "first", "created_at": "2024-05-01 10:00:00"},
            {"room_id": room, "sender": "bob@y.com", "message": "second", "created_at": "2024-05-01 10:01:00"},
        ]}),
        StatusCode::CREATED,
    );
    let store = HttpMessageStore::new(&backend.url).unwrap();

    let history = store.history(&room).await.unwrap();

    assert_eq!(history.len(), 2);
    assert_eq!(history[0].message, "first");
    assert_eq!(history[1].sender, "bob@y.com");
}

#[tokio::test]
async fn history_reports_backend_failure() {
    let store = HttpMessageStore::new("http://127.0.0.1:1").unwrap();
    assert!(matches!(
        store.history("a_b").await,
        Err(PersistError::Request(_))
    ));
}
