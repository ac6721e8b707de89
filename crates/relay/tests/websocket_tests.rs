//! End-to-end tests: a real listener, real WebSocket clients, and a SQLite
//! database in a temporary directory.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agora_config::{AuthConfig, DatabaseConfig, RelayConfig};
use agora_database::{
    initialize_database, ConversationRepository, CreateUserRequest, MessageRepository,
    NotificationRepository, UserRepository,
};
use agora_relay::{create_router, Coordinator, RelayState, SqliteStore, TokenClaims};
use axum::{body::Body, http::Request};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestApp {
    addr: SocketAddr,
    router: axum::Router,
    pool: SqlitePool,
    auth: AuthConfig,
    _db_dir: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_relay_config(RelayConfig::default()).await
    }

    async fn with_relay_config(relay: RelayConfig) -> Self {
        let db_dir = TempDir::new().expect("create temp dir");
        let db_path = db_dir.path().join("agora-test.db");
        let database = DatabaseConfig {
            url: format!("sqlite://{}", db_path.to_string_lossy()),
            max_connections: 5,
        };
        let pool = initialize_database(&database)
            .await
            .expect("initialise database");

        let auth = AuthConfig {
            jwt_secret: "integration-secret".into(),
            ..AuthConfig::default()
        };

        let store = Arc::new(SqliteStore::new(pool.clone()));
        let (coordinator, _task) = Coordinator::spawn(store.clone(), &relay);
        let state = RelayState::new(coordinator, store, &auth, relay);
        let router = create_router(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("listener address");
        let server = router.clone();
        tokio::spawn(async move {
            axum::serve(listener, server).await.expect("serve relay");
        });

        Self {
            addr,
            router,
            pool,
            auth,
            _db_dir: db_dir,
        }
    }

    fn token_for(&self, user_id: i64) -> String {
        self.token_with_ttl(user_id, 3600)
    }

    fn token_with_ttl(&self, user_id: i64, ttl_seconds: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: user_id.to_string(),
            exp: now + ttl_seconds,
            iat: now,
            iss: self.auth.issuer.clone(),
            aud: self.auth.audience.clone(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.auth.jwt_secret.as_bytes()),
        )
        .expect("encode token")
    }

    async fn connect(&self, user_id: i64, conversation_id: Option<i64>) -> Client {
        self.connect_with_token(user_id, &self.token_for(user_id), conversation_id)
            .await
    }

    async fn connect_with_token(
        &self,
        user_id: i64,
        token: &str,
        conversation_id: Option<i64>,
    ) -> Client {
        let mut url = format!("ws://{}/ws?token={token}", self.addr);
        if let Some(conversation_id) = conversation_id {
            url.push_str(&format!("&conversation_id={conversation_id}"));
        }
        let (mut client, _) = connect_async(url).await.expect("websocket connect");

        let connected = next_json(&mut client).await.expect("connected frame");
        assert_eq!(connected["type"], "connected");
        assert_eq!(connected["user_id"], user_id);
        client
    }

    async fn user(&self, first_name: &str, last_name: &str) -> i64 {
        UserRepository::new(self.pool.clone())
            .create(&CreateUserRequest {
                first_name: first_name.into(),
                last_name: last_name.into(),
                avatar: None,
            })
            .await
            .expect("create user")
            .id
    }

    async fn direct(&self, a: i64, b: i64) -> i64 {
        ConversationRepository::new(self.pool.clone())
            .find_or_create_direct(a, b)
            .await
            .expect("create direct conversation")
            .id
    }

    async fn notifications_for(&self, user_id: i64) -> Vec<agora_database::Notification> {
        NotificationRepository::new(self.pool.clone())
            .find_by_receiver(user_id)
            .await
            .expect("list notifications")
    }

    async fn health(&self) -> Value {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("health response");
        assert!(response.status().is_success());

        let body = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        serde_json::from_slice(&body).expect("health JSON")
    }

    /// Poll `/health` until it reports `expected` live connections.
    async fn wait_for_connections(&self, expected: u64) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if self.health().await["connections"] == expected {
                return true;
            }
            if tokio::time::Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Poll until the receiver has `expected` notifications.
    async fn wait_for_notifications(&self, user_id: i64, expected: usize) -> Vec<agora_database::Notification> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let notifications = self.notifications_for(user_id).await;
            if notifications.len() >= expected || tokio::time::Instant::now() > deadline {
                return notifications;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Next JSON text frame, skipping transport-level frames.
async fn next_json(client: &mut Client) -> Option<Value> {
    loop {
        match timeout(WAIT, client.next()).await.ok()?? {
            Ok(Message::Text(text)) => {
                return Some(serde_json::from_str(&text).expect("server sends JSON"))
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(other) => panic!("unexpected frame {other:?}"),
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string()))
        .await
        .expect("send frame");
}

/// A ping round trip proves every earlier frame from this client was handled.
async fn round_trip(client: &mut Client) {
    send_json(client, json!({ "type": "ping" })).await;
    let reply = next_json(client).await.expect("pong frame");
    assert_eq!(reply["type"], "pong");
}

#[tokio::test]
async fn upgrade_without_valid_token_is_unauthorized() {
    let app = TestApp::new().await;

    for url in [
        format!("ws://{}/ws", app.addr),
        format!("ws://{}/ws?token=garbage", app.addr),
    ] {
        match connect_async(url).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status().as_u16(), 401);
            }
            other => panic!("expected 401, got {:?}", other.map(|(_, r)| r.status())),
        }
    }
}

#[tokio::test]
async fn message_is_persisted_delivered_and_notified() {
    let app = TestApp::new().await;
    let alice = app.user("Alice", "Archer").await;
    let bob = app.user("Bob", "Baker").await;
    let conversation = app.direct(alice, bob).await;

    let mut client = app.connect(alice, None).await;
    send_json(
        &mut client,
        json!({ "type": "register", "conversation_id": conversation }),
    )
    .await;
    let registered = next_json(&mut client).await.expect("registered frame");
    assert_eq!(registered["type"], "registered");
    assert_eq!(registered["conversation_id"], conversation);

    send_json(
        &mut client,
        json!({
            "type": "chat_message",
            "conversation_id": conversation,
            "sender_id": 9999,
            "content": "hello",
        }),
    )
    .await;

    let delivered = next_json(&mut client).await.expect("chat frame");
    assert_eq!(delivered["type"], "chat_message");
    assert_eq!(delivered["sender_id"], alice);
    assert_eq!(delivered["sender_name"], "Alice Archer");
    assert_eq!(delivered["content"], "hello");

    let stored = MessageRepository::new(app.pool.clone())
        .find_by_conversation(conversation)
        .await
        .expect("list messages");
    assert_eq!(stored.len(), 1);
    assert_eq!(delivered["id"], stored[0].id);
    assert_eq!(stored[0].sender_id, alice);

    let notifications = app.wait_for_notifications(bob, 1).await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].sender_id, alice);
    assert_eq!(notifications[0].conversation_id, conversation);
    assert!(app.notifications_for(alice).await.is_empty());
}

#[tokio::test]
async fn present_participant_receives_the_message_instead_of_a_notification() {
    let app = TestApp::new().await;
    let alice = app.user("Alice", "Archer").await;
    let bob = app.user("Bob", "Baker").await;
    let conversation = app.direct(alice, bob).await;

    let mut alice_client = app.connect(alice, Some(conversation)).await;
    let mut bob_client = app.connect(bob, Some(conversation)).await;

    send_json(
        &mut alice_client,
        json!({ "type": "chat_message", "content": "are you there?" }),
    )
    .await;

    let to_bob = next_json(&mut bob_client).await.expect("bob receives");
    let to_alice = next_json(&mut alice_client).await.expect("alice receives");
    assert_eq!(to_bob, to_alice);
    assert_eq!(to_bob["conversation_id"], conversation);

    // a later round trip orders after the notification phase of the message
    send_json(
        &mut alice_client,
        json!({ "type": "chat_message", "content": "second" }),
    )
    .await;
    next_json(&mut bob_client).await.expect("second message");
    assert!(app.notifications_for(bob).await.is_empty());
}

#[tokio::test]
async fn outsider_cannot_join_or_post() {
    let app = TestApp::new().await;
    let alice = app.user("Alice", "Archer").await;
    let bob = app.user("Bob", "Baker").await;
    let mallory = app.user("Mallory", "Moe").await;
    let conversation = app.direct(alice, bob).await;

    let mut alice_client = app.connect(alice, Some(conversation)).await;

    // the initial conversation is not honoured for non-participants
    let mut outsider = app.connect(mallory, Some(conversation)).await;
    send_json(
        &mut outsider,
        json!({ "type": "register", "conversation_id": conversation }),
    )
    .await;
    send_json(
        &mut outsider,
        json!({ "type": "chat_message", "conversation_id": conversation, "content": "let me in" }),
    )
    .await;
    round_trip(&mut outsider).await;

    round_trip(&mut alice_client).await;
    let stored = MessageRepository::new(app.pool.clone())
        .find_by_conversation(conversation)
        .await
        .expect("list messages");
    assert!(stored.is_empty());
}

#[tokio::test]
async fn unknown_frames_are_ignored_and_malformed_frames_disconnect() {
    let app = TestApp::new().await;
    let alice = app.user("Alice", "Archer").await;
    let mut client = app.connect(alice, None).await;

    send_json(&mut client, json!({ "type": "typing", "conversation_id": 1 })).await;
    round_trip(&mut client).await;

    client
        .send(Message::Text("this is not json".into()))
        .await
        .expect("send garbage");
    assert_eq!(next_json(&mut client).await, None);
}

#[tokio::test]
async fn server_pings_on_keepalive_interval() {
    let relay = RelayConfig {
        keepalive_interval_seconds: 1,
        pong_wait_seconds: 3,
        ..RelayConfig::default()
    };
    let app = TestApp::with_relay_config(relay).await;
    let alice = app.user("Alice", "Archer").await;
    let mut client = app.connect(alice, None).await;

    let ping = timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Ping(_))) => return true,
                Some(Ok(_)) => continue,
                _ => return false,
            }
        }
    })
    .await
    .expect("ping within the keepalive interval");
    assert!(ping);

    // the client answered the ping while reading, so the session is alive
    round_trip(&mut client).await;
}

#[tokio::test]
async fn health_reports_live_connections() {
    let app = TestApp::new().await;
    let alice = app.user("Alice", "Archer").await;
    let mut client = app.connect(alice, None).await;
    round_trip(&mut client).await;

    let health = app.health().await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
}

#[tokio::test]
async fn silent_client_is_dropped_after_the_read_deadline() {
    let relay = RelayConfig {
        keepalive_interval_seconds: 1,
        pong_wait_seconds: 2,
        ..RelayConfig::default()
    };
    let app = TestApp::with_relay_config(relay).await;
    let alice = app.user("Alice", "Archer").await;

    // Past the connected frame this client neither reads nor writes, so the
    // server's pings go unanswered.
    let mut client = app.connect(alice, None).await;
    assert!(app.wait_for_connections(1).await);

    assert!(
        app.wait_for_connections(0).await,
        "connection outlived its read deadline"
    );
    assert_eq!(next_json(&mut client).await, None);
}

#[tokio::test]
async fn connection_closes_when_its_token_expires() {
    let app = TestApp::new().await;
    let alice = app.user("Alice", "Archer").await;
    let token = app.token_with_ttl(alice, 2);
    let mut client = app.connect_with_token(alice, &token, None).await;
    round_trip(&mut client).await;

    let started = tokio::time::Instant::now();
    assert_eq!(next_json(&mut client).await, None);
    assert!(started.elapsed() < WAIT, "closed by expiry, not by the test timeout");
    assert!(app.wait_for_connections(0).await);
}
