//! End-to-end tests for the chat driver
//!
//! These tests run the real [`ConnectionManager`] and [`ConversationStore`]
//! behind a [`ChatClient`], with an in-memory connector standing in for the
//! Socket.IO server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use medchat_core::config::{Config, ConnectionConfig};
use medchat_core::transport::{
    BotResponse, ClientEvent, Connector, Endpoint, Link, LinkEvent, ServerEvent,
};
use medchat_core::{
    ChatClient, ChatHandle, ChatSnapshot, ConnectionStatus, ConsultationStage, ConversationStore,
    Error, KvStore, MemoryKvStore, SendOutcome, SqliteKvStore, StoreSettings, SystemClock,
};
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

const WAIT: Duration = Duration::from_secs(5);

/// Server side of an accepted link.
struct ServerEnd {
    to_client: mpsc::UnboundedSender<LinkEvent>,
    from_client: mpsc::UnboundedReceiver<ClientEvent>,
}

impl ServerEnd {
    /// Next `user_message`, skipping heartbeats.
    async fn next_user_message(&mut self) -> medchat_core::transport::UserMessage {
        loop {
            let event = tokio::time::timeout(WAIT, self.from_client.recv())
                .await
                .expect("timed out waiting for client event")
                .expect("client closed the link");
            if let ClientEvent::UserMessage(message) = event {
                return message;
            }
        }
    }

    fn reply(&self, response: BotResponse) {
        self.to_client
            .send(LinkEvent::Event(ServerEvent::BotResponse(response)))
            .expect("client gone");
    }
}

/// Connector that accepts one connection per permit.
struct GatedConnector {
    permits: Arc<Semaphore>,
    servers: mpsc::UnboundedSender<ServerEnd>,
}

#[async_trait]
impl Connector for GatedConnector {
    async fn connect(&self, _endpoint: &Endpoint) -> medchat_core::Result<Link> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Transport("connector closed".to_string()))?;
        permit.forget();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.servers
            .send(ServerEnd {
                to_client: in_tx,
                from_client: out_rx,
            })
            .map_err(|_| Error::Transport("test server gone".to_string()))?;
        Ok(Link::new(out_tx, in_rx))
    }
}

struct Harness {
    chat: ChatHandle,
    permits: Arc<Semaphore>,
    servers: mpsc::UnboundedReceiver<ServerEnd>,
}

impl Harness {
    fn start(permits: usize, storage: Box<dyn KvStore>) -> Self {
        let mut config = Config::default();
        config.server.user_id = Some("medical_user_test".to_string());
        config.connection = ConnectionConfig {
            reconnect_interval_ms: 50,
            max_reconnect_attempts: 3,
            heartbeat_interval_secs: 30,
            liveness_timeout_secs: None,
        };
        config.conversation.persist_debounce_ms = 10;

        let permits = Arc::new(Semaphore::new(permits));
        let (servers_tx, servers) = mpsc::unbounded_channel();
        let connector = Arc::new(GatedConnector {
            permits: permits.clone(),
            servers: servers_tx,
        });
        let endpoint = Endpoint::parse(&config.server.url, &config.server.socketio_path)
            .expect("default endpoint is valid");

        let chat = ChatClient::start_with(
            &config,
            endpoint,
            connector,
            storage,
            Arc::new(SystemClock),
        );
        Self {
            chat,
            permits,
            servers,
        }
    }

    async fn accept(&mut self) -> ServerEnd {
        tokio::time::timeout(WAIT, self.servers.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("connector dropped")
    }

    async fn wait_for(&self, predicate: impl FnMut(&ChatSnapshot) -> bool) -> ChatSnapshot {
        tokio::time::timeout(WAIT, self.chat.wait_for(predicate))
            .await
            .expect("timed out waiting for state")
            .expect("driver stopped")
    }
}

fn connected(snapshot: &ChatSnapshot) -> bool {
    snapshot.connection_status == ConnectionStatus::Connected
}

// ============================================
// Conversation flow
// ============================================

#[tokio::test]
async fn test_message_and_reply_round_trip() {
    let mut harness = Harness::start(1, Box::new(MemoryKvStore::new()));
    let mut server = harness.accept().await;
    let initial = harness.wait_for(connected).await;

    // A fresh install opens on the welcome message
    assert_eq!(initial.conversations.len(), 1);
    assert_eq!(initial.messages.len(), 1);
    assert!(initial.messages[0].is_bot());

    let outcome = harness.chat.send_message("asthme").await.unwrap();
    assert_eq!(outcome, SendOutcome::Sent);

    let sent = server.next_user_message().await;
    assert_eq!(sent.message, "asthme");
    assert_eq!(sent.user_id, "medical_user_test");
    assert_eq!(
        Some(sent.conversation_id.as_str()),
        initial.current_conversation_id.as_deref()
    );

    let typing = harness.wait_for(|s| s.is_typing).await;
    assert_eq!(typing.messages.last().unwrap().text, "asthme");

    server.reply(BotResponse {
        message: Some("Avez-vous de la fièvre ?".to_string()),
        conversation_id: Some(sent.conversation_id.clone()),
        message_id: Some("bot-1".to_string()),
        timestamp: None,
    });

    let answered = harness
        .wait_for(|s| !s.is_typing && s.messages.len() == 3)
        .await;
    let reply = answered.messages.last().unwrap();
    assert!(reply.is_bot());
    assert_eq!(reply.id, "bot-1");
    assert_eq!(
        answered.current_consultation_stage,
        Some(ConsultationStage::AskingSymptoms)
    );

    // The same reply delivered twice is shown once
    server.reply(BotResponse {
        message: Some("Avez-vous de la fièvre ?".to_string()),
        conversation_id: Some(sent.conversation_id.clone()),
        message_id: Some("bot-1".to_string()),
        timestamp: None,
    });
    server.reply(BotResponse {
        message: Some("Répondez par oui ou non.".to_string()),
        conversation_id: Some(sent.conversation_id),
        message_id: Some("bot-2".to_string()),
        timestamp: None,
    });

    let after = harness
        .wait_for(|s| s.messages.last().is_some_and(|m| m.id == "bot-2"))
        .await;
    assert_eq!(after.messages.len(), 4);

    harness.chat.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_offline_message_is_sent_after_connecting() {
    let mut harness = Harness::start(0, Box::new(MemoryKvStore::new()));

    let outcome = harness.chat.send_message("diabète").await.unwrap();
    assert_eq!(outcome, SendOutcome::Queued);

    let queued = harness.wait_for(|s| s.pending_count == 1).await;
    assert!(!connected(&queued));

    harness.permits.add_permits(1);
    let mut server = harness.accept().await;

    let delivered = server.next_user_message().await;
    assert_eq!(delivered.message, "diabète");
    assert_eq!(
        Some(delivered.conversation_id.as_str()),
        queued.current_conversation_id.as_deref()
    );

    let flushed = harness.wait_for(|s| connected(s) && s.pending_count == 0).await;
    assert!(flushed.messages.iter().any(|m| m.text == "diabète"));

    harness.chat.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reply_for_background_conversation() {
    let mut harness = Harness::start(1, Box::new(MemoryKvStore::new()));
    let mut server = harness.accept().await;
    harness.wait_for(connected).await;

    harness.chat.send_message("asthme").await.unwrap();
    let first = server.next_user_message().await;

    let second = harness
        .chat
        .start_medical_consultation(Some("grippe".to_string()))
        .await
        .unwrap();
    assert_ne!(second, first.conversation_id);

    server.reply(BotResponse {
        message: Some("Depuis combien de temps ?".to_string()),
        conversation_id: Some(first.conversation_id.clone()),
        message_id: None,
        timestamp: None,
    });

    let routed = harness
        .wait_for(|s| {
            s.conversations
                .iter()
                .any(|c| c.id == first.conversation_id && c.messages.len() == 3)
        })
        .await;

    // The visible thread is untouched
    assert_eq!(routed.current_conversation_id.as_deref(), Some(second.as_str()));
    assert_eq!(routed.messages.len(), 1);

    harness.chat.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_seeded_consultation_waits_for_slow_connection() {
    let mut harness = Harness::start(0, Box::new(MemoryKvStore::new()));
    let permits = harness.permits.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        permits.add_permits(1);
    });

    harness
        .chat
        .start_medical_consultation(Some("asthme".to_string()))
        .await
        .unwrap();
    let status = harness.chat.wait_until_settled(WAIT).await.unwrap();
    assert_eq!(status, ConnectionStatus::Connected);

    let outcome = harness.chat.send_message("asthme").await.unwrap();
    assert_eq!(outcome, SendOutcome::Sent);

    let mut server = harness.accept().await;
    assert_eq!(server.next_user_message().await.message, "asthme");

    let snapshot = harness.chat.snapshot();
    assert_eq!(snapshot.pending_count, 0);
    assert_eq!(snapshot.messages.len(), 2);
    assert!(!snapshot
        .messages
        .iter()
        .any(|m| m.text.starts_with("🔄")));

    harness.chat.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_settles_when_server_unreachable() {
    let harness = Harness::start(0, Box::new(MemoryKvStore::new()));
    harness.permits.close();

    let status = harness.chat.wait_until_settled(WAIT).await.unwrap();
    assert_ne!(status, ConnectionStatus::Connected);

    // A later caller does not wait for another attempt
    let again = tokio::time::timeout(
        Duration::from_millis(500),
        harness.chat.wait_until_settled(WAIT),
    )
    .await
    .expect("settled state is remembered")
    .unwrap();
    assert_ne!(again, ConnectionStatus::Connected);

    harness.chat.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let mut config = Config::default();
    config.connection.heartbeat_interval_secs = 0;

    let err = ChatClient::start(&config, Box::new(MemoryKvStore::new())).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_handle_fails_after_shutdown() {
    let harness = Harness::start(0, Box::new(MemoryKvStore::new()));
    harness.chat.shutdown().await.unwrap();

    let err = harness.chat.send_message("asthme").await.unwrap_err();
    assert!(matches!(err, Error::Closed));
}

// ============================================
// Persistence
// ============================================

#[tokio::test]
async fn test_conversations_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("medchat.db");

    let harness = Harness::start(0, Box::new(SqliteKvStore::open(&db_path).unwrap()));
    harness.chat.send_message("hypertension").await.unwrap();
    let consultation = harness
        .chat
        .start_medical_consultation(Some("asthme".to_string()))
        .await
        .unwrap();
    harness.chat.shutdown().await.unwrap();

    let settings = StoreSettings {
        timing: Default::default(),
        user_id: "medical_user_test".to_string(),
        server_url: "http://localhost:5000".to_string(),
    };
    let store = ConversationStore::open(
        settings,
        Box::new(SqliteKvStore::open(&db_path).unwrap()),
        Arc::new(SystemClock),
    );

    assert_eq!(store.conversations().len(), 2);
    assert_eq!(store.current_conversation_id(), Some(consultation.as_str()));

    let older = &store.conversations()[1];
    assert_eq!(older.title, "🩺 hypertension");
    assert!(older.messages.iter().any(|m| m.text == "hypertension"));
}
