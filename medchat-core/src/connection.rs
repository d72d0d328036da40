//! Connection manager
//!
//! Owns the single logical connection to the chat backend. All lifecycle
//! state (the live link, heartbeat, reconnect timer, attempt counter) lives
//! in one actor task; [`ConnectionManager`] is a cheap handle that talks to
//! it over a channel and reads the published [`ConnectionStatus`].
//!
//! Reconnection uses a fixed delay and a bounded number of attempts. Once
//! the attempts are used up, no automatic retry happens until the owner
//! calls [`ConnectionManager::connect`] or [`ConnectionManager::reconnect`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::transport::{ClientEvent, Connector, Endpoint, Link, LinkEvent, ServerEvent, UserMessage};
use crate::types::ConnectionStatus;

/// Reported when a handshake fails.
pub const CONNECT_ERROR: &str = "Erreur de connexion au serveur médical";
/// Reported when a send is attempted without a connection.
pub const NOT_CONNECTED_ERROR: &str = "Non connecté au serveur médical";
/// Reported when the link refuses an outgoing message.
pub const SEND_ERROR: &str = "Échec de l'envoi du message médical";
/// Reported once automatic reconnection gives up.
pub const MAX_ATTEMPTS_ERROR: &str = "Nombre maximum de tentatives de reconnexion atteint";

/// Events delivered to the owner, one per occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A (re)connection completed. The attempt counter is reset.
    Connected,
    /// The connection was lost or closed.
    Disconnected,
    /// An automatic reconnect was scheduled.
    Reconnecting { attempt: u32, max: u32 },
    /// Transport-level failure.
    Error(String),
    /// The backend is composing a reply.
    Typing,
    /// Any backend event, including `typing` and `error`.
    Message(ServerEvent),
}

enum Command {
    Connect {
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Disconnect {
        ack: oneshot::Sender<()>,
    },
    Send {
        message: UserMessage,
        reply: oneshot::Sender<bool>,
    },
}

/// Handle to the connection actor.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionManager {
    /// Start the actor. Nothing connects until [`connect`](Self::connect)
    /// or [`reconnect`](Self::reconnect) is called.
    pub fn spawn(
        config: ConnectionConfig,
        connect_timeout: Duration,
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let actor = Actor {
            config,
            connect_timeout,
            endpoint,
            connector,
            status: status_tx,
            events: event_tx,
            link: None,
            handshake: None,
            handshake_automatic: false,
            waiters: Vec::new(),
            heartbeat: None,
            reconnect_timer: None,
            attempts: 0,
            manual_close: false,
            last_inbound: Instant::now(),
        };
        tokio::spawn(actor.run(command_rx));

        (
            Self {
                commands: command_tx,
                status: status_rx,
            },
            event_rx,
        )
    }

    /// Connect and wait for the backend acknowledgement.
    ///
    /// Resolves immediately when already connected. A failure is also
    /// reported as [`ConnectionEvent::Error`].
    pub async fn connect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply: Some(reply) })
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Start connecting without waiting. No-op while connected.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Connect { reply: None });
    }

    /// Close the connection and suppress automatic reconnection. Idempotent.
    pub async fn disconnect(&self) {
        let (ack, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { ack }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Transmit a user message. `false` when not connected or when the
    /// link refused it; never buffers.
    pub async fn send_message(&self, message: UserMessage) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Send { message, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }
}

/// What the conversation store needs from a connection.
#[async_trait]
pub trait ChatConnection: Send + Sync {
    fn status(&self) -> ConnectionStatus;

    fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    async fn send_message(&self, message: UserMessage) -> bool;

    /// Start connecting in the background unless already connected.
    fn reconnect(&self);

    async fn disconnect(&self) {}
}

#[async_trait]
impl ChatConnection for ConnectionManager {
    fn status(&self) -> ConnectionStatus {
        ConnectionManager::status(self)
    }

    async fn send_message(&self, message: UserMessage) -> bool {
        ConnectionManager::send_message(self, message).await
    }

    fn reconnect(&self) {
        ConnectionManager::reconnect(self)
    }

    async fn disconnect(&self) {
        ConnectionManager::disconnect(self).await
    }
}

type Handshake = Pin<Box<dyn Future<Output = Result<Link>> + Send>>;

struct Actor {
    config: ConnectionConfig,
    connect_timeout: Duration,
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    status: watch::Sender<ConnectionStatus>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    link: Option<Link>,
    handshake: Option<Handshake>,
    /// Whether the running handshake was started by the reconnect timer
    handshake_automatic: bool,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    heartbeat: Option<Interval>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    attempts: u32,
    manual_close: bool,
    last_inbound: Instant,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                result = poll_slot(&mut self.handshake) => {
                    self.handshake = None;
                    self.on_handshake(result);
                }
                event = recv_link(&mut self.link) => self.on_link_event(event),
                _ = tick(&mut self.heartbeat) => self.on_heartbeat(),
                _ = poll_slot(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.on_reconnect_due();
                }
            }
        }
        tracing::debug!("Connection manager stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => self.on_connect_request(reply),
            Command::Disconnect { ack } => {
                self.close_manually();
                let _ = ack.send(());
            }
            Command::Send { message, reply } => {
                let _ = reply.send(self.transmit(message));
            }
        }
    }

    fn on_connect_request(&mut self, reply: Option<oneshot::Sender<Result<()>>>) {
        if self.link.is_some() {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(()));
            }
            return;
        }

        self.manual_close = false;
        self.attempts = 0;
        self.reconnect_timer = None;
        self.waiters.extend(reply);

        if self.handshake.is_some() {
            // Join the running attempt; its outcome is now the owner's.
            self.handshake_automatic = false;
            return;
        }
        self.start_handshake(false);
    }

    fn start_handshake(&mut self, automatic: bool) {
        let status = if automatic {
            ConnectionStatus::Reconnecting
        } else {
            ConnectionStatus::Connecting
        };
        self.set_status(status);
        tracing::info!(endpoint = %self.endpoint, automatic, "Connecting to chat server");

        let connector = self.connector.clone();
        let endpoint = self.endpoint.clone();
        let timeout = self.connect_timeout;
        self.handshake_automatic = automatic;
        self.handshake = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, connector.connect(&endpoint)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Transport(format!(
                    "handshake timed out after {}s",
                    timeout.as_secs()
                ))),
            }
        }));
    }

    fn on_handshake(&mut self, result: Result<Link>) {
        match result {
            Ok(link) => {
                tracing::info!(endpoint = %self.endpoint, "Connected to chat server");
                self.link = Some(link);
                self.attempts = 0;
                self.last_inbound = Instant::now();
                self.start_heartbeat();
                self.set_status(ConnectionStatus::Connected);
                self.emit(ConnectionEvent::Connected);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, automatic = self.handshake_automatic, "Connection attempt failed");
                let message = e.to_string();
                self.set_status(ConnectionStatus::Disconnected);
                self.emit(ConnectionEvent::Error(CONNECT_ERROR.to_string()));
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(Error::Transport(message.clone())));
                }

                if self.handshake_automatic && !self.manual_close {
                    if self.attempts < self.config.max_reconnect_attempts {
                        self.schedule_reconnect();
                    } else {
                        tracing::warn!(attempts = self.attempts, "Giving up reconnecting");
                        self.emit(ConnectionEvent::Error(MAX_ATTEMPTS_ERROR.to_string()));
                    }
                }
            }
        }
    }

    fn on_link_event(&mut self, event: Option<LinkEvent>) {
        match event {
            Some(LinkEvent::Event(event)) => {
                self.last_inbound = Instant::now();
                match &event {
                    ServerEvent::Heartbeat => tracing::debug!("Server heartbeat received"),
                    ServerEvent::Typing => self.emit(ConnectionEvent::Typing),
                    ServerEvent::Connection { message } => {
                        tracing::info!(message = message.as_deref().unwrap_or(""), "Server greeting")
                    }
                    _ => {}
                }
                self.emit(ConnectionEvent::Message(event));
            }
            Some(LinkEvent::Closed { reason }) => self.on_link_lost(&reason),
            None => self.on_link_lost("transport close"),
        }
    }

    fn on_link_lost(&mut self, reason: &str) {
        tracing::info!(reason, "Disconnected from chat server");
        self.link = None;
        self.heartbeat = None;
        self.set_status(ConnectionStatus::Disconnected);
        self.emit(ConnectionEvent::Disconnected);

        if !self.manual_close && self.attempts < self.config.max_reconnect_attempts {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        self.attempts += 1;
        tracing::info!(
            attempt = self.attempts,
            max = self.config.max_reconnect_attempts,
            "Scheduling reconnect"
        );
        self.set_status(ConnectionStatus::Reconnecting);
        self.emit(ConnectionEvent::Reconnecting {
            attempt: self.attempts,
            max: self.config.max_reconnect_attempts,
        });
        self.reconnect_timer = Some(Box::pin(sleep(self.config.reconnect_interval())));
    }

    fn on_reconnect_due(&mut self) {
        if self.manual_close || self.link.is_some() || self.handshake.is_some() {
            return;
        }
        self.start_handshake(true);
    }

    fn start_heartbeat(&mut self) {
        let period = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
    }

    fn on_heartbeat(&mut self) {
        if self.link.is_none() {
            self.heartbeat = None;
            return;
        }

        if let Some(limit) = self.config.liveness_timeout() {
            let silent_for = self.last_inbound.elapsed();
            if silent_for > limit {
                tracing::warn!(silent_secs = silent_for.as_secs(), "No traffic from server, dropping link");
                self.on_link_lost("liveness timeout");
                return;
            }
        }

        let sent = self
            .link
            .as_ref()
            .map_or(false, |link| link.send(ClientEvent::Heartbeat));
        if !sent {
            self.on_link_lost("transport error");
        }
    }

    fn transmit(&mut self, message: UserMessage) -> bool {
        let Some(link) = &self.link else {
            tracing::warn!(message_id = %message.message_id, "Send attempted while not connected");
            self.emit(ConnectionEvent::Error(NOT_CONNECTED_ERROR.to_string()));
            return false;
        };

        let message_id = message.message_id.clone();
        if link.send(ClientEvent::UserMessage(message)) {
            tracing::debug!(message_id = %message_id, "User message sent");
            true
        } else {
            tracing::warn!(message_id = %message_id, "Link refused user message");
            self.emit(ConnectionEvent::Error(SEND_ERROR.to_string()));
            false
        }
    }

    fn close_manually(&mut self) {
        self.manual_close = true;
        self.reconnect_timer = None;
        self.heartbeat = None;

        if self.handshake.take().is_some() {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Err(Error::Transport("connection cancelled".to_string())));
            }
        }

        let was_connected = self.link.take().is_some();
        self.set_status(ConnectionStatus::Disconnected);
        if was_connected {
            tracing::info!("Disconnected from chat server (manual)");
            self.emit(ConnectionEvent::Disconnected);
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

async fn poll_slot<F: Future + Unpin>(slot: &mut Option<F>) -> F::Output {
    match slot.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn recv_link(link: &mut Option<Link>) -> Option<LinkEvent> {
    match link.as_mut() {
        Some(link) => link.incoming.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BotResponse;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Server side of a scripted link.
    struct ServerEnd {
        to_client: mpsc::UnboundedSender<LinkEvent>,
        from_client: mpsc::UnboundedReceiver<ClientEvent>,
    }

    enum Script {
        Accept,
        Refuse,
        Hang,
    }

    /// Connector that follows a script and hands back the server ends.
    struct ScriptedConnector {
        script: Mutex<VecDeque<Script>>,
        servers: mpsc::UnboundedSender<ServerEnd>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Link> {
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Refuse);
            match step {
                Script::Accept => {
                    let (out_tx, out_rx) = mpsc::unbounded_channel();
                    let (in_tx, in_rx) = mpsc::unbounded_channel();
                    self.servers
                        .send(ServerEnd {
                            to_client: in_tx,
                            from_client: out_rx,
                        })
                        .unwrap();
                    Ok(Link::new(out_tx, in_rx))
                }
                Script::Refuse => Err(Error::Transport("connection refused".to_string())),
                Script::Hang => std::future::pending().await,
            }
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            reconnect_interval_ms: 5000,
            max_reconnect_attempts: 3,
            heartbeat_interval_secs: 30,
            liveness_timeout_secs: None,
        }
    }

    fn spawn_with(
        config: ConnectionConfig,
        script: Vec<Script>,
    ) -> (
        ConnectionManager,
        mpsc::UnboundedReceiver<ConnectionEvent>,
        mpsc::UnboundedReceiver<ServerEnd>,
    ) {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(ScriptedConnector {
            script: Mutex::new(script.into()),
            servers: servers_tx,
        });
        let endpoint = Endpoint::parse("http://localhost:5000", "socket.io").unwrap();
        let (manager, events) =
            ConnectionManager::spawn(config, Duration::from_secs(20), endpoint, connector);
        (manager, events, servers_rx)
    }

    fn user_message(id: &str) -> UserMessage {
        UserMessage {
            user_id: "u1".to_string(),
            message: "asthme".to_string(),
            conversation_id: "c1".to_string(),
            message_id: id.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let (manager, mut events, mut servers) = spawn_with(config(), vec![Script::Accept]);

        manager.connect().await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        let _server = servers.recv().await.unwrap();

        // Second connect must not open another transport
        manager.connect().await.unwrap();
        assert!(servers.try_recv().is_err());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_connection() {
        let (manager, mut events, mut servers) = spawn_with(config(), vec![Script::Accept]);

        assert!(!manager.send_message(user_message("m0")).await);
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::Error(NOT_CONNECTED_ERROR.to_string()))
        );

        manager.connect().await.unwrap();
        let mut server = servers.recv().await.unwrap();
        assert!(manager.send_message(user_message("m1")).await);

        match server.from_client.recv().await {
            Some(ClientEvent::UserMessage(message)) => assert_eq!(message.message_id, "m1"),
            other => panic!("unexpected client event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_reports_error() {
        let (manager, mut events, _servers) = spawn_with(config(), vec![Script::Refuse]);

        assert!(manager.connect().await.is_err());
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::Error(CONNECT_ERROR.to_string()))
        );
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        // A failed manual connect does not retry on its own
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let (manager, mut events, _servers) = spawn_with(config(), vec![Script::Hang]);

        let err = manager.connect().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::Error(CONNECT_ERROR.to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_events_are_forwarded() {
        let (manager, mut events, mut servers) = spawn_with(config(), vec![Script::Accept]);
        manager.connect().await.unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        let server = servers.recv().await.unwrap();

        server
            .to_client
            .send(LinkEvent::Event(ServerEvent::Typing))
            .unwrap();
        server
            .to_client
            .send(LinkEvent::Event(ServerEvent::BotResponse(BotResponse {
                message: Some("Bonjour".to_string()),
                ..Default::default()
            })))
            .unwrap();

        assert_eq!(events.recv().await, Some(ConnectionEvent::Typing));
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::Message(ServerEvent::Typing))
        );
        assert!(matches!(
            events.recv().await,
            Some(ConnectionEvent::Message(ServerEvent::BotResponse(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_while_connected() {
        let (manager, mut events, mut servers) = spawn_with(config(), vec![Script::Accept]);
        manager.connect().await.unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        let mut server = servers.recv().await.unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(server.from_client.recv().await, Some(ClientEvent::Heartbeat));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(server.from_client.recv().await, Some(ClientEvent::Heartbeat));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_loss_reconnects_after_interval() {
        let (manager, mut events, mut servers) =
            spawn_with(config(), vec![Script::Accept, Script::Accept]);
        manager.connect().await.unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        let server = servers.recv().await.unwrap();

        server
            .to_client
            .send(LinkEvent::Closed {
                reason: "transport close".to_string(),
            })
            .unwrap();

        assert_eq!(events.recv().await, Some(ConnectionEvent::Disconnected));
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::Reconnecting { attempt: 1, max: 3 })
        );
        assert_eq!(manager.status(), ConnectionStatus::Reconnecting);

        // Not immediate: nothing before the interval elapses
        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(events.try_recv().is_err());

        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_attempts_are_bounded() {
        let (manager, mut events, mut servers) = spawn_with(
            config(),
            vec![Script::Accept, Script::Refuse, Script::Refuse, Script::Refuse],
        );
        manager.connect().await.unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        drop(servers.recv().await.unwrap());

        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let done = event == ConnectionEvent::Error(MAX_ATTEMPTS_ERROR.to_string());
            seen.push(event);
            if done {
                break;
            }
        }

        assert_eq!(
            seen,
            vec![
                ConnectionEvent::Disconnected,
                ConnectionEvent::Reconnecting { attempt: 1, max: 3 },
                ConnectionEvent::Error(CONNECT_ERROR.to_string()),
                ConnectionEvent::Reconnecting { attempt: 2, max: 3 },
                ConnectionEvent::Error(CONNECT_ERROR.to_string()),
                ConnectionEvent::Reconnecting { attempt: 3, max: 3 },
                ConnectionEvent::Error(CONNECT_ERROR.to_string()),
                ConnectionEvent::Error(MAX_ATTEMPTS_ERROR.to_string()),
            ]
        );

        // Exhausted: no further automatic attempts
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_disconnect_suppresses_reconnect() {
        let (manager, mut events, mut servers) = spawn_with(config(), vec![Script::Accept]);
        manager.connect().await.unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        let _server = servers.recv().await.unwrap();

        manager.disconnect().await;
        assert_eq!(events.recv().await, Some(ConnectionEvent::Disconnected));
        assert!(!manager.is_connected());

        // Idempotent
        manager.disconnect().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_timeout_forces_reconnect() {
        let mut config = config();
        config.liveness_timeout_secs = Some(45);
        let (manager, mut events, mut servers) =
            spawn_with(config, vec![Script::Accept, Script::Accept]);
        manager.connect().await.unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
        let _server = servers.recv().await.unwrap();

        // Ticks at 30s (quiet for 30s, fine) and 60s (quiet for 60s, dropped)
        assert_eq!(events.recv().await, Some(ConnectionEvent::Disconnected));
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::Reconnecting { attempt: 1, max: 3 })
        );
        assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));
    }
}
