//! Chat session driver
//!
//! [`ChatClient`] wires a [`ConnectionManager`] to a [`ConversationStore`]
//! and runs both behind one task. UI callers hold a [`ChatHandle`]: commands
//! go in over a channel, state comes back as a [`ChatSnapshot`] on a watch
//! channel. Commands, connection events and timers are handled one at a
//! time in arrival order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::connection::{ChatConnection, ConnectionEvent, ConnectionManager};
use crate::db::KvStore;
use crate::error::{Error, Result};
use crate::store::{ChatSnapshot, ConversationStore, SendOutcome, StoreSettings};
use crate::transport::{Connector, Endpoint, SocketIoConnector};
use crate::types::ConnectionStatus;

enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<SendOutcome>,
    },
    StartConsultation {
        seed: Option<String>,
        reply: oneshot::Sender<String>,
    },
    Switch {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Delete {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    ClearAll {
        reply: oneshot::Sender<()>,
    },
    Reconnect {
        reply: oneshot::Sender<()>,
    },
    Settle {
        reply: oneshot::Sender<ConnectionStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running chat session.
#[derive(Clone, Debug)]
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ChatSnapshot>,
}

impl ChatHandle {
    pub async fn send_message(&self, text: impl Into<String>) -> Result<SendOutcome> {
        let text = text.into();
        self.request(|reply| Command::Send { text, reply }).await
    }

    pub async fn start_new_conversation(&self) -> Result<String> {
        self.start_medical_consultation(None).await
    }

    /// Start a consultation. A seed only changes the welcome text; send the
    /// finding afterwards with [`send_message`](Self::send_message).
    pub async fn start_medical_consultation(&self, seed: Option<String>) -> Result<String> {
        self.request(|reply| Command::StartConsultation { seed, reply })
            .await
    }

    pub async fn switch_conversation(&self, id: impl Into<String>) -> Result<bool> {
        let id = id.into();
        self.request(|reply| Command::Switch { id, reply }).await
    }

    pub async fn delete_conversation(&self, id: impl Into<String>) -> Result<bool> {
        let id = id.into();
        self.request(|reply| Command::Delete { id, reply }).await
    }

    pub async fn clear_all_conversations(&self) -> Result<()> {
        self.request(|reply| Command::ClearAll { reply }).await
    }

    /// Retry the connection now; no-op while connected.
    pub async fn reconnect(&self) -> Result<()> {
        self.request(|reply| Command::Reconnect { reply }).await
    }

    /// Flush storage, close the connection and stop the driver.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Wait for the first connection attempt to succeed or fail, for at
    /// most `limit`. Returns the connection status at that point.
    pub async fn wait_until_settled(&self, limit: Duration) -> Result<ConnectionStatus> {
        match tokio::time::timeout(limit, self.request(|reply| Command::Settle { reply })).await {
            Ok(status) => status,
            Err(_) => Ok(self.snapshot().connection_status),
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&ChatSnapshot) -> bool,
    ) -> Result<ChatSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(predicate).await.map_err(|_| Error::Closed)?;
        Ok(snapshot.clone())
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(make(reply)).map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }
}

pub struct ChatClient {
    store: ConversationStore,
    connection: Arc<dyn ChatConnection>,
    clock: Arc<dyn Clock>,
    snapshot: watch::Sender<ChatSnapshot>,
    /// Set once any connection attempt has succeeded or failed
    settled: bool,
    settle_waiters: Vec<oneshot::Sender<ConnectionStatus>>,
}

impl ChatClient {
    /// Build the production session from configuration and start
    /// connecting in the background. Must run inside a tokio runtime.
    pub fn start(config: &Config, storage: Box<dyn KvStore>) -> Result<ChatHandle> {
        config.validate()?;
        let endpoint = Endpoint::parse(&config.server.url, &config.server.socketio_path)?;
        let connector = Arc::new(SocketIoConnector::new(config.server.transports.clone())?);
        Ok(Self::start_with(
            config,
            endpoint,
            connector,
            storage,
            Arc::new(SystemClock),
        ))
    }

    /// Same as [`start`](Self::start) with explicit collaborators.
    pub fn start_with(
        config: &Config,
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        storage: Box<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> ChatHandle {
        let (manager, events) = ConnectionManager::spawn(
            config.connection.clone(),
            config.server.connect_timeout(),
            endpoint,
            connector,
        );
        let settings = StoreSettings {
            timing: config.conversation.clone(),
            user_id: config.server.resolve_user_id(),
            server_url: config.server.url.clone(),
        };
        let store = ConversationStore::open(settings, storage, clock.clone());
        let status = manager.subscribe_status();
        manager.reconnect();

        let (handle, _task) = Self::spawn(store, Arc::new(manager), events, status, clock);
        handle
    }

    /// Run a driver over an existing store and connection.
    pub fn spawn(
        store: ConversationStore,
        connection: Arc<dyn ChatConnection>,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
        status: watch::Receiver<ConnectionStatus>,
        clock: Arc<dyn Clock>,
    ) -> (ChatHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(store.snapshot());

        let client = ChatClient {
            store,
            connection,
            clock,
            snapshot: snapshot_tx,
            settled: false,
            settle_waiters: Vec::new(),
        };
        let task = tokio::spawn(client.run(command_rx, events, status));

        (
            ChatHandle {
                commands: command_tx,
                snapshot: snapshot_rx,
            },
            task,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
        mut status: watch::Receiver<ConnectionStatus>,
    ) {
        self.store.set_connection_status(*status.borrow_and_update());
        self.publish();

        loop {
            let wait = self.time_to_next_deadline();
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.close().await;
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some(event) = events.recv() => self.on_connection_event(event).await,
                Ok(()) = status.changed() => {
                    let current = *status.borrow_and_update();
                    self.store.set_connection_status(current);
                }
                _ = sleep_for(wait) => self.store.on_tick(self.connection.as_ref()).await,
            }
            self.publish();
        }
        tracing::debug!("Chat driver stopped");
    }

    /// Returns `false` once the driver should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Send { text, reply } => {
                let outcome = self
                    .store
                    .send_message(&text, self.connection.as_ref())
                    .await;
                self.respond(reply, outcome);
            }
            Command::StartConsultation { seed, reply } => {
                let id = self.store.start_medical_consultation(seed.as_deref());
                self.respond(reply, id);
            }
            Command::Switch { id, reply } => {
                let switched = self.store.switch_conversation(&id);
                self.respond(reply, switched);
            }
            Command::Delete { id, reply } => {
                let deleted = self.store.delete_conversation(&id);
                self.respond(reply, deleted);
            }
            Command::ClearAll { reply } => {
                self.store.clear_all_conversations();
                self.respond(reply, ());
            }
            Command::Reconnect { reply } => {
                if !self.connection.is_connected() {
                    tracing::info!("Manual reconnect requested");
                    self.connection.reconnect();
                }
                self.respond(reply, ());
            }
            Command::Settle { reply } => {
                if self.settled || self.connection.is_connected() {
                    self.respond(reply, self.store.connection_status());
                } else {
                    self.settle_waiters.push(reply);
                }
            }
            Command::Shutdown { reply } => {
                self.close().await;
                self.respond(reply, ());
                return false;
            }
        }
        true
    }

    /// Publish before replying so callers observe their own changes.
    fn respond<T>(&self, reply: oneshot::Sender<T>, value: T) {
        self.publish();
        let _ = reply.send(value);
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        let settles = matches!(
            event,
            ConnectionEvent::Connected | ConnectionEvent::Disconnected | ConnectionEvent::Error(_)
        );
        match event {
            ConnectionEvent::Connected => {
                self.store.set_connection_status(ConnectionStatus::Connected);
                self.store.on_connected(self.connection.as_ref()).await;
            }
            ConnectionEvent::Disconnected => self.store.on_disconnected(),
            ConnectionEvent::Reconnecting { attempt, max } => {
                tracing::debug!(attempt, max, "Reconnecting");
            }
            ConnectionEvent::Error(message) => self.store.on_transport_error(&message),
            ConnectionEvent::Typing => self.store.on_typing(),
            ConnectionEvent::Message(event) => self.store.on_server_event(event),
        }
        self.store.set_connection_status(self.connection.status());

        if settles {
            self.settled = true;
            let status = self.store.connection_status();
            for waiter in std::mem::take(&mut self.settle_waiters) {
                self.respond(waiter, status);
            }
        }
    }

    async fn close(&mut self) {
        self.store.flush();
        self.connection.disconnect().await;
        self.store.set_connection_status(self.connection.status());
    }

    fn time_to_next_deadline(&self) -> Option<Duration> {
        let deadline = self.store.next_deadline()?;
        Some(
            deadline
                .signed_duration_since(self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO),
        )
    }

    fn publish(&self) {
        let next = self.store.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}
