//! Conversation store
//!
//! Owns the conversation list and the active thread. The store is a plain
//! struct driven from a single task (see [`crate::client`]): UI operations
//! and connection events are applied in arrival order, so the duplicate
//! windows below are evaluated against a consistent thread.
//!
//! Time-based behaviour (deferred sends, the reply timeout, debounced
//! persistence) is exposed as [`ConversationStore::next_deadline`] and
//! [`ConversationStore::on_tick`] rather than spawned timers.

pub mod consultation;
pub mod pending;

pub use consultation::STORAGE_KEY;
pub use pending::{PendingMessage, PendingMessages};

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::ConversationConfig;
use crate::connection::ChatConnection;
use crate::db::KvStore;
use crate::error::Result;
use crate::stage::{hints_analysis, triggers_analysis, KeywordClassifier, StageClassifier};
use crate::transport::{BotResponse, ServerEvent, UserMessage};
use crate::types::{
    generate_message_id, ConnectionStatus, ConsultationStage, Conversation, Message,
};
use consultation::{
    connection_error_text, medical_title, server_error_text, welcome_text, OFFLINE_NOTICE,
    RESPONSE_TIMEOUT_NOTICE,
};

/// Fixed inputs of a store.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub timing: ConversationConfig,
    /// Sent as `userId` with every message
    pub user_id: String,
    /// Named in connection error messages
    pub server_url: String,
}

/// What happened to a [`ConversationStore::send_message`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input
    Ignored,
    /// Repeat of the previous user message inside the duplicate window
    Duplicate,
    /// A reply is pending; retried after the busy delay
    Deferred,
    /// Appended and handed to the connection
    Sent,
    /// Appended and buffered until the next connection
    Queued,
}

/// Observable state for UI callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSnapshot {
    /// Most recently updated first
    pub conversations: Vec<Conversation>,
    pub current_conversation_id: Option<String>,
    /// Thread of the current conversation
    pub messages: Vec<Message>,
    pub is_typing: bool,
    pub connection_status: ConnectionStatus,
    pub current_consultation_stage: Option<ConsultationStage>,
    pub is_analyzing: bool,
    pub pending_count: usize,
}

impl ChatSnapshot {
    pub fn current_conversation(&self) -> Option<&Conversation> {
        let id = self.current_conversation_id.as_deref()?;
        self.conversations.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone)]
struct DeferredSend {
    text: String,
    due: DateTime<Utc>,
}

pub struct ConversationStore {
    settings: StoreSettings,
    conversations: Vec<Conversation>,
    current_id: Option<String>,
    is_typing: bool,
    /// Start of the current wait for a reply
    typing_since: Option<DateTime<Utc>>,
    connection_status: ConnectionStatus,
    pending: PendingMessages,
    deferred: Vec<DeferredSend>,
    persist_due: Option<DateTime<Utc>>,
    classifier: Box<dyn StageClassifier>,
    storage: Box<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl ConversationStore {
    /// Restore persisted conversations, or start a fresh consultation.
    pub fn open(settings: StoreSettings, storage: Box<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_classifier(
            settings,
            storage,
            clock,
            Box::new(KeywordClassifier::french_medical()),
        )
    }

    pub fn with_classifier(
        settings: StoreSettings,
        storage: Box<dyn KvStore>,
        clock: Arc<dyn Clock>,
        classifier: Box<dyn StageClassifier>,
    ) -> Self {
        let mut store = Self {
            settings,
            conversations: Vec::new(),
            current_id: None,
            is_typing: false,
            typing_since: None,
            connection_status: ConnectionStatus::Disconnected,
            pending: PendingMessages::new(),
            deferred: Vec::new(),
            persist_due: None,
            classifier,
            storage,
            clock,
        };
        store.load();
        store
    }

    fn load(&mut self) {
        match self.read_persisted() {
            Ok(Some(mut conversations)) if !conversations.is_empty() => {
                conversations.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
                tracing::info!(count = conversations.len(), "Restored conversations");
                self.current_id = Some(conversations[0].id.clone());
                self.conversations = conversations;
            }
            Ok(_) => {
                tracing::info!("No stored conversations, starting a consultation");
                self.start_medical_consultation(None);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Stored conversations unreadable, starting fresh");
                self.start_medical_consultation(None);
            }
        }
    }

    fn read_persisted(&self) -> Result<Option<Vec<Conversation>>> {
        let Some(raw) = self.storage.get(STORAGE_KEY)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    // ============================================
    // Observable state
    // ============================================

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn current_conversation_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn current(&self) -> Option<&Conversation> {
        let id = self.current_id.as_deref()?;
        self.conversation(id)
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        self.current().map(|c| c.messages.as_slice()).unwrap_or(&[])
    }

    pub fn is_typing(&self) -> bool {
        self.is_typing
    }

    pub fn is_analyzing(&self) -> bool {
        self.current().map_or(false, |c| c.is_analyzing)
    }

    pub fn current_consultation_stage(&self) -> Option<ConsultationStage> {
        self.current().map(|c| c.consultation_stage)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    pub fn pending(&self) -> &PendingMessages {
        &self.pending
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            conversations: self.conversations.clone(),
            current_conversation_id: self.current_id.clone(),
            messages: self.messages().to_vec(),
            is_typing: self.is_typing,
            connection_status: self.connection_status,
            current_consultation_stage: self.current_consultation_stage(),
            is_analyzing: self.is_analyzing(),
            pending_count: self.pending.len(),
        }
    }

    // ============================================
    // Operations
    // ============================================

    /// New consultation with the generic welcome message.
    pub fn start_new_conversation(&mut self) -> String {
        self.start_medical_consultation(None)
    }

    /// New consultation, made current. The seed only shapes the welcome
    /// text; it is never transmitted.
    pub fn start_medical_consultation(&mut self, seed_disease: Option<&str>) -> String {
        let now = self.clock.now();
        self.clear_typing();
        self.deferred.clear();

        let welcome = Message::synthetic(welcome_text(seed_disease), now);
        let conversation = Conversation::new(welcome, now);
        let id = conversation.id.clone();
        tracing::info!(conversation_id = %id, seeded = seed_disease.is_some(), "Starting consultation");

        self.conversations.insert(0, conversation);
        self.current_id = Some(id.clone());
        self.persist_now();
        id
    }

    /// Make `id` current. Unknown ids are ignored.
    pub fn switch_conversation(&mut self, id: &str) -> bool {
        if self.conversation(id).is_none() {
            tracing::debug!(conversation_id = id, "Switch to unknown conversation ignored");
            return false;
        }
        self.current_id = Some(id.to_string());
        self.clear_typing();
        true
    }

    pub async fn send_message(&mut self, text: &str, connection: &dyn ChatConnection) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Ignored;
        }
        let now = self.clock.now();

        let (conversation_id, stage) = {
            let Some(conversation) = self.current() else {
                return SendOutcome::Ignored;
            };
            if let Some(last) = conversation.last_message() {
                if last.is_user()
                    && last.text == text
                    && now.signed_duration_since(last.timestamp)
                        < self.settings.timing.duplicate_send_window()
                {
                    tracing::debug!("Identical message sent moments ago, ignored");
                    return SendOutcome::Duplicate;
                }
            }
            (conversation.id.clone(), conversation.consultation_stage)
        };

        if self.is_typing {
            tracing::debug!("Reply pending, deferring message");
            self.deferred.push(DeferredSend {
                text: text.to_string(),
                due: now + self.settings.timing.busy_retry_delay(),
            });
            return SendOutcome::Deferred;
        }

        let message = Message::user(text, now);
        self.append_message(&conversation_id, message.clone());

        if !connection.is_connected() {
            tracing::info!(message_id = %message.id, "Offline, message queued");
            self.pending.insert(conversation_id.clone(), message);
            self.append_message(&conversation_id, Message::synthetic(OFFLINE_NOTICE, now));
            connection.reconnect();
            return SendOutcome::Queued;
        }

        self.is_typing = true;
        self.typing_since = Some(now);
        if triggers_analysis(text) || stage == ConsultationStage::AdditionalSymptoms {
            self.set_analyzing(&conversation_id, true);
        }

        let outgoing = self.outgoing(&conversation_id, &message);
        if connection.send_message(outgoing).await {
            SendOutcome::Sent
        } else {
            tracing::warn!(message_id = %message.id, "Connection refused message, queued");
            self.pending.insert(conversation_id.clone(), message);
            self.clear_typing();
            self.set_analyzing(&conversation_id, false);
            SendOutcome::Queued
        }
    }

    /// Remove a conversation. Deleting the current one selects the most
    /// recent remaining conversation, or starts a fresh consultation.
    pub fn delete_conversation(&mut self, id: &str) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        if self.conversations.len() == before {
            return false;
        }
        tracing::info!(conversation_id = id, "Conversation deleted");

        if self.current_id.as_deref() == Some(id) {
            self.clear_typing();
            self.deferred.clear();
            match self.conversations.first() {
                Some(next) => self.current_id = Some(next.id.clone()),
                None => {
                    self.current_id = None;
                    self.start_medical_consultation(None);
                    return true;
                }
            }
        }
        self.persist_now();
        true
    }

    /// Drop every conversation and the stored copy, then start fresh.
    pub fn clear_all_conversations(&mut self) {
        tracing::info!(count = self.conversations.len(), "Clearing all conversations");
        self.conversations.clear();
        self.current_id = None;
        self.persist_due = None;
        if let Err(e) = self.storage.remove(STORAGE_KEY) {
            tracing::warn!(error = %e, "Failed to erase stored conversations");
        }
        self.start_medical_consultation(None);
    }

    // ============================================
    // Connection events
    // ============================================

    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        self.connection_status = status;
    }

    /// Transmit every pending message once, then forget them.
    pub async fn on_connected(&mut self, connection: &dyn ChatConnection) {
        let pending = self.pending.drain();
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Sending pending messages");
        }
        for entry in pending {
            let outgoing = self.outgoing(&entry.conversation_id, &entry.message);
            if !connection.send_message(outgoing).await {
                tracing::warn!(message_id = %entry.message.id, "Pending message could not be sent");
            }
        }
    }

    pub fn on_disconnected(&mut self) {
        self.clear_typing();
        if let Some(id) = self.current_id.clone() {
            self.set_analyzing(&id, false);
        }
    }

    /// Transport failure: surfaced as a bot message naming the server.
    pub fn on_transport_error(&mut self, error: &str) {
        tracing::warn!(error, "Connection error");
        self.on_disconnected();
        let text = connection_error_text(error, &self.settings.server_url);
        self.append_to_current(Message::synthetic(text, self.clock.now()));
    }

    pub fn on_typing(&mut self) {
        self.is_typing = true;
        self.typing_since = Some(self.clock.now());

        let analysing = self
            .current()
            .and_then(Conversation::last_message)
            .map_or(false, |m| hints_analysis(&m.text));
        if analysing {
            if let Some(id) = self.current_id.clone() {
                self.set_analyzing(&id, true);
            }
        }
    }

    pub fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::BotResponse(response) => {
                self.on_bot_response(response);
            }
            // Delivered separately as a connection typing event
            ServerEvent::Typing => {}
            ServerEvent::Error { message } => {
                tracing::warn!(message = %message, "Server reported an error");
                self.on_disconnected();
                self.append_to_current(Message::synthetic(
                    server_error_text(&message),
                    self.clock.now(),
                ));
            }
            ServerEvent::Connection { message } => {
                tracing::info!(message = message.as_deref().unwrap_or(""), "Server connection notice");
            }
            ServerEvent::Heartbeat => {}
        }
    }

    /// Append a bot reply unless it duplicates one already in the thread.
    /// Returns whether it was appended.
    pub fn on_bot_response(&mut self, response: BotResponse) -> bool {
        let now = self.clock.now();
        let Some(text) = response.message.filter(|m| !m.trim().is_empty()) else {
            tracing::debug!("bot_response without text ignored");
            self.clear_typing();
            return false;
        };

        let target = match response
            .conversation_id
            .filter(|id| self.conversation(id).is_some())
        {
            Some(id) => id,
            None => match self.current_id.clone() {
                Some(id) => id,
                None => return false,
            },
        };

        let window = self.settings.timing.duplicate_reply_window();
        let duplicate = self.conversation(&target).map_or(false, |c| {
            c.messages.iter().any(|m| {
                response.message_id.as_deref() == Some(m.id.as_str())
                    || (m.is_bot()
                        && m.text == text
                        && now.signed_duration_since(m.timestamp).abs() < window)
            })
        });
        if duplicate {
            tracing::debug!(message_id = ?response.message_id, "Duplicate bot message ignored");
            self.clear_typing();
            return false;
        }

        let completed = self.classifier.is_completion(&text);
        let stage = if completed {
            ConsultationStage::Completed
        } else {
            self.classifier.classify(&text)
        };
        if let Some(conversation) = self.conversation_mut(&target) {
            conversation.consultation_stage = stage;
            if completed {
                conversation.is_analyzing = false;
            }
        }

        let id = response.message_id.unwrap_or_else(generate_message_id);
        let timestamp = response.timestamp.unwrap_or(now);
        self.append_message(&target, Message::bot(id, text, timestamp));
        self.clear_typing();
        true
    }

    // ============================================
    // Timers
    // ============================================

    /// Earliest instant at which [`on_tick`](Self::on_tick) has work to do.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        [
            self.persist_due,
            self.deferred.iter().map(|d| d.due).min(),
            self.response_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Run whatever is due: debounced writes, the reply timeout and
    /// deferred sends.
    pub async fn on_tick(&mut self, connection: &dyn ChatConnection) {
        let now = self.clock.now();

        if self.persist_due.is_some_and(|due| due <= now) {
            self.persist_now();
        }

        if self.response_deadline().is_some_and(|deadline| deadline <= now) {
            tracing::warn!("No reply from server in time");
            self.on_disconnected();
            self.append_to_current(Message::synthetic(RESPONSE_TIMEOUT_NOTICE, now));
        }

        let (due, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.deferred).into_iter().partition(|d| d.due <= now);
        self.deferred = waiting;
        for deferred in due {
            self.send_message(&deferred.text, connection).await;
        }
    }

    /// Write any debounced change now.
    pub fn flush(&mut self) {
        if self.persist_due.is_some() {
            self.persist_now();
        }
    }

    fn response_deadline(&self) -> Option<DateTime<Utc>> {
        if !self.is_typing {
            return None;
        }
        let timeout = self.settings.timing.response_timeout()?;
        self.typing_since.map(|since| since + timeout)
    }

    // ============================================
    // Internals
    // ============================================

    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    fn outgoing(&self, conversation_id: &str, message: &Message) -> UserMessage {
        UserMessage {
            user_id: self.settings.user_id.clone(),
            message: message.text.clone(),
            conversation_id: conversation_id.to_string(),
            message_id: message.id.clone(),
            timestamp: self.clock.now(),
        }
    }

    fn append_to_current(&mut self, message: Message) {
        if let Some(id) = self.current_id.clone() {
            self.append_message(&id, message);
        }
    }

    fn append_message(&mut self, conversation_id: &str, message: Message) {
        let now = self.clock.now();
        let Some(conversation) = self.conversation_mut(conversation_id) else {
            return;
        };
        conversation.messages.push(message);
        conversation.last_updated = now;
        if conversation.has_placeholder_title() {
            if let Some(title) = conversation
                .first_user_message()
                .map(|m| medical_title(&m.text))
            {
                conversation.title = title;
            }
        }

        self.conversations
            .sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        self.schedule_persist(now);
    }

    fn set_analyzing(&mut self, conversation_id: &str, analyzing: bool) {
        let now = self.clock.now();
        if let Some(conversation) = self.conversation_mut(conversation_id) {
            if conversation.is_analyzing != analyzing {
                conversation.is_analyzing = analyzing;
                self.schedule_persist(now);
            }
        }
    }

    fn clear_typing(&mut self) {
        self.is_typing = false;
        self.typing_since = None;
    }

    fn schedule_persist(&mut self, now: DateTime<Utc>) {
        self.persist_due = Some(now + self.settings.timing.persist_debounce());
    }

    fn persist_now(&mut self) {
        self.persist_due = None;
        let json = match serde_json::to_string(&self.conversations) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode conversations");
                return;
            }
        };
        match self.storage.set(STORAGE_KEY, &json) {
            Ok(()) => tracing::debug!(count = self.conversations.len(), "Conversations persisted"),
            Err(e) => tracing::warn!(error = %e, "Failed to persist conversations"),
        }
    }
}
