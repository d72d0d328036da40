//! Core domain types for medchat
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Message** | A single chat turn, written by the patient or by the bot |
//! | **Conversation** | A persisted thread of messages; also called a consultation |
//! | **Stage** | Advisory position of a consultation in the bot's script, inferred from bot text |
//! | **Pending message** | A patient message buffered while the connection was down |
//!
//! Conversations serialize with the camelCase field names used by the
//! mobile client (`isBot`, `lastUpdated`, `consultationStage`, ...) so an
//! exported collection can be loaded by either side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================
// Message
// ============================================

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    User,
    Bot,
}

impl Origin {
    pub fn is_bot(&self) -> bool {
        matches!(self, Origin::Bot)
    }
}

/// Persists [`Origin`] as the `isBot` boolean.
mod origin_flag {
    use super::Origin;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(origin: &Origin, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(origin.is_bot())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Origin, D::Error> {
        Ok(if bool::deserialize(deserializer)? {
            Origin::Bot
        } else {
            Origin::User
        })
    }
}

/// A single chat turn. Immutable once appended to a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Client-generated for user turns, server-supplied for bot turns
    pub id: String,
    /// UTF-8 content, may contain `=== heading ===` markup
    pub text: String,
    #[serde(rename = "isBot", with = "origin_flag")]
    pub origin: Origin,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// A user turn with a fresh unique id.
    pub fn user(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: generate_message_id(),
            text: text.into(),
            origin: Origin::User,
            timestamp,
        }
    }

    /// A bot turn with the given id.
    pub fn bot(id: impl Into<String>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            origin: Origin::Bot,
            timestamp,
        }
    }

    /// A client-side bot turn (welcome text, errors, offline notices).
    pub fn synthetic(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::bot(generate_message_id(), text, timestamp)
    }

    pub fn is_bot(&self) -> bool {
        self.origin.is_bot()
    }

    pub fn is_user(&self) -> bool {
        !self.is_bot()
    }
}

/// Unique id for client-created messages (`msg_<uuid>`).
pub fn generate_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

// ============================================
// Consultation stage
// ============================================

/// Where a consultation is in the bot's script.
///
/// Advisory only: inferred from bot text by a
/// [`StageClassifier`](crate::stage::StageClassifier), never sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStage {
    #[default]
    Initial,
    DiseaseSelected,
    AskingSymptoms,
    AdditionalSymptoms,
    Analysis,
    Completed,
    Unknown,
}

impl ConsultationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsultationStage::Initial => "initial",
            ConsultationStage::DiseaseSelected => "disease_selected",
            ConsultationStage::AskingSymptoms => "asking_symptoms",
            ConsultationStage::AdditionalSymptoms => "additional_symptoms",
            ConsultationStage::Analysis => "analysis",
            ConsultationStage::Completed => "completed",
            ConsultationStage::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ConsultationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConsultationStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(ConsultationStage::Initial),
            "disease_selected" => Ok(ConsultationStage::DiseaseSelected),
            "asking_symptoms" => Ok(ConsultationStage::AskingSymptoms),
            "additional_symptoms" => Ok(ConsultationStage::AdditionalSymptoms),
            "analysis" => Ok(ConsultationStage::Analysis),
            "completed" => Ok(ConsultationStage::Completed),
            "unknown" => Ok(ConsultationStage::Unknown),
            _ => Err(format!("unknown consultation stage: {}", s)),
        }
    }
}

// ============================================
// Conversation
// ============================================

/// Title used until the first user message names the consultation.
pub const PLACEHOLDER_TITLE: &str = "🩺 Nouvelle Consultation";

/// An ordered thread of messages plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    /// Chronological, append-only
    pub messages: Vec<Message>,
    /// Sort key for conversation lists (most recent first)
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub consultation_stage: ConsultationStage,
    #[serde(default)]
    pub is_analyzing: bool,
}

impl Conversation {
    /// A fresh consultation holding only its welcome message.
    pub fn new(welcome: Message, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_conversation_id(),
            title: PLACEHOLDER_TITLE.to_string(),
            messages: vec![welcome],
            last_updated: now,
            consultation_stage: ConsultationStage::Initial,
            is_analyzing: false,
        }
    }

    pub fn contains_message(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn first_user_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_user())
    }

    pub fn has_placeholder_title(&self) -> bool {
        self.title == PLACEHOLDER_TITLE
    }
}

/// Time-ordered unique conversation id.
pub fn generate_conversation_id() -> String {
    Uuid::now_v7().to_string()
}

// ============================================
// Connection status
// ============================================

/// Lifecycle of the single connection to the chat backend. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    #[default]
    Disconnected,
    Reconnecting,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Reconnecting => "reconnecting",
        }
    }

    /// Label shown next to the conversation header
    pub fn display_label(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "Connexion...",
            ConnectionStatus::Connected => "Connecté",
            ConnectionStatus::Disconnected => "Déconnecté",
            ConnectionStatus::Reconnecting => "Reconnexion...",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
