//! # medchat-core
//!
//! Core library for medchat - a chat client for a medical consultation
//! assistant served over Socket.IO.
//!
//! This library provides:
//! - Domain types for messages, conversations and consultation stages
//! - A Socket.IO transport (WebSocket with long-polling fallback)
//! - A connection manager with heartbeat and bounded fixed-delay reconnect
//! - A conversation store with de-duplication, stage inference and
//!   debounced persistence to SQLite
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows in one direction per side:
//! - **Outbound:** UI → [`ChatHandle`] → [`ConversationStore`] → [`ConnectionManager`] → server
//! - **Inbound:** server → [`ConnectionManager`] → [`ConnectionEvent`] → [`ConversationStore`] → [`ChatSnapshot`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use medchat_core::{ChatClient, Config, SqliteKvStore};
//!
//! # async fn run() -> medchat_core::Result<()> {
//! let config = Config::load()?;
//! let storage = SqliteKvStore::open(&config.resolved_database_path())?;
//! let chat = ChatClient::start(&config, Box::new(storage))?;
//!
//! chat.send_message("asthme").await?;
//! let snapshot = chat.wait_for(|s| !s.is_typing).await?;
//! println!("{} messages", snapshot.messages.len());
//! chat.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use client::{ChatClient, ChatHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use connection::{ChatConnection, ConnectionEvent, ConnectionManager};
pub use db::{KvStore, MemoryKvStore, SqliteKvStore};
pub use error::{Error, Result};
pub use stage::{KeywordClassifier, StageClassifier};
pub use store::{ChatSnapshot, ConversationStore, SendOutcome, StoreSettings};
pub use types::*;

// Public modules
pub mod client;
pub mod clock;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod format;
pub mod logging;
pub mod stage;
pub mod store;
pub mod transport;
pub mod types;
