//! Messages written while offline, waiting for the next connection.

use crate::types::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    /// Conversation the message was written in
    pub conversation_id: String,
    pub message: Message,
}

/// Pending set keyed by client message id, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct PendingMessages {
    entries: Vec<PendingMessage>,
}

impl PendingMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message. A message with the same id replaces the earlier entry
    /// in place.
    pub fn insert(&mut self, conversation_id: impl Into<String>, message: Message) {
        let entry = PendingMessage {
            conversation_id: conversation_id.into(),
            message,
        };
        match self
            .entries
            .iter_mut()
            .find(|e| e.message.id == entry.message.id)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.iter().any(|e| e.message.id == message_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every entry, oldest first, leaving the set empty.
    pub fn drain(&mut self) -> Vec<PendingMessage> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_insertion_order_and_drain() {
        let now = Utc::now();
        let first = Message::user("asthme", now);
        let second = Message::user("oui", now);

        let mut pending = PendingMessages::new();
        pending.insert("c1", first.clone());
        pending.insert("c2", second.clone());
        pending.insert("c1", first.clone());

        assert_eq!(pending.len(), 2);
        assert!(pending.contains(&second.id));

        let drained = pending.drain();
        assert_eq!(drained[0].message.id, first.id);
        assert_eq!(drained[1].conversation_id, "c2");
        assert!(pending.is_empty());
    }
}
