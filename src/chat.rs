//! Spectator chat stream.
//!
//! A second append-only stream running parallel to the event log: join
//! announcements, periodic movement callouts, agent chatter, and world
//! events. It is never routed back into agent logic; spectators consume it
//! with the same restartable `stream_since` discipline as turn records.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a chat message, used for overlay styling downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// An agent entered the world.
    Join,
    /// Periodic movement callout.
    Movement,
    /// Free-form agent chatter.
    Chat,
    /// Bridge-originated notices (checkpoints, disconnects).
    System,
    /// Ambient world events.
    Event,
}

/// One message in the chat stream. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Strictly monotonic, gap-free sequence number (starts at 1).
    pub sequence: u64,
    /// Arbiter tick when the message was sent.
    pub tick: u64,
    /// Agent name, or `"world"` for system/event messages.
    pub author: String,
    /// Message text.
    pub text: String,
    /// Message classification.
    pub kind: ChatKind,
    /// When the message was appended.
    pub sent_at: DateTime<Utc>,
}

/// Append-only, in-memory chat log.
///
/// Uncapped: the original overlay trimmed to its last 30 lines, but trimming
/// here would break spectator reconnects. Display caps belong to consumers.
/// Cloning yields another handle to the same log.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    messages: Arc<RwLock<Vec<ChatMessage>>>,
}

impl ChatLog {
    /// Creates an empty chat log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message, assigning the next sequence number.
    pub fn append(
        &self,
        tick: u64,
        author: impl Into<String>,
        text: impl Into<String>,
        kind: ChatKind,
    ) -> ChatMessage {
        let mut messages = match self.messages.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let message = ChatMessage {
            sequence: messages.last().map_or(0, |m| m.sequence) + 1,
            tick,
            author: author.into(),
            text: text.into(),
            kind,
            sent_at: Utc::now(),
        };
        messages.push(message.clone());
        message
    }

    /// The most recent `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ChatMessage> {
        self.messages
            .read()
            .map(|m| m.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Sequence number of the newest message, 0 when empty.
    pub fn last_sequence(&self) -> u64 {
        self.messages
            .read()
            .ok()
            .and_then(|m| m.last().map(|msg| msg.sequence))
            .unwrap_or(0)
    }

    /// Number of messages held.
    pub fn len(&self) -> usize {
        self.messages.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Returns true if nothing has been said.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazy stream of messages with sequence greater than `since`.
    #[must_use]
    pub fn stream_since(&self, since: u64) -> ChatStream {
        ChatStream {
            log: self.clone(),
            next: since + 1,
        }
    }

    fn get(&self, sequence: u64) -> Option<ChatMessage> {
        let messages = self.messages.read().ok()?;
        let first = messages.first()?.sequence;
        let idx = sequence.checked_sub(first)? as usize;
        messages.get(idx).cloned()
    }
}

/// Iterator over chat messages from a starting sequence number.
pub struct ChatStream {
    log: ChatLog,
    next: u64,
}

impl Iterator for ChatStream {
    type Item = ChatMessage;

    fn next(&mut self) -> Option<Self::Item> {
        let message = self.log.get(self.next)?;
        self.next += 1;
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_contiguous_sequences() {
        let chat = ChatLog::new();
        let a = chat.append(0, "world", "Koolie the Explorer enters", ChatKind::Join);
        let b = chat.append(1, "Koolie", "hello!", ChatKind::Chat);

        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(chat.len(), 2);
    }

    #[test]
    fn recent_returns_tail_oldest_first() {
        let chat = ChatLog::new();
        for i in 0..5 {
            chat.append(i, "A", format!("msg {i}"), ChatKind::Chat);
        }

        let tail = chat.recent(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text, "msg 3");
        assert_eq!(tail[1].text, "msg 4");
    }

    #[test]
    fn stream_since_resumes_without_gaps() {
        let chat = ChatLog::new();
        for i in 0..4 {
            chat.append(i, "A", format!("msg {i}"), ChatKind::Event);
        }

        let seqs: Vec<u64> = chat.stream_since(2).map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn history_is_not_capped() {
        let chat = ChatLog::new();
        for i in 0..100 {
            chat.append(i, "A", "spam", ChatKind::Chat);
        }
        assert_eq!(chat.len(), 100);
        assert_eq!(chat.last_sequence(), 100);
    }
}
