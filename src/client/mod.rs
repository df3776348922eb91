//! Client-side consumers of the chat and voice endpoints.

pub mod chat;
pub mod voice;

pub use chat::ChatClient;
pub use voice::{MIN_RECORDING_BYTES, MediaSlot, VoiceClient};

use crate::models::{ChatMessage, Role};

/// Conversation as the user sees it: user and assistant entries only
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push(message);
    }

    /// Text of the last assistant entry, if any
    pub fn last_reply(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .and_then(|m| m.content.as_deref())
    }

    fn append_to_last(&mut self, fragment: &str) {
        if let Some(last) = self.entries.last_mut() {
            last.content.get_or_insert_with(String::new).push_str(fragment);
        }
    }

    fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_last_reply() {
        let mut t = Transcript::new();
        assert!(t.last_reply().is_none());
        t.push(ChatMessage::user("hola"));
        t.push(ChatMessage::assistant(""));
        t.append_to_last("Hola");
        t.append_to_last(", ¿qué tal?");
        assert_eq!(t.last_reply(), Some("Hola, ¿qué tal?"));

        t.truncate(1);
        assert_eq!(t.len(), 1);
        assert!(t.last_reply().is_none());
    }
}
