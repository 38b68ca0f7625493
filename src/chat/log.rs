//! Ordered, session-scoped message log.
//!
//! The log is insertion-ordered and never reordered: edits mutate in place,
//! deletes remove a single entry, regeneration replaces the reply that
//! directly follows its user message. Ids are `msg-N` with a per-log counter
//! that resets on clear and import.

use crate::clock::unix_ms;
use crate::error::ChatError;
use crate::types::{ChatConfig, ChatMessage, ImportedMessage, Role};

pub struct ChatLog {
    messages: Vec<ChatMessage>,
    next_id: u64,
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatLog {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_id: 1,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn alloc_id(&mut self) -> String {
        let id = format!("msg-{}", self.next_id);
        self.next_id += 1;
        id
    }

    /// Append a message to the end of the log and return it.
    pub fn append(&mut self, role: Role, content: String, image: Option<String>) -> &ChatMessage {
        let id = self.alloc_id();
        let at = self.messages.len();
        self.messages.push(ChatMessage {
            id,
            role,
            content,
            image,
            created_at: unix_ms(),
        });
        &self.messages[at]
    }

    /// Insert a message directly after position `idx` and return it.
    pub fn insert_after(&mut self, idx: usize, role: Role, content: String) -> &ChatMessage {
        let id = self.alloc_id();
        let at = (idx + 1).min(self.messages.len());
        self.messages.insert(
            at,
            ChatMessage {
                id,
                role,
                content,
                image: None,
                created_at: unix_ms(),
            },
        );
        &self.messages[at]
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Replace a message's content (and image, when a new one is supplied).
    /// Id, role and position never change.
    pub fn update(
        &mut self,
        id: &str,
        content: String,
        image: Option<String>,
    ) -> Result<&ChatMessage, ChatError> {
        let idx = self
            .position(id)
            .ok_or_else(|| ChatError::MessageNotFound(id.to_string()))?;
        let msg = &mut self.messages[idx];
        msg.content = content;
        if image.is_some() {
            msg.image = image;
        }
        Ok(&self.messages[idx])
    }

    /// Remove a message. Returns whether anything was removed; paired
    /// messages are left alone.
    pub fn delete(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.messages.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove the assistant reply directly following position `idx`, if any.
    pub fn remove_reply_after(&mut self, idx: usize) -> bool {
        if idx + 1 < self.messages.len() && self.messages[idx + 1].role == Role::Assistant {
            self.messages.remove(idx + 1);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.next_id = 1;
    }

    /// Replace the log wholesale. Every imported message gets a fresh id;
    /// missing timestamps are stamped with the import time.
    pub fn import(&mut self, imported: Vec<ImportedMessage>) {
        self.clear();
        let now = unix_ms();
        for msg in imported {
            let id = self.alloc_id();
            self.messages.push(ChatMessage {
                id,
                role: msg.role,
                content: msg.content,
                image: msg.image,
                created_at: msg.created_at.unwrap_or(now),
            });
        }
    }

    /// True when some user message in the log has exactly this content.
    /// Guards streaming submits against double-appending a resubmitted prompt.
    pub fn has_user_message(&self, content: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.role == Role::User && m.content == content)
    }

    /// Context window over everything before position `idx`: the last
    /// `2 * max_history_turns` messages, or nothing when history is off.
    /// The message at `idx` itself (the prompt being answered) is excluded —
    /// it is always dispatched as the explicit final turn.
    pub fn window_before(&self, idx: usize, config: &ChatConfig) -> &[ChatMessage] {
        if !config.history_enabled {
            return &[];
        }
        let idx = idx.min(self.messages.len());
        let take = (config.max_history_turns * 2).min(idx);
        &self.messages[idx - take..idx]
    }

    /// Context window anchored at the end of the log.
    pub fn context_window(&self, config: &ChatConfig) -> &[ChatMessage] {
        self.window_before(self.messages.len(), config)
    }
}
