//! In-memory message store
//!
//! Backs the in-process chat mode and the test suite. Concurrent maps via
//! dashmap; a single atomic sequence counter provides the tie-break ordering.
//! The availability switch lets tests exercise the degraded-persistence paths
//! without a real outage.

use super::{order_and_truncate, MessageFilter, MessageStore, NewMessage};
use crate::core::errors::StoreError;
use crate::core::types::{ChatSession, Message, MessageId, SessionId};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct MemoryStore {
    messages: DashMap<String, Message>,
    sessions: DashMap<String, ChatSession>,
    seq: AtomicU64,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            messages: DashMap::new(),
            sessions: DashMap::new(),
            seq: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a transient outage: while unavailable, every operation
    /// returns `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl MessageStore for MemoryStore {
    fn insert_message(&self, draft: NewMessage) -> Result<Message, StoreError> {
        self.check_available()?;
        let message = Message {
            id: MessageId::new(),
            user_id: draft.user_id,
            model_tag: draft.model_tag,
            session_id: draft.session_id,
            role: draft.role,
            content: draft.content,
            created_at: Utc::now(),
            seq: self.next_seq(),
            in_reply_to: draft.in_reply_to,
        };
        self.messages
            .insert(message.id.as_str().to_string(), message.clone());
        let _ = self.touch_session(&message.session_id);
        Ok(message)
    }

    fn get_message(&self, id: &MessageId) -> Result<Message, StoreError> {
        self.check_available()?;
        self.messages
            .get(id.as_str())
            .map(|m| m.clone())
            .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))
    }

    fn update_message_content(
        &self,
        id: &MessageId,
        content: &str,
    ) -> Result<Message, StoreError> {
        self.check_available()?;
        let mut entry = self
            .messages
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
        entry.content = content.to_string();
        // Edit time; the insert sequence keeps the message at its position
        entry.created_at = Utc::now();
        Ok(entry.clone())
    }

    fn delete_message(&self, id: &MessageId) -> Result<(), StoreError> {
        self.check_available()?;
        self.messages
            .remove(id.as_str())
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))
    }

    fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>, StoreError> {
        self.check_available()?;
        let matched: Vec<Message> = self
            .messages
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(order_and_truncate(matched, filter.limit))
    }

    fn insert_session(&self, session: ChatSession) -> Result<ChatSession, StoreError> {
        self.check_available()?;
        self.sessions
            .insert(session.id.as_str().to_string(), session.clone());
        Ok(session)
    }

    fn get_session(&self, id: &SessionId) -> Result<ChatSession, StoreError> {
        self.check_available()?;
        self.sessions
            .get(id.as_str())
            .map(|s| s.clone())
            .ok_or_else(|| StoreError::NotFound(format!("session {}", id)))
    }

    fn rename_session(&self, id: &SessionId, title: &str) -> Result<ChatSession, StoreError> {
        self.check_available()?;
        let mut entry = self
            .sessions
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("session {}", id)))?;
        entry.title = title.to_string();
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        self.check_available()?;
        self.sessions
            .remove(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("session {}", id)))?;
        // Cascade: messages are owned by their session
        self.messages.retain(|_, msg| &msg.session_id != id);
        Ok(())
    }

    fn list_sessions(
        &self,
        user_id: &str,
        model_tag: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatSession>, StoreError> {
        self.check_available()?;
        let mut sessions: Vec<ChatSession> = self
            .sessions
            .iter()
            .filter(|entry| {
                let s = entry.value();
                s.user_id == user_id && model_tag.map_or(true, |tag| s.model_tag == tag)
            })
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    fn touch_session(&self, id: &SessionId) -> Result<(), StoreError> {
        self.check_available()?;
        if let Some(mut entry) = self.sessions.get_mut(id.as_str()) {
            entry.updated_at = Utc::now();
        }
        Ok(())
    }
}
