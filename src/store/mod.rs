//! Message log storage
//!
//! The message log is an ordered key-value store of messages keyed by id,
//! queryable by user/session/model, with create/update/delete. "Unavailable"
//! is a valid transient state (`StoreError::Unavailable`), and the mutation
//! protocol decides per-operation whether that degrades gracefully or fails.
//!
//! Two backends:
//! - [`MemoryStore`]: concurrent in-memory maps, used by the in-process chat
//!   mode and by tests (it can simulate an outage).
//! - [`FileStore`]: JSON files under a root directory, one per session and
//!   message, for a durable single-machine deployment.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::core::errors::StoreError;
use crate::core::types::{ChatSession, Message, MessageId, Role, SessionId};

/// Query shape for ordered history reads.
///
/// Results are always in insert order (`seq`). The limit keeps the newest
/// `limit` messages, matching "last N turns of the conversation".
#[derive(Debug, Clone)]
pub struct MessageFilter {
    pub user_id: String,
    pub session_id: Option<SessionId>,
    pub model_tag: Option<String>,
    pub limit: usize,
}

impl MessageFilter {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: None,
            model_tag: None,
            limit: 50,
        }
    }

    pub fn session(mut self, session_id: &SessionId) -> Self {
        self.session_id = Some(session_id.clone());
        self
    }

    pub fn model(mut self, model_tag: &str) -> Self {
        self.model_tag = Some(model_tag.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn matches(&self, msg: &Message) -> bool {
        if msg.user_id != self.user_id {
            return false;
        }
        if let Some(ref sid) = self.session_id {
            if &msg.session_id != sid {
                return false;
            }
        }
        if let Some(ref tag) = self.model_tag {
            if &msg.model_tag != tag {
                return false;
            }
        }
        true
    }
}

/// A message about to be persisted. The store assigns id, timestamp, and
/// sequence number.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: String,
    pub model_tag: String,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub in_reply_to: Option<MessageId>,
}

/// The message log collaborator.
///
/// Implementations assign `seq` monotonically at insert and preserve it on
/// update, so chronological reads are total-ordered under timestamp
/// collisions and stable across edits.
pub trait MessageStore: Send + Sync {
    // ----- messages -----

    /// Persist a message, assigning server id, timestamp, and sequence.
    fn insert_message(&self, draft: NewMessage) -> Result<Message, StoreError>;

    fn get_message(&self, id: &MessageId) -> Result<Message, StoreError>;

    /// Replace a message's content and stamp the edit time. The insert
    /// sequence is preserved; the message keeps its chronological position.
    fn update_message_content(
        &self,
        id: &MessageId,
        content: &str,
    ) -> Result<Message, StoreError>;

    fn delete_message(&self, id: &MessageId) -> Result<(), StoreError>;

    /// Ordered read: insert order, newest `limit` kept.
    fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>, StoreError>;

    // ----- sessions -----

    fn insert_session(&self, session: ChatSession) -> Result<ChatSession, StoreError>;

    fn get_session(&self, id: &SessionId) -> Result<ChatSession, StoreError>;

    fn rename_session(&self, id: &SessionId, title: &str) -> Result<ChatSession, StoreError>;

    /// Delete a session and all messages belonging to it.
    fn delete_session(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Sessions for a user, most recently updated first.
    fn list_sessions(
        &self,
        user_id: &str,
        model_tag: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatSession>, StoreError>;

    /// Bump a session's `updated_at`. Best-effort; callers ignore failures.
    fn touch_session(&self, id: &SessionId) -> Result<(), StoreError>;
}

/// Sort messages chronologically and keep the newest `limit`.
fn order_and_truncate(mut messages: Vec<Message>, limit: usize) -> Vec<Message> {
    messages.sort_by_key(|m| m.order_key());
    if messages.len() > limit {
        let drop = messages.len() - limit;
        messages.drain(0..drop);
    }
    messages
}
