//! Canonical type definitions for the chat domain
//!
//! This module is the single source of truth for the message and session
//! shapes used across the protocol, store, and reconciliation layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix reserved for locally-generated optimistic ids.
///
/// A message carrying such an id has never been persisted: it is either an
/// optimistic placeholder awaiting reconciliation, or the result of a send
/// that degraded to in-memory because the store was unreachable.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Message identifier. Server-assigned ids are uuids; client-minted ids
/// carry the reserved `temp-` prefix so the two can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Mint a server-side id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Mint an optimistic placeholder id.
    pub fn temp() -> Self {
        Self(format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    /// Whether this id was locally generated and never persisted.
    pub fn is_temp(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single chat message.
///
/// `content` and `created_at` change on edit; `seq` is assigned once at
/// insert and survives edits, so ordering by `(seq, created_at)` keeps an
/// edited message at its original position in every chronological read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub user_id: String,
    pub model_tag: String,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Store-assigned insert sequence, stable across edits; 0 for
    /// never-persisted messages.
    #[serde(default)]
    pub seq: u64,
    /// For assistant messages, the user message this replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
}

impl Message {
    /// Build an optimistic user placeholder for a prompt about to be sent.
    pub fn placeholder(
        user_id: &str,
        model_tag: &str,
        session_id: &SessionId,
        content: &str,
    ) -> Self {
        Self {
            id: MessageId::temp(),
            user_id: user_id.to_string(),
            model_tag: model_tag.to_string(),
            session_id: session_id.clone(),
            role: Role::User,
            content: content.to_string(),
            created_at: Utc::now(),
            seq: 0,
            in_reply_to: None,
        }
    }

    /// Sort key used everywhere a chronological order is needed. Position is
    /// the insert-time sequence, so a content update (which refreshes
    /// `created_at`) never moves a message; the timestamp only breaks ties
    /// between never-persisted messages.
    pub fn order_key(&self) -> (u64, DateTime<Utc>) {
        (self.seq, self.created_at)
    }
}

/// A titled conversation scoped to one user and one model tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub user_id: String,
    pub model_tag: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(user_id: &str, model_tag: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            user_id: user_id.to_string(),
            model_tag: model_tag.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of a send or edit: the user turn and its assistant reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub user_message: Message,
    pub assistant_message: Message,
}

/// The (model, session) pair a fetch or rendered view is scoped to.
///
/// Every outstanding history fetch is tagged with the key it was issued for;
/// a completion whose key no longer matches the current view is discarded
/// rather than applied, so a stale response can never leak across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewKey {
    pub model_tag: String,
    pub session_id: SessionId,
}

impl ViewKey {
    pub fn new(model_tag: &str, session_id: &SessionId) -> Self {
        Self {
            model_tag: model_tag.to_string(),
            session_id: session_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_ids_carry_reserved_prefix() {
        let temp = MessageId::temp();
        assert!(temp.is_temp());
        assert!(temp.as_str().starts_with("temp-"));

        let real = MessageId::new();
        assert!(!real.is_temp());
    }

    #[test]
    fn placeholder_is_user_role_and_temp() {
        let session = SessionId::new();
        let msg = Message::placeholder("u1", "gpt-4o", &session, "hello");
        assert!(msg.id.is_temp());
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.seq, 0);
    }

    #[test]
    fn order_key_breaks_timestamp_ties_by_seq() {
        let session = SessionId::new();
        let mut a = Message::placeholder("u1", "m", &session, "a");
        let mut b = Message::placeholder("u1", "m", &session, "b");
        b.created_at = a.created_at;
        a.seq = 1;
        b.seq = 2;
        assert!(a.order_key() < b.order_key());
    }

    #[test]
    fn order_key_ignores_timestamp_refreshes() {
        let session = SessionId::new();
        let mut a = Message::placeholder("u1", "m", &session, "a");
        let mut b = Message::placeholder("u1", "m", &session, "b");
        a.seq = 1;
        b.seq = 2;
        // An edit stamps a fresh timestamp; position must not change
        a.created_at = b.created_at + chrono::Duration::seconds(60);
        assert!(a.order_key() < b.order_key());
    }
}
