//! File-backed message store
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/
//! ├── sessions/          # one JSON file per session
//! │   └── {id}.json
//! └── messages/          # one JSON file per message
//!     └── {id}.json
//! ```
//!
//! Sequence numbers are recovered on startup by scanning existing messages,
//! so ordering stays monotone across process restarts.

use super::{order_and_truncate, MessageFilter, MessageStore, NewMessage};
use crate::core::errors::StoreError;
use crate::core::types::{ChatSession, Message, MessageId, SessionId};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct FileStore {
    root: PathBuf,
    seq: AtomicU64,
}

impl FileStore {
    /// Open (or initialize) a store rooted at the given directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("sessions"))?;
        std::fs::create_dir_all(root.join("messages"))?;

        let store = Self {
            root,
            seq: AtomicU64::new(0),
        };
        let max_seq = store
            .read_all_messages()?
            .iter()
            .map(|m| m.seq)
            .max()
            .unwrap_or(0);
        store.seq.store(max_seq, Ordering::SeqCst);
        Ok(store)
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn messages_dir(&self) -> PathBuf {
        self.root.join("messages")
    }

    fn session_path(&self, id: &SessionId) -> PathBuf {
        self.sessions_dir().join(format!("{}.json", id))
    }

    fn message_path(&self, id: &MessageId) -> PathBuf {
        self.messages_dir().join(format!("{}.json", id))
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn write_message(&self, message: &Message) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(message)?;
        std::fs::write(self.message_path(&message.id), content)?;
        Ok(())
    }

    fn write_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(session)?;
        std::fs::write(self.session_path(&session.id), content)?;
        Ok(())
    }

    fn read_all_messages(&self) -> Result<Vec<Message>, StoreError> {
        let mut messages = Vec::new();
        for entry in std::fs::read_dir(self.messages_dir())?.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)?;
                match serde_json::from_str::<Message>(&content) {
                    Ok(msg) => messages.push(msg),
                    Err(err) => {
                        tracing::warn!("Skipping unreadable message file {:?}: {}", path, err)
                    }
                }
            }
        }
        Ok(messages)
    }
}

impl MessageStore for FileStore {
    fn insert_message(&self, draft: NewMessage) -> Result<Message, StoreError> {
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
        self.write_message(&message)?;
        let _ = self.touch_session(&message.session_id);
        Ok(message)
    }

    fn get_message(&self, id: &MessageId) -> Result<Message, StoreError> {
        let path = self.message_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("message {}", id)));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn update_message_content(
        &self,
        id: &MessageId,
        content: &str,
    ) -> Result<Message, StoreError> {
        let mut message = self.get_message(id)?;
        message.content = content.to_string();
        // Edit time; the insert sequence keeps the message at its position
        message.created_at = Utc::now();
        self.write_message(&message)?;
        Ok(message)
    }

    fn delete_message(&self, id: &MessageId) -> Result<(), StoreError> {
        let path = self.message_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("message {}", id)));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>, StoreError> {
        let matched: Vec<Message> = self
            .read_all_messages()?
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect();
        Ok(order_and_truncate(matched, filter.limit))
    }

    fn insert_session(&self, session: ChatSession) -> Result<ChatSession, StoreError> {
        self.write_session(&session)?;
        Ok(session)
    }

    fn get_session(&self, id: &SessionId) -> Result<ChatSession, StoreError> {
        let path = self.session_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("session {}", id)));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn rename_session(&self, id: &SessionId, title: &str) -> Result<ChatSession, StoreError> {
        let mut session = self.get_session(id)?;
        session.title = title.to_string();
        session.updated_at = Utc::now();
        self.write_session(&session)?;
        Ok(session)
    }

    fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        let path = self.session_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("session {}", id)));
        }
        std::fs::remove_file(path)?;
        // Cascade: remove every message belonging to this session
        for msg in self.read_all_messages()? {
            if &msg.session_id == id {
                let _ = std::fs::remove_file(self.message_path(&msg.id));
            }
        }
        Ok(())
    }

    fn list_sessions(
        &self,
        user_id: &str,
        model_tag: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatSession>, StoreError> {
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(self.sessions_dir())?.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)?;
                if let Ok(session) = serde_json::from_str::<ChatSession>(&content) {
                    if session.user_id == user_id
                        && model_tag.map_or(true, |tag| session.model_tag == tag)
                    {
                        sessions.push(session);
                    }
                }
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    fn touch_session(&self, id: &SessionId) -> Result<(), StoreError> {
        if let Ok(mut session) = self.get_session(id) {
            session.updated_at = Utc::now();
            self.write_session(&session)?;
        }
        Ok(())
    }
}
