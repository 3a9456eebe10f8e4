//! Session lifecycle operations
//!
//! Sessions scope message history per user and model. Ownership checks report
//! NotFound for foreign sessions rather than Forbidden, so callers cannot
//! probe for other users' session ids.

use crate::core::errors::{ChatError, StoreError};
use crate::core::types::{ChatSession, SessionId};
use crate::protocol::AuthContext;
use crate::store::MessageStore;
use std::sync::Arc;

/// Default title for a freshly created session.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

pub struct SessionService {
    store: Arc<dyn MessageStore>,
}

impl SessionService {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Create a session for the caller on the given model.
    pub fn create_session(
        &self,
        ctx: &AuthContext,
        model_tag: &str,
        title: Option<&str>,
    ) -> Result<ChatSession, ChatError> {
        let user_id = ctx.require()?;
        if model_tag.is_empty() {
            return Err(ChatError::Validation("Model tag is required".into()));
        }
        let title = match title {
            Some(t) if !t.trim().is_empty() => t,
            _ => DEFAULT_SESSION_TITLE,
        };

        let session = ChatSession::new(user_id, model_tag, title);
        Ok(self.store.insert_session(session)?)
    }

    /// Sessions for the caller, most recently updated first. Store
    /// unavailability degrades to an empty list.
    pub fn list_sessions(
        &self,
        ctx: &AuthContext,
        model_tag: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatSession>, ChatError> {
        let user_id = ctx.require()?;
        match self.store.list_sessions(user_id, model_tag, limit) {
            Ok(sessions) => Ok(sessions),
            Err(err) => {
                tracing::warn!("Store unavailable for session list, returning empty: {}", err);
                Ok(Vec::new())
            }
        }
    }

    /// Rename a session owned by the caller.
    pub fn rename_session(
        &self,
        ctx: &AuthContext,
        session_id: &SessionId,
        title: &str,
    ) -> Result<ChatSession, ChatError> {
        let user_id = ctx.require()?;
        if title.trim().is_empty() {
            return Err(ChatError::Validation("Title cannot be empty".into()));
        }
        self.owned_session(user_id, session_id)?;
        Ok(self.store.rename_session(session_id, title)?)
    }

    /// Delete a session and all its messages.
    pub fn delete_session(
        &self,
        ctx: &AuthContext,
        session_id: &SessionId,
    ) -> Result<(), ChatError> {
        let user_id = ctx.require()?;
        self.owned_session(user_id, session_id)?;
        self.store.delete_session(session_id)?;
        Ok(())
    }

    fn owned_session(&self, user_id: &str, session_id: &SessionId) -> Result<(), ChatError> {
        let session = match self.store.get_session(session_id) {
            Ok(s) => s,
            Err(StoreError::NotFound(_)) => {
                return Err(ChatError::NotFound(format!("session {}", session_id)))
            }
            Err(err) => return Err(err.into()),
        };
        if session.user_id != user_id {
            // Foreign sessions look exactly like missing ones
            return Err(ChatError::NotFound(format!("session {}", session_id)));
        }
        Ok(())
    }
}
