//! Mutation protocol
//!
//! Server-side operations over the message log: send, edit, delete, history,
//! plus session lifecycle. Every operation requires an authenticated caller
//! identity and checks ownership before mutating.
//!
//! Degradation policy (deliberate asymmetry, do not "fix"):
//! - Send tolerates total persistence unavailability: the chat stays usable
//!   with unpersisted, temp-id results.
//! - Edit does not: a half-applied edit is worse than a hard failure, so any
//!   write failure after the precondition checks surfaces as an error.

mod session_service;

pub use session_service::SessionService;

use crate::core::errors::{ChatError, StoreError};
use crate::core::types::{Message, MessageId, Role, SendOutcome, SessionId};
use crate::responder::{generate_reply, Responder};
use crate::store::{MessageFilter, MessageStore, NewMessage};
use chrono::Utc;
use std::sync::Arc;

/// Maximum and default history page sizes.
pub const HISTORY_LIMIT_MAX: usize = 100;
pub const HISTORY_LIMIT_DEFAULT: usize = 50;

/// Opaque caller identity, bound to the request by the auth layer.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
}

impl AuthContext {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
        }
    }

    fn require(&self) -> Result<&str, ChatError> {
        if self.user_id.is_empty() {
            Err(ChatError::Unauthenticated)
        } else {
            Ok(&self.user_id)
        }
    }
}

/// Server-side chat operations.
pub struct ChatService {
    store: Arc<dyn MessageStore>,
    responder: Option<Arc<dyn Responder>>,
}

impl ChatService {
    pub fn new(store: Arc<dyn MessageStore>, responder: Option<Arc<dyn Responder>>) -> Self {
        Self { store, responder }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Send a prompt and produce the user/assistant message pair.
    ///
    /// Reply generation never fails (responder errors degrade to an echo).
    /// Persistence failure degrades to an unpersisted pair with temp ids and
    /// current timestamps: from the caller's point of view the send always
    /// succeeds.
    pub async fn send(
        &self,
        ctx: &AuthContext,
        model_tag: &str,
        prompt: &str,
        session_id: &SessionId,
    ) -> Result<SendOutcome, ChatError> {
        let user_id = ctx.require()?;
        if model_tag.is_empty() {
            return Err(ChatError::Validation("Model tag is required".into()));
        }
        if prompt.trim().is_empty() {
            return Err(ChatError::Validation("Message cannot be empty".into()));
        }

        let reply_text = generate_reply(self.responder.as_ref(), model_tag, prompt).await;

        let user_draft = NewMessage {
            user_id: user_id.to_string(),
            model_tag: model_tag.to_string(),
            session_id: session_id.clone(),
            role: Role::User,
            content: prompt.to_string(),
            in_reply_to: None,
        };

        let persisted_user = match self.store.insert_message(user_draft) {
            Ok(msg) => Some(msg),
            Err(err) => {
                tracing::warn!("Could not persist user message: {}", err);
                None
            }
        };

        let persisted_assistant = persisted_user.as_ref().and_then(|user_msg| {
            let assistant_draft = NewMessage {
                user_id: user_id.to_string(),
                model_tag: model_tag.to_string(),
                session_id: session_id.clone(),
                role: Role::Assistant,
                content: reply_text.clone(),
                in_reply_to: Some(user_msg.id.clone()),
            };
            match self.store.insert_message(assistant_draft) {
                Ok(msg) => Some(msg),
                Err(err) => {
                    tracing::warn!("Could not persist assistant message: {}", err);
                    None
                }
            }
        });

        if let (Some(user_message), Some(assistant_message)) =
            (persisted_user, persisted_assistant)
        {
            return Ok(SendOutcome {
                user_message,
                assistant_message,
            });
        }

        // Persistence degraded: serve the pair from memory with temp ids
        tracing::warn!("Message store unavailable, returning in-memory send result");
        let now = Utc::now();
        let user_message = Message {
            id: MessageId::temp(),
            user_id: user_id.to_string(),
            model_tag: model_tag.to_string(),
            session_id: session_id.clone(),
            role: Role::User,
            content: prompt.to_string(),
            created_at: now,
            seq: 0,
            in_reply_to: None,
        };
        let assistant_message = Message {
            id: MessageId::temp(),
            user_id: user_id.to_string(),
            model_tag: model_tag.to_string(),
            session_id: session_id.clone(),
            role: Role::Assistant,
            content: reply_text,
            created_at: now,
            seq: 0,
            in_reply_to: Some(user_message.id.clone()),
        };
        Ok(SendOutcome {
            user_message,
            assistant_message,
        })
    }

    /// Edit a user message and regenerate its assistant reply.
    ///
    /// Preconditions, each a distinct failure: the message exists, belongs to
    /// the caller, and is user-role. Both the message and its reply are
    /// updated in place, so the turn keeps its position in chronological
    /// reads; any write failure surfaces as an error.
    pub async fn edit_message(
        &self,
        ctx: &AuthContext,
        message_id: &MessageId,
        new_content: &str,
    ) -> Result<SendOutcome, ChatError> {
        let user_id = ctx.require()?;
        if new_content.trim().is_empty() {
            return Err(ChatError::Validation("Message cannot be empty".into()));
        }

        let original = match self.store.get_message(message_id) {
            Ok(msg) => msg,
            Err(StoreError::NotFound(_)) => {
                return Err(ChatError::NotFound(format!("message {}", message_id)))
            }
            Err(err) => return Err(err.into()),
        };
        if original.user_id != user_id {
            return Err(ChatError::Forbidden(
                "You can only edit your own messages".into(),
            ));
        }
        if original.role != Role::User {
            return Err(ChatError::Validation(
                "Only user messages can be edited".into(),
            ));
        }

        let user_message = self
            .store
            .update_message_content(message_id, new_content)?;

        let reply_text =
            generate_reply(self.responder.as_ref(), &original.model_tag, new_content).await;

        // Regenerate the reply into the superseded reply's record: a content
        // update preserves the insert sequence, so the turn never moves in
        // chronological reads. A message with no reply yet gets a fresh one.
        let assistant_message = match self.find_paired_reply(&original)? {
            Some(old_reply) => self
                .store
                .update_message_content(&old_reply.id, &reply_text)?,
            None => self.store.insert_message(NewMessage {
                user_id: user_id.to_string(),
                model_tag: original.model_tag.clone(),
                session_id: original.session_id.clone(),
                role: Role::Assistant,
                content: reply_text,
                in_reply_to: Some(user_message.id.clone()),
            })?,
        };

        Ok(SendOutcome {
            user_message,
            assistant_message,
        })
    }

    /// Delete a single message. The paired-reply removal is a client-side
    /// reconciliation concern, not enforced here.
    pub fn delete_message(
        &self,
        ctx: &AuthContext,
        message_id: &MessageId,
    ) -> Result<(), ChatError> {
        let user_id = ctx.require()?;

        let message = match self.store.get_message(message_id) {
            Ok(msg) => msg,
            Err(StoreError::NotFound(_)) => {
                return Err(ChatError::NotFound(format!("message {}", message_id)))
            }
            Err(err) => return Err(err.into()),
        };
        if message.user_id != user_id {
            return Err(ChatError::Forbidden(
                "You can only delete your own messages".into(),
            ));
        }

        self.store.delete_message(message_id)?;
        Ok(())
    }

    /// Ordered history read. Store unavailability degrades to an empty list
    /// rather than an error page.
    pub fn history(
        &self,
        ctx: &AuthContext,
        session_id: Option<&SessionId>,
        model_tag: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, ChatError> {
        let user_id = ctx.require()?;
        let limit = limit.unwrap_or(HISTORY_LIMIT_DEFAULT);
        if limit == 0 || limit > HISTORY_LIMIT_MAX {
            return Err(ChatError::Validation(format!(
                "limit must be between 1 and {}",
                HISTORY_LIMIT_MAX
            )));
        }

        let mut filter = MessageFilter::for_user(user_id).limit(limit);
        if let Some(sid) = session_id {
            filter = filter.session(sid);
        }
        if let Some(tag) = model_tag {
            filter = filter.model(tag);
        }

        match self.store.list_messages(&filter) {
            Ok(messages) => Ok(messages),
            Err(err) => {
                tracing::warn!("Store unavailable for history, returning empty: {}", err);
                Ok(Vec::new())
            }
        }
    }

    /// Locate the assistant reply paired with a user message: an
    /// `in_reply_to` match wins, else the first assistant message after it
    /// in chronological order, same model and session.
    fn find_paired_reply(&self, user_message: &Message) -> Result<Option<Message>, ChatError> {
        let filter = MessageFilter::for_user(&user_message.user_id)
            .session(&user_message.session_id)
            .model(&user_message.model_tag)
            .limit(HISTORY_LIMIT_MAX);
        let messages = self.store.list_messages(&filter)?;

        if let Some(by_ref) = messages.iter().find(|m| {
            m.role == Role::Assistant && m.in_reply_to.as_ref() == Some(&user_message.id)
        }) {
            return Ok(Some(by_ref.clone()));
        }

        Ok(messages
            .iter()
            .find(|m| m.role == Role::Assistant && m.order_key() > user_message.order_key())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ChatSession;
    use crate::responder::EchoResponder;
    use crate::store::MemoryStore;

    fn service() -> (Arc<MemoryStore>, ChatService, AuthContext, SessionId) {
        let store = Arc::new(MemoryStore::new());
        let session = ChatSession::new("u1", "gpt-4o", "New Chat");
        let session_id = session.id.clone();
        store.insert_session(session).unwrap();
        let service = ChatService::new(
            store.clone(),
            Some(Arc::new(EchoResponder::new()) as Arc<dyn Responder>),
        );
        (store, service, AuthContext::new("u1"), session_id)
    }

    #[tokio::test]
    async fn send_persists_a_paired_turn() {
        let (_store, service, ctx, session_id) = service();
        let outcome = service.send(&ctx, "gpt-4o", "Hello", &session_id).await.unwrap();

        assert!(!outcome.user_message.id.is_temp());
        assert!(!outcome.assistant_message.id.is_temp());
        assert_eq!(outcome.assistant_message.content, "You said: Hello");
        assert_eq!(
            outcome.assistant_message.in_reply_to,
            Some(outcome.user_message.id.clone())
        );
    }

    #[tokio::test]
    async fn send_degrades_to_temp_ids_when_store_is_down() {
        let (store, service, ctx, session_id) = service();
        store.set_available(false);

        let outcome = service.send(&ctx, "gpt-4o", "Hello", &session_id).await.unwrap();
        assert!(outcome.user_message.id.is_temp());
        assert!(outcome.assistant_message.id.is_temp());
        assert_eq!(outcome.assistant_message.content, "You said: Hello");
    }

    #[tokio::test]
    async fn send_rejects_empty_prompt() {
        let (_store, service, ctx, session_id) = service();
        let result = service.send(&ctx, "gpt-4o", "   ", &session_id).await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn send_requires_identity() {
        let (_store, service, _ctx, session_id) = service();
        let anon = AuthContext::new("");
        let result = service.send(&anon, "gpt-4o", "Hello", &session_id).await;
        assert!(matches!(result, Err(ChatError::Unauthenticated)));
    }

    #[tokio::test]
    async fn edit_replaces_content_and_regenerates_reply() {
        let (_store, service, ctx, session_id) = service();
        let sent = service.send(&ctx, "gpt-4o", "first", &session_id).await.unwrap();

        let edited = service
            .edit_message(&ctx, &sent.user_message.id, "second")
            .await
            .unwrap();

        assert_eq!(edited.user_message.id, sent.user_message.id);
        assert_eq!(edited.user_message.content, "second");
        assert_eq!(edited.assistant_message.content, "You said: second");
        // The reply record is reused so the turn keeps its slot
        assert_eq!(edited.assistant_message.id, sent.assistant_message.id);

        // Exactly one assistant message remains for the turn
        let history = service
            .history(&ctx, Some(&session_id), None, None)
            .unwrap();
        let assistants: Vec<_> = history.iter().filter(|m| m.role == Role::Assistant).collect();
        assert_eq!(assistants.len(), 1);
        assert_eq!(assistants[0].content, "You said: second");
    }

    #[tokio::test]
    async fn edit_keeps_the_turn_at_its_original_position() {
        let (_store, service, ctx, session_id) = service();
        let first = service.send(&ctx, "gpt-4o", "first", &session_id).await.unwrap();
        service.send(&ctx, "gpt-4o", "second", &session_id).await.unwrap();

        service
            .edit_message(&ctx, &first.user_message.id, "revised")
            .await
            .unwrap();

        let contents: Vec<_> = service
            .history(&ctx, Some(&session_id), None, None)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(
            contents,
            vec![
                "revised",
                "You said: revised",
                "second",
                "You said: second"
            ]
        );
    }

    #[tokio::test]
    async fn edit_of_assistant_message_is_bad_request() {
        let (store, service, ctx, session_id) = service();
        let sent = service.send(&ctx, "gpt-4o", "hi", &session_id).await.unwrap();

        let result = service
            .edit_message(&ctx, &sent.assistant_message.id, "tampered")
            .await;
        assert!(matches!(result, Err(ChatError::Validation(_))));

        // Log unmodified
        let unchanged = store.get_message(&sent.assistant_message.id).unwrap();
        assert_eq!(unchanged.content, "You said: hi");
    }

    #[tokio::test]
    async fn edit_fails_hard_when_store_is_down() {
        let (store, service, ctx, session_id) = service();
        let sent = service.send(&ctx, "gpt-4o", "hi", &session_id).await.unwrap();
        store.set_available(false);

        let result = service
            .edit_message(&ctx, &sent.user_message.id, "changed")
            .await;
        assert!(matches!(result, Err(ChatError::Persistence(_))));
    }

    #[tokio::test]
    async fn edit_of_missing_message_is_not_found() {
        let (_store, service, ctx, _session_id) = service();
        let result = service
            .edit_message(&ctx, &MessageId::new(), "anything")
            .await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn foreign_messages_are_forbidden() {
        let (_store, service, ctx, session_id) = service();
        let sent = service.send(&ctx, "gpt-4o", "mine", &session_id).await.unwrap();

        let other = AuthContext::new("u2");
        let edit = service
            .edit_message(&other, &sent.user_message.id, "stolen")
            .await;
        assert!(matches!(edit, Err(ChatError::Forbidden(_))));

        let delete = service.delete_message(&other, &sent.user_message.id);
        assert!(matches!(delete, Err(ChatError::Forbidden(_))));

        // Message remains in the log
        let history = service.history(&ctx, Some(&session_id), None, None).unwrap();
        assert!(history.iter().any(|m| m.id == sent.user_message.id));
    }

    #[tokio::test]
    async fn delete_removes_only_the_target() {
        let (_store, service, ctx, session_id) = service();
        let sent = service.send(&ctx, "gpt-4o", "hi", &session_id).await.unwrap();

        service.delete_message(&ctx, &sent.user_message.id).unwrap();

        let history = service.history(&ctx, Some(&session_id), None, None).unwrap();
        assert!(!history.iter().any(|m| m.id == sent.user_message.id));
        // The paired reply is untouched server-side
        assert!(history.iter().any(|m| m.id == sent.assistant_message.id));
    }

    #[tokio::test]
    async fn history_degrades_to_empty_when_store_is_down() {
        let (store, service, ctx, session_id) = service();
        service.send(&ctx, "gpt-4o", "hi", &session_id).await.unwrap();
        store.set_available(false);

        let history = service.history(&ctx, Some(&session_id), None, None).unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn history_rejects_out_of_range_limit() {
        let (_store, service, ctx, session_id) = service();
        let result = service.history(&ctx, Some(&session_id), None, Some(101));
        assert!(matches!(result, Err(ChatError::Validation(_))));
        let result = service.history(&ctx, Some(&session_id), None, Some(0));
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }
}
