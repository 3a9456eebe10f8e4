//! Client-side chat orchestration
//!
//! Drives the reconciliation engine against the mutation protocol: applies
//! the optimistic edit first, issues the request, and on the way back either
//! reconciles the server result in place or rolls back and refetches. Client
//! preconditions (model selected, session bound, no switch in flight) are
//! enforced before any protocol call is made.

use crate::core::client_state::ClientState;
use crate::core::errors::ChatError;
use crate::core::reconcile::ConversationView;
use crate::core::types::{Message, MessageId, SessionId, ViewKey};
use crate::protocol::{AuthContext, ChatService, SessionService};
use std::sync::{Arc, Mutex};

pub struct ChatClient {
    chat: Arc<ChatService>,
    sessions: Arc<SessionService>,
    ctx: AuthContext,
    state: Arc<Mutex<ClientState>>,
    view: ConversationView,
}

impl ChatClient {
    pub fn new(
        chat: Arc<ChatService>,
        sessions: Arc<SessionService>,
        ctx: AuthContext,
        state: Arc<Mutex<ClientState>>,
    ) -> Self {
        Self {
            chat,
            sessions,
            ctx,
            state,
            view: ConversationView::new(),
        }
    }

    pub fn state(&self) -> &Arc<Mutex<ClientState>> {
        &self.state
    }

    pub fn messages(&self) -> &[Message] {
        self.view.messages()
    }

    pub fn is_loading(&self) -> bool {
        self.view.is_loading()
    }

    /// The (model, session) pair the view should be scoped to right now.
    fn current_key(&self) -> Option<ViewKey> {
        let state = self.state.lock().expect("client state poisoned");
        let model = state.selected_model()?;
        let session = state.current_session(None)?;
        Some(ViewKey::new(model, session))
    }

    /// Resolve the conversation context after startup or a model change:
    /// auto-bind the most recently updated session for the selected model if
    /// none is bound, then load its history.
    pub async fn activate(&mut self) -> Result<(), ChatError> {
        let selected = {
            let state = self.state.lock().expect("client state poisoned");
            state.selected_model().map(|s| s.to_string())
        };
        let Some(model) = selected else {
            self.view.begin_context(None);
            return Ok(());
        };

        let bound = {
            let state = self.state.lock().expect("client state poisoned");
            state.current_session(Some(&model)).cloned()
        };
        if bound.is_none() {
            let recent = self.sessions.list_sessions(&self.ctx, Some(&model), 1)?;
            if let Some(session) = recent.into_iter().next() {
                let mut state = self.state.lock().expect("client state poisoned");
                state.set_current_session(Some(session.id));
            }
        }

        self.view.begin_context(self.current_key());
        self.refresh()
    }

    /// Authoritative refetch for the current context. Applied only if the
    /// view still points at the key the fetch was issued for.
    pub fn refresh(&mut self) -> Result<(), ChatError> {
        let Some(key) = self.current_key() else {
            self.view.begin_context(None);
            return Ok(());
        };
        let messages = self.chat.history(
            &self.ctx,
            Some(&key.session_id),
            Some(&key.model_tag),
            None,
        )?;
        self.view.apply_fetch(&key, messages);
        Ok(())
    }

    /// Send a prompt with optimistic rendering.
    ///
    /// Rejected locally, before any protocol call, when no model is
    /// selected, a model switch is in flight, no session is bound, or a
    /// send is already pending.
    pub async fn send(&mut self, prompt: &str) -> Result<(), ChatError> {
        let (model, session) = {
            let state = self.state.lock().expect("client state poisoned");
            if state.is_model_switching() {
                return Err(ChatError::Validation("Model switch in progress".into()));
            }
            let model = state
                .selected_model()
                .ok_or_else(|| ChatError::Validation("No model selected".into()))?
                .to_string();
            let session = state
                .current_session(None)
                .ok_or_else(|| ChatError::Validation("No active chat session".into()))?
                .clone();
            (model, session)
        };

        if self
            .view
            .begin_send(&self.ctx.user_id, prompt)
            .is_none()
        {
            return Err(ChatError::Validation("A send is already in flight".into()));
        }

        match self.chat.send(&self.ctx, &model, prompt, &session).await {
            Ok(outcome) => {
                self.view.complete_send(&outcome);
                let mut state = self.state.lock().expect("client state poisoned");
                state.clear_draft();
                Ok(())
            }
            Err(err) => {
                // Roll back the placeholder, then resync with server truth
                self.view.fail_send();
                let _ = self.refresh();
                Err(err)
            }
        }
    }

    /// Edit a message; on any failure the local state is treated as unknown
    /// and resynced rather than partially repaired.
    pub async fn edit(&mut self, id: &MessageId, new_content: &str) -> Result<(), ChatError> {
        match self.chat.edit_message(&self.ctx, id, new_content).await {
            Ok(outcome) => {
                if !self.view.apply_edit(&outcome) {
                    self.refresh()?;
                }
                Ok(())
            }
            Err(err) => {
                let _ = self.refresh();
                Err(err)
            }
        }
    }

    /// Delete a message and, client-side, its paired assistant reply.
    pub async fn delete(&mut self, id: &MessageId) -> Result<(), ChatError> {
        match self.chat.delete_message(&self.ctx, id) {
            Ok(()) => {
                if !self.view.apply_delete(id) {
                    self.refresh()?;
                }
                Ok(())
            }
            Err(err) => {
                let _ = self.refresh();
                Err(err)
            }
        }
    }

    /// Bind a different session (or none) for the selected model and reload.
    pub fn switch_session(&mut self, session_id: Option<SessionId>) -> Result<(), ChatError> {
        {
            let mut state = self.state.lock().expect("client state poisoned");
            state.set_current_session(session_id);
        }
        self.view.begin_context(self.current_key());
        self.refresh()
    }

    /// Create a session on the selected model, bind it, and load it.
    pub async fn new_session(&mut self, title: Option<&str>) -> Result<SessionId, ChatError> {
        let model = {
            let state = self.state.lock().expect("client state poisoned");
            state
                .selected_model()
                .ok_or_else(|| ChatError::Validation("No model selected".into()))?
                .to_string()
        };
        let session = self.sessions.create_session(&self.ctx, &model, title)?;
        let id = session.id.clone();
        self.switch_session(Some(id.clone()))?;
        Ok(id)
    }

    /// Delete a session. If it was the current one, clear the current
    /// pointer and the rendered view.
    pub fn drop_session(&mut self, session_id: &SessionId) -> Result<(), ChatError> {
        self.sessions.delete_session(&self.ctx, session_id)?;
        let was_current = {
            let state = self.state.lock().expect("client state poisoned");
            state.current_session(None) == Some(session_id)
        };
        if was_current {
            self.switch_session(None)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::responder::{EchoResponder, Responder};
    use crate::store::{MemoryStore, MessageStore};

    fn client() -> (Arc<MemoryStore>, ChatClient) {
        let store = Arc::new(MemoryStore::new());
        let chat = Arc::new(ChatService::new(
            store.clone(),
            Some(Arc::new(EchoResponder::new()) as Arc<dyn Responder>),
        ));
        let sessions = Arc::new(SessionService::new(store.clone()));
        let state = Arc::new(Mutex::new(ClientState::new()));
        let client = ChatClient::new(chat, sessions, AuthContext::new("u1"), state);
        (store, client)
    }

    #[tokio::test]
    async fn send_without_session_is_rejected_before_any_call() {
        let (store, mut client) = client();
        {
            let mut state = client.state().lock().unwrap();
            state.set_selected_model("gpt-4o");
        }
        client.activate().await.unwrap();

        let result = client.send("Hello").await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
        assert!(client.messages().is_empty());
        // Nothing reached the store
        let filter = crate::store::MessageFilter::for_user("u1");
        assert!(store.list_messages(&filter).unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_while_switching_is_rejected() {
        let (_store, mut client) = client();
        {
            let mut state = client.state().lock().unwrap();
            state.set_selected_model("gpt-4o");
            state.set_model_switching(true);
        }
        let result = client.send("Hello").await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn full_send_flow_reconciles_without_reorder() {
        let (_store, mut client) = client();
        {
            let mut state = client.state().lock().unwrap();
            state.set_selected_model("gpt-4o");
        }
        client.activate().await.unwrap();
        client.new_session(None).await.unwrap();

        client.send("Hello").await.unwrap();
        client.send("How are you?").await.unwrap();

        let contents: Vec<_> = client.messages().iter().map(|m| m.content.clone()).collect();
        assert_eq!(
            contents,
            vec![
                "Hello",
                "You said: Hello",
                "How are you?",
                "You said: How are you?"
            ]
        );
        assert!(client.messages().iter().all(|m| !m.id.is_temp()));

        // Refetched history is identical to the reconciled view
        let before: Vec<_> = client
            .messages()
            .iter()
            .map(|m| (m.id.clone(), m.content.clone(), m.role))
            .collect();
        client.refresh().unwrap();
        let after: Vec<_> = client
            .messages()
            .iter()
            .map(|m| (m.id.clone(), m.content.clone(), m.role))
            .collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn edit_round_trip_keeps_position() {
        let (_store, mut client) = client();
        {
            let mut state = client.state().lock().unwrap();
            state.set_selected_model("gpt-4o");
        }
        client.activate().await.unwrap();
        client.new_session(None).await.unwrap();
        client.send("first").await.unwrap();
        client.send("second").await.unwrap();

        let target = client.messages()[0].id.clone();
        client.edit(&target, "revised").await.unwrap();

        let msgs = client.messages();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].content, "revised");
        assert_eq!(msgs[1].content, "You said: revised");
        assert_eq!(msgs[2].content, "second");

        // Server agrees after refetch
        client.refresh().unwrap();
        let users: Vec<_> = client
            .messages()
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(users, vec!["revised", "second"]);
    }

    #[tokio::test]
    async fn delete_removes_the_pair_locally() {
        let (_store, mut client) = client();
        {
            let mut state = client.state().lock().unwrap();
            state.set_selected_model("gpt-4o");
        }
        client.activate().await.unwrap();
        client.new_session(None).await.unwrap();
        client.send("doomed").await.unwrap();
        client.send("kept").await.unwrap();

        let target = client.messages()[0].id.clone();
        client.delete(&target).await.unwrap();

        let contents: Vec<_> = client.messages().iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["kept", "You said: kept"]);
    }

    #[tokio::test]
    async fn failed_edit_resyncs_with_server_truth() {
        let (_store, mut client) = client();
        {
            let mut state = client.state().lock().unwrap();
            state.set_selected_model("gpt-4o");
        }
        client.activate().await.unwrap();
        client.new_session(None).await.unwrap();
        client.send("hi").await.unwrap();

        // Editing the assistant message is a bad request; view stays valid
        let assistant_id = client.messages()[1].id.clone();
        let result = client.edit(&assistant_id, "tampered").await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
        assert_eq!(client.messages()[1].content, "You said: hi");
    }

    #[tokio::test]
    async fn dropping_current_session_clears_the_view() {
        let (_store, mut client) = client();
        {
            let mut state = client.state().lock().unwrap();
            state.set_selected_model("gpt-4o");
        }
        client.activate().await.unwrap();
        let sid = client.new_session(None).await.unwrap();
        client.send("hi").await.unwrap();

        client.drop_session(&sid).unwrap();
        assert!(client.messages().is_empty());
        let state = client.state().lock().unwrap();
        assert!(state.current_session(None).is_none());
    }

    #[tokio::test]
    async fn activate_binds_most_recent_session() {
        let (store, mut client) = client();
        let sessions = SessionService::new(store.clone() as Arc<dyn MessageStore>);
        let ctx = AuthContext::new("u1");
        sessions.create_session(&ctx, "gpt-4o", Some("older")).unwrap();
        let newer = sessions.create_session(&ctx, "gpt-4o", Some("newer")).unwrap();
        sessions.rename_session(&ctx, &newer.id, "newest").unwrap();

        {
            let mut state = client.state().lock().unwrap();
            state.set_selected_model("gpt-4o");
        }
        client.activate().await.unwrap();

        let state = client.state().lock().unwrap();
        assert_eq!(state.current_session(None), Some(&newer.id));
    }
}
