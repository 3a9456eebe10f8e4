//! Reconciliation engine
//!
//! Merges the last authoritative history snapshot with in-flight optimistic
//! mutations into the single ordered message list the client renders.
//!
//! Invariants maintained here:
//! - rendering never reorders messages relative to arrival order
//! - an update-in-place never changes a message's position
//! - at most one optimistic placeholder exists per in-flight send; it is
//!   reconciled into the real message on success or removed on failure
//! - a fetch result is applied only if it is still keyed to the current
//!   (model, session) pair; stale completions are discarded

use crate::core::types::{Message, MessageId, Role, SendOutcome, ViewKey};

/// Client-side view of one conversation.
pub struct ConversationView {
    /// The (model, session) pair the view is scoped to; None when no session
    /// is bound (a valid state in which sends are disabled).
    key: Option<ViewKey>,
    /// Authoritative baseline plus spliced placeholders, in arrival order.
    messages: Vec<Message>,
    /// True between a context change and the first fetch that lands for it.
    loading: bool,
    /// The placeholder id of the in-flight send, if any.
    pending_send: Option<MessageId>,
}

impl ConversationView {
    pub fn new() -> Self {
        Self {
            key: None,
            messages: Vec::new(),
            loading: false,
            pending_send: None,
        }
    }

    pub fn key(&self) -> Option<&ViewKey> {
        self.key.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn send_in_flight(&self) -> bool {
        self.pending_send.is_some()
    }

    /// Switch to a new (model, session) context, or to none.
    ///
    /// Discards the rendered list and any in-flight placeholder; the caller
    /// issues a fresh authoritative fetch for the new key.
    pub fn begin_context(&mut self, key: Option<ViewKey>) {
        self.messages.clear();
        self.pending_send = None;
        self.loading = key.is_some();
        self.key = key;
    }

    /// Apply an authoritative fetch result.
    ///
    /// Returns false (and changes nothing) if the fetch was issued for a key
    /// that is no longer current — the stale-fetch guard. Otherwise the
    /// fetched sequence becomes the new baseline, with the in-flight
    /// placeholder (if any) re-applied on top, append-only.
    pub fn apply_fetch(&mut self, fetched_for: &ViewKey, messages: Vec<Message>) -> bool {
        if self.key.as_ref() != Some(fetched_for) {
            tracing::debug!(
                "Discarding stale fetch for {:?}/{:?}",
                fetched_for.model_tag,
                fetched_for.session_id
            );
            return false;
        }

        let placeholder = self.pending_send.as_ref().and_then(|id| {
            self.messages
                .iter()
                .find(|m| &m.id == id)
                .cloned()
        });

        self.messages = messages;
        if let Some(placeholder) = placeholder {
            self.messages.push(placeholder);
        }
        self.loading = false;
        true
    }

    /// Start a send: splice an optimistic user placeholder at the end so the
    /// UI reflects the action with zero latency.
    ///
    /// Returns None when no context is bound or a send is already in flight;
    /// callers treat both as "send disabled".
    pub fn begin_send(&mut self, user_id: &str, prompt: &str) -> Option<MessageId> {
        let key = self.key.as_ref()?;
        if self.pending_send.is_some() {
            return None;
        }
        let placeholder =
            Message::placeholder(user_id, &key.model_tag, &key.session_id, prompt);
        let id = placeholder.id.clone();
        self.messages.push(placeholder);
        self.pending_send = Some(id.clone());
        Some(id)
    }

    /// Reconcile a successful send.
    ///
    /// The placeholder matching the returned user message (temp-id prefix +
    /// content) has its id swapped for the server id in place — no positional
    /// move, no flicker — and the assistant message is appended at the end.
    pub fn complete_send(&mut self, outcome: &SendOutcome) -> bool {
        let Some(pending_id) = self.pending_send.take() else {
            return false;
        };

        let matched = self.messages.iter_mut().find(|m| {
            m.id == pending_id
                && m.id.is_temp()
                && m.role == Role::User
                && m.content == outcome.user_message.content
        });
        match matched {
            Some(placeholder) => {
                // Keep everything else as rendered; only the id changes
                placeholder.id = outcome.user_message.id.clone();
            }
            None => {
                tracing::debug!("Send placeholder vanished before reconciliation");
                return false;
            }
        }

        self.messages.push(outcome.assistant_message.clone());
        true
    }

    /// Roll back a failed send: remove the placeholder. The caller must
    /// follow with an authoritative refetch to match server truth.
    pub fn fail_send(&mut self) {
        if let Some(pending_id) = self.pending_send.take() {
            self.messages.retain(|m| m.id != pending_id);
        }
        // Sweep any stray optimistic leftovers while we are rolling back
        self.messages.retain(|m| !m.id.is_temp());
    }

    /// Reconcile a successful edit.
    ///
    /// The edited user message is replaced in place by id; its paired
    /// assistant reply is replaced in place, or inserted immediately after
    /// the edited message if none exists. Returns false if the edited
    /// message is not in the view (caller refetches).
    pub fn apply_edit(&mut self, outcome: &SendOutcome) -> bool {
        let Some(user_idx) = self
            .messages
            .iter()
            .position(|m| m.id == outcome.user_message.id)
        else {
            return false;
        };
        self.messages[user_idx] = outcome.user_message.clone();

        let reply_idx = self.paired_reply_index(user_idx, &outcome.user_message.id);
        match reply_idx {
            Some(idx) => self.messages[idx] = outcome.assistant_message.clone(),
            None => self
                .messages
                .insert(user_idx + 1, outcome.assistant_message.clone()),
        }
        true
    }

    /// Reconcile a successful delete: remove the target and, if the message
    /// now at its position is its assistant reply, remove that one too.
    pub fn apply_delete(&mut self, message_id: &MessageId) -> bool {
        let Some(idx) = self.messages.iter().position(|m| &m.id == message_id) else {
            return false;
        };
        self.messages.remove(idx);

        if let Some(next) = self.messages.get(idx) {
            let paired = match &next.in_reply_to {
                Some(parent) => parent == message_id,
                // Legacy messages without a reply reference: positional heuristic
                None => next.role == Role::Assistant,
            };
            if paired {
                self.messages.remove(idx);
            }
        }
        true
    }

    /// Index of the assistant reply paired with the user message at
    /// `user_idx`: an `in_reply_to` match anywhere wins, else the next
    /// assistant-role message after it by position.
    fn paired_reply_index(&self, user_idx: usize, user_id: &MessageId) -> Option<usize> {
        if let Some(idx) = self.messages.iter().position(|m| {
            m.role == Role::Assistant && m.in_reply_to.as_ref() == Some(user_id)
        }) {
            return Some(idx);
        }
        self.messages
            .iter()
            .enumerate()
            .skip(user_idx + 1)
            .find(|(_, m)| m.role == Role::Assistant)
            .map(|(idx, _)| idx)
    }
}

impl Default for ConversationView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SessionId;
    use chrono::Utc;

    fn key() -> ViewKey {
        ViewKey::new("gpt-4o", &SessionId::from("s1"))
    }

    fn server_msg(id: &str, role: Role, content: &str, in_reply_to: Option<&str>) -> Message {
        Message {
            id: MessageId::from(id),
            user_id: "u1".to_string(),
            model_tag: "gpt-4o".to_string(),
            session_id: SessionId::from("s1"),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            seq: 0,
            in_reply_to: in_reply_to.map(MessageId::from),
        }
    }

    fn outcome(user_id: &str, content: &str, reply_id: &str, reply: &str) -> SendOutcome {
        SendOutcome {
            user_message: server_msg(user_id, Role::User, content, None),
            assistant_message: server_msg(reply_id, Role::Assistant, reply, Some(user_id)),
        }
    }

    fn loaded_view(messages: Vec<Message>) -> ConversationView {
        let mut view = ConversationView::new();
        view.begin_context(Some(key()));
        assert!(view.apply_fetch(&key(), messages));
        view
    }

    #[test]
    fn context_change_discards_view_and_marks_loading() {
        let mut view = loaded_view(vec![server_msg("m1", Role::User, "hi", None)]);
        assert!(!view.is_loading());

        let new_key = ViewKey::new("claude", &SessionId::from("s2"));
        view.begin_context(Some(new_key));
        assert!(view.messages().is_empty());
        assert!(view.is_loading());
    }

    #[test]
    fn no_session_context_is_empty_and_not_loading() {
        let mut view = ConversationView::new();
        view.begin_context(None);
        assert!(view.messages().is_empty());
        assert!(!view.is_loading());
        assert!(view.begin_send("u1", "hi").is_none());
    }

    #[test]
    fn stale_fetch_is_discarded() {
        let mut view = ConversationView::new();
        view.begin_context(Some(key()));
        let stale_key = ViewKey::new("claude", &SessionId::from("old"));

        let applied = view.apply_fetch(&stale_key, vec![server_msg("x", Role::User, "leak", None)]);
        assert!(!applied);
        assert!(view.messages().is_empty());
        assert!(view.is_loading());
    }

    #[test]
    fn fetch_during_send_keeps_placeholder_on_top() {
        let mut view = loaded_view(vec![]);
        let placeholder_id = view.begin_send("u1", "hello").unwrap();

        let baseline = vec![server_msg("m1", Role::User, "earlier", None)];
        assert!(view.apply_fetch(&key(), baseline));

        let msgs = view.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "earlier");
        assert_eq!(msgs[1].id, placeholder_id);
    }

    #[test]
    fn only_one_send_in_flight() {
        let mut view = loaded_view(vec![]);
        assert!(view.begin_send("u1", "first").is_some());
        assert!(view.begin_send("u1", "second").is_none());
    }

    #[test]
    fn complete_send_swaps_id_in_place_and_appends_reply() {
        let mut view = loaded_view(vec![server_msg("m0", Role::User, "old", None)]);
        view.begin_send("u1", "hello");

        let result = outcome("m1", "hello", "m2", "You said: hello");
        assert!(view.complete_send(&result));

        let msgs = view.messages();
        assert_eq!(msgs.len(), 3);
        // Placeholder stayed at position 1, now with the server id
        assert_eq!(msgs[1].id, MessageId::from("m1"));
        assert!(!msgs[1].id.is_temp());
        assert_eq!(msgs[1].content, "hello");
        assert_eq!(msgs[2].id, MessageId::from("m2"));
        assert!(!view.send_in_flight());
    }

    #[test]
    fn fail_send_rolls_back_placeholder() {
        let mut view = loaded_view(vec![server_msg("m0", Role::User, "kept", None)]);
        view.begin_send("u1", "doomed");
        assert_eq!(view.messages().len(), 2);

        view.fail_send();
        assert_eq!(view.messages().len(), 1);
        assert_eq!(view.messages()[0].content, "kept");
        assert!(!view.send_in_flight());
    }

    #[test]
    fn edit_replaces_pair_in_place() {
        let mut view = loaded_view(vec![
            server_msg("m1", Role::User, "first", None),
            server_msg("m2", Role::Assistant, "You said: first", Some("m1")),
            server_msg("m3", Role::User, "later", None),
        ]);

        let result = outcome("m1", "changed", "m4", "You said: changed");
        assert!(view.apply_edit(&result));

        let msgs = view.messages();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].content, "changed");
        assert_eq!(msgs[1].id, MessageId::from("m4"));
        assert_eq!(msgs[2].id, MessageId::from("m3"));
    }

    #[test]
    fn edit_without_existing_reply_inserts_after() {
        let mut view = loaded_view(vec![
            server_msg("m1", Role::User, "alone", None),
            server_msg("m3", Role::User, "later", None),
        ]);

        let result = outcome("m1", "changed", "m4", "You said: changed");
        assert!(view.apply_edit(&result));

        let msgs = view.messages();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].id, MessageId::from("m1"));
        assert_eq!(msgs[1].id, MessageId::from("m4"));
        assert_eq!(msgs[2].id, MessageId::from("m3"));
    }

    #[test]
    fn edit_of_unknown_message_reports_miss() {
        let mut view = loaded_view(vec![]);
        let result = outcome("ghost", "x", "m4", "y");
        assert!(!view.apply_edit(&result));
    }

    #[test]
    fn delete_removes_paired_assistant() {
        let mut view = loaded_view(vec![
            server_msg("m1", Role::User, "q", None),
            server_msg("m2", Role::Assistant, "a", Some("m1")),
            server_msg("m3", Role::User, "next", None),
        ]);

        assert!(view.apply_delete(&MessageId::from("m1")));
        let msgs = view.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, MessageId::from("m3"));
    }

    #[test]
    fn delete_of_lone_user_message_removes_only_it() {
        let mut view = loaded_view(vec![
            server_msg("m1", Role::User, "q", None),
            server_msg("m3", Role::User, "another question", None),
        ]);

        assert!(view.apply_delete(&MessageId::from("m1")));
        let msgs = view.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, MessageId::from("m3"));
    }

    #[test]
    fn delete_spares_a_reply_belonging_to_another_turn() {
        // The following assistant message references a different parent, so
        // the reply-reference check overrides the positional heuristic.
        let mut view = loaded_view(vec![
            server_msg("m1", Role::User, "q", None),
            server_msg("m2", Role::Assistant, "a", Some("m9")),
        ]);

        assert!(view.apply_delete(&MessageId::from("m1")));
        let msgs = view.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, MessageId::from("m2"));
    }
}
