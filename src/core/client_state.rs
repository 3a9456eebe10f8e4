//! Client selection state
//!
//! The small amount of durable client state that survives process restarts:
//! which model is selected, which session is current per model, and the
//! unsent draft. This is never a source of truth for message content — the
//! rendered list lives in the reconciliation engine and is rebuilt from
//! authoritative fetches.

use crate::core::types::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File name for the persisted subset under the storage root.
const STATE_FILE: &str = "client_state.json";

/// The enumerated persisted-fields allowlist. Everything else in
/// [`ClientState`] is process-wide UI state that resets on restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    selected_model: Option<String>,
    sessions: HashMap<String, SessionId>,
    draft: String,
}

#[derive(Debug, Default)]
pub struct ClientState {
    /// Active model tag, if any.
    selected_model: Option<String>,
    /// model tag -> currently active session id. A partial function:
    /// a model with no bound session is a valid state, not an error.
    sessions: HashMap<String, SessionId>,
    /// Unsent message text, saved before submit.
    draft: String,
    /// True while a debounced model switch is pending; sends are disabled.
    model_switching: bool,
    sidebar_open: bool,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            sidebar_open: true,
            ..Default::default()
        }
    }

    // ----- model selection -----

    pub fn selected_model(&self) -> Option<&str> {
        self.selected_model.as_deref()
    }

    /// Switch the active model. Sessions are scoped per model, so callers
    /// must treat this as invalidating the rendered view for the prior
    /// context; the per-model session map itself is kept — switching never
    /// deletes a session, only changes which one is current.
    pub fn set_selected_model(&mut self, tag: &str) {
        self.selected_model = Some(tag.to_string());
    }

    pub fn is_model_switching(&self) -> bool {
        self.model_switching
    }

    pub fn set_model_switching(&mut self, switching: bool) {
        self.model_switching = switching;
    }

    // ----- current session per model -----

    /// The current session for the given model tag, or the selected model
    /// when none is given. "None" means no session is bound yet, which
    /// disables send.
    pub fn current_session(&self, model_tag: Option<&str>) -> Option<&SessionId> {
        let tag = model_tag.or(self.selected_model.as_deref())?;
        self.sessions.get(tag)
    }

    /// Bind (or unbind, with None) the current session for the selected
    /// model. No-op when no model is selected.
    pub fn set_current_session(&mut self, session_id: Option<SessionId>) {
        let Some(tag) = self.selected_model.clone() else {
            return;
        };
        match session_id {
            Some(id) => {
                self.sessions.insert(tag, id);
            }
            None => {
                self.sessions.remove(&tag);
            }
        }
    }

    // ----- draft -----

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, draft: &str) {
        self.draft = draft.to_string();
    }

    pub fn clear_draft(&mut self) {
        self.draft.clear();
    }

    // ----- UI state (never persisted) -----

    pub fn is_sidebar_open(&self) -> bool {
        self.sidebar_open
    }

    pub fn toggle_sidebar(&mut self) {
        self.sidebar_open = !self.sidebar_open;
    }

    pub fn set_sidebar_open(&mut self, open: bool) {
        self.sidebar_open = open;
    }

    // ----- persistence -----

    fn state_path(root: &Path) -> PathBuf {
        root.join(STATE_FILE)
    }

    /// Persist the allowlisted subset. UI flags are deliberately excluded.
    pub fn save(&self, root: &Path) -> std::io::Result<()> {
        let persisted = PersistedState {
            selected_model: self.selected_model.clone(),
            sessions: self.sessions.clone(),
            draft: self.draft.clone(),
        };
        let content = serde_json::to_string_pretty(&persisted)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(Self::state_path(root), content)
    }

    /// Rehydrate from disk; defaults on any failure.
    pub fn load(root: &Path) -> Self {
        let persisted = std::fs::read_to_string(Self::state_path(root))
            .ok()
            .and_then(|content| serde_json::from_str::<PersistedState>(&content).ok())
            .unwrap_or_default();
        Self {
            selected_model: persisted.selected_model,
            sessions: persisted.sessions,
            draft: persisted.draft,
            model_switching: false,
            sidebar_open: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn session_map_is_per_model() {
        let mut state = ClientState::new();
        state.set_selected_model("gpt-4o");
        state.set_current_session(Some(SessionId::from("s1")));
        state.set_selected_model("claude");
        state.set_current_session(Some(SessionId::from("s2")));

        assert_eq!(
            state.current_session(Some("gpt-4o")),
            Some(&SessionId::from("s1"))
        );
        assert_eq!(state.current_session(None), Some(&SessionId::from("s2")));
    }

    #[test]
    fn unbinding_leaves_other_models_untouched() {
        let mut state = ClientState::new();
        state.set_selected_model("gpt-4o");
        state.set_current_session(Some(SessionId::from("s1")));
        state.set_selected_model("claude");
        state.set_current_session(Some(SessionId::from("s2")));
        state.set_current_session(None);

        assert_eq!(state.current_session(None), None);
        assert_eq!(
            state.current_session(Some("gpt-4o")),
            Some(&SessionId::from("s1"))
        );
    }

    #[test]
    fn no_session_bound_is_a_valid_state() {
        let mut state = ClientState::new();
        state.set_selected_model("gpt-4o");
        assert_eq!(state.current_session(None), None);
    }

    #[test]
    fn set_session_without_model_is_a_no_op() {
        let mut state = ClientState::new();
        state.set_current_session(Some(SessionId::from("s1")));
        assert!(state.current_session(Some("gpt-4o")).is_none());
    }

    #[test]
    fn persists_allowlisted_fields_only() {
        let temp = TempDir::new().unwrap();
        let mut state = ClientState::new();
        state.set_selected_model("gpt-4o");
        state.set_current_session(Some(SessionId::from("s1")));
        state.set_draft("half-typed");
        state.set_model_switching(true);
        state.set_sidebar_open(false);
        state.save(temp.path()).unwrap();

        let restored = ClientState::load(temp.path());
        assert_eq!(restored.selected_model(), Some("gpt-4o"));
        assert_eq!(
            restored.current_session(None),
            Some(&SessionId::from("s1"))
        );
        assert_eq!(restored.draft(), "half-typed");
        // UI flags reset on restart
        assert!(!restored.is_model_switching());
        assert!(restored.is_sidebar_open());
    }

    #[test]
    fn load_from_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let state = ClientState::load(temp.path());
        assert!(state.selected_model().is_none());
        assert_eq!(state.draft(), "");
    }
}
