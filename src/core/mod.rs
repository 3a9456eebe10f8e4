//! Core domain modules
//!
//! Domain logic shared across the protocol and transport layers: canonical
//! types, the error taxonomy, the client-side reconciliation engine, and the
//! durable client selection state.

pub mod client;
pub mod client_state;
pub mod errors;
pub mod reconcile;
pub mod switcher;
pub mod types;

// Re-export canonical types
pub use client::ChatClient;
pub use client_state::ClientState;
pub use errors::{ChatError, StoreError};
pub use reconcile::ConversationView;
pub use switcher::ModelSwitcher;
pub use types::{
    ChatSession, Message, MessageId, Role, SendOutcome, SessionId, ViewKey, TEMP_ID_PREFIX,
};
