//! confab: chat client with optimistic message reconciliation
//!
//! This library provides:
//! - A client-side reconciliation engine that keeps a rendered conversation
//!   consistent with a server-authoritative message log under concurrent
//!   send, edit, and delete
//! - The server-side mutation protocol (send, edit, delete, history) with
//!   ownership checks and graceful persistence degradation
//! - Durable client selection state with debounced model switching
//! - Pluggable responders (echo, OpenAI-compatible)
//! - An HTTP transport for the protocol

pub mod config;
pub mod core;
pub mod protocol;
pub mod responder;
pub mod store;
pub mod transport;

pub use config::Config;
pub use core::{ChatClient, ClientState, ConversationView, ModelSwitcher};
pub use protocol::{AuthContext, ChatService, SessionService};
