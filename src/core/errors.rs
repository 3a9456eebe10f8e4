//! Domain error types
//!
//! These errors represent business logic failures, distinct from infrastructure
//! errors. Using thiserror for ergonomic error handling with proper Display
//! implementations.

use thiserror::Error;

/// Errors surfaced by the mutation protocol.
///
/// Responder failures never appear here: reply generation always degrades to a
/// fallback string. Store unavailability appears only where no safe degraded
/// result exists (edit, delete); send and history absorb it.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No caller identity bound to the request
    #[error("Authentication required")]
    Unauthenticated,

    /// Identity present but not the owner of the target entity
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Entity id unknown
    #[error("Not found: {0}")]
    NotFound(String),

    /// Empty or malformed input
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Message log write failed where no degraded result is acceptable
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

/// Errors from the message log collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is transiently unreachable; a valid state, not a bug
    #[error("Message store unavailable")]
    Unavailable,

    /// No entity with the given id
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
