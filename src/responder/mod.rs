//! Reply generators
//!
//! A responder turns `(model_tag, prompt)` into reply text. Responders may
//! fail; the mutation protocol never lets that failure escape — see
//! [`generate_reply`], which degrades to a deterministic echo instead.

mod echo;
mod openai;

pub use echo::EchoResponder;
pub use openai::OpenAiResponder;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for reply generators.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Get the responder name
    fn name(&self) -> &str;

    /// Produce reply text for a prompt against the given model.
    async fn reply(&self, model_tag: &str, prompt: &str) -> Result<String>;
}

/// Create a responder based on name.
pub fn create_responder(name: &str) -> Result<Arc<dyn Responder>> {
    match name.to_lowercase().as_str() {
        "echo" => Ok(Arc::new(EchoResponder::new())),
        "openai" | "gpt" => Ok(Arc::new(OpenAiResponder::new()?)),
        _ => anyhow::bail!("Unknown responder: {}. Supported: echo, openai", name),
    }
}

/// The fallback reply when a responder fails mid-request.
pub fn fallback_reply(prompt: &str) -> String {
    format!("You said: {}", prompt)
}

/// The fallback reply when no responder could be constructed at all.
pub fn unconfigured_reply(prompt: &str) -> String {
    format!("[responder not configured] You said: {}", prompt)
}

/// Generate a reply, absorbing any responder failure.
///
/// This function never returns an error: upstream degradation is not a fatal
/// condition for a chat turn, so a failing responder yields the deterministic
/// echo containing the original prompt.
pub async fn generate_reply(
    responder: Option<&Arc<dyn Responder>>,
    model_tag: &str,
    prompt: &str,
) -> String {
    match responder {
        Some(responder) => match responder.reply(model_tag, prompt).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(
                    "Responder '{}' failed, using echo fallback: {}",
                    responder.name(),
                    err
                );
                fallback_reply(prompt)
            }
        },
        None => unconfigured_reply(prompt),
    }
}
