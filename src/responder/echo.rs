//! Deterministic echo responder
//!
//! Used when no external model is configured and as the reference behavior
//! for degraded-mode tests: the reply always embeds the original prompt.

use super::Responder;
use anyhow::Result;
use async_trait::async_trait;

#[derive(Default)]
pub struct EchoResponder;

impl EchoResponder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Responder for EchoResponder {
    fn name(&self) -> &str {
        "echo"
    }

    async fn reply(&self, _model_tag: &str, prompt: &str) -> Result<String> {
        Ok(format!("You said: {}", prompt))
    }
}
