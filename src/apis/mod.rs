use std::future::Future;

use crate::prompt::ChatMessage;

pub mod groq_api;

pub use groq_api::{GroqApi, GroqConfig};

/// A hosted chat-completion backend.
pub trait LLMApi: Send + Sync {
    /// Send the whole conversation and wait for the full, non-streamed reply.
    fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode completion response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no choices returned by model")]
    EmptyResponse,
}
