//! Model inference boundary: chat completion plus optional embeddings.

use crate::error::LlmError;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    /// Ask the endpoint for a JSON-object response format.
    pub json_mode: bool,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub latency_ms: i64,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Fixed-dimension vector; callers verify the dimension.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}
