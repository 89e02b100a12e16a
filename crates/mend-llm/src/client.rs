//! OpenAI-compatible chat-completion and embedding adapter.

use async_trait::async_trait;
use mend_core::error::LlmError;
use mend_core::llm::{ChatRequest, ChatResponse, EmbeddingClient, ModelClient};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_CHAT_MODEL: &str = "llama-3.3-70b-versatile";
const DEFAULT_EMBEDDING_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
/// Per-call deadlines: chat 30s, embeddings 30s.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TEMPERATURE: f32 = 0.1;
const EMBED_INPUT_MAX_CHARS: usize = 8_000;

#[derive(Serialize)]
struct WireChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct WireChatResponse {
    choices: Vec<WireChoice>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessageContent,
}

#[derive(Deserialize)]
struct WireMessageContent {
    content: String,
}

#[derive(Serialize)]
struct WireEmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct WireEmbeddingResponse {
    data: Vec<WireEmbedding>,
}

#[derive(Deserialize)]
struct WireEmbedding {
    embedding: Vec<f32>,
}

pub struct ChatClient {
    http: Client,
    url: String,
    model: String,
    api_key: String,
}

impl ChatClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Self::with_endpoint(api_key, DEFAULT_CHAT_URL.to_string(), DEFAULT_CHAT_MODEL.to_string())
    }

    pub fn with_endpoint(api_key: String, url: String, model: String) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| LlmError::Network {
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            url,
            model,
            api_key,
        })
    }
}

fn map_transport(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Network {
            message: err.to_string(),
        }
    }
}

fn map_status(status: StatusCode, retry_after: Option<u64>) -> Option<LlmError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthRejected,
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(30),
        },
        other => LlmError::Upstream {
            status: other.as_u16(),
            message: other.canonical_reason().unwrap_or("upstream error").to_string(),
        },
    })
}

fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

#[async_trait]
impl ModelClient for ChatClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let response_format = request.json_mode.then_some(WireResponseFormat {
            format_type: "json_object",
        });
        let wire = WireChatRequest {
            model: &self.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: &request.system,
                },
                WireMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: request.max_tokens,
            response_format,
        };

        let started = Instant::now();
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&wire)
            .send()
            .await
            .map_err(map_transport)?;
        if let Some(err) = map_status(response.status(), retry_after_secs(&response)) {
            return Err(err);
        }
        let parsed: WireChatResponse = response.json().await.map_err(|err| LlmError::Upstream {
            status: 200,
            message: format!("malformed completion body: {err}"),
        })?;
        let latency_ms = started.elapsed().as_millis() as i64;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(LlmError::EmptyCompletion)?;
        debug!(latency_ms, "chat completion received");
        Ok(ChatResponse {
            content,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            latency_ms,
        })
    }
}

pub struct RemoteEmbedder {
    http: Client,
    url: String,
    model: String,
    api_key: String,
}

impl RemoteEmbedder {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| LlmError::Network {
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            url: DEFAULT_EMBEDDING_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingClient for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let input: String = text.chars().take(EMBED_INPUT_MAX_CHARS).collect();
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&WireEmbeddingRequest {
                input: &input,
                model: &self.model,
            })
            .send()
            .await
            .map_err(map_transport)?;
        if let Some(err) = map_status(response.status(), retry_after_secs(&response)) {
            return Err(err);
        }
        let parsed: WireEmbeddingResponse =
            response.json().await.map_err(|err| LlmError::Upstream {
                status: 200,
                message: format!("malformed embedding body: {err}"),
            })?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or(LlmError::EmptyCompletion)
    }
}
