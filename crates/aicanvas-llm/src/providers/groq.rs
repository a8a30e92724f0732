use std::time::Instant;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error};

use aicanvas_core::error::{CanvasError, Result};
use aicanvas_core::traits::BackendClient;
use aicanvas_core::types::{BackendKind, NodeRequest};

use super::{convert_messages, error_message, WireMessage};

pub const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Client for Groq's OpenAI-compatible chat completions endpoint.
///
/// Always non-incremental; `request.streaming` is ignored.
pub struct GroqClient {
    http: Client,
    url: String,
    api_key: Option<String>,
}

impl GroqClient {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
            api_key,
        }
    }
}

impl Default for GroqClient {
    fn default() -> Self {
        Self::new(GROQ_API_URL, std::env::var("GROQ_API_KEY").ok())
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_completion_tokens: u32,
}

fn backend_error(message: String) -> CanvasError {
    CanvasError::Backend {
        backend: BackendKind::Groq,
        message,
    }
}

/// Extract `choices[0].message.content` from a completion body.
pub fn parse_completion(value: &serde_json::Value) -> Result<String> {
    if let Some(message) = error_message(value) {
        return Err(backend_error(message));
    }

    value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or(CanvasError::Format {
            backend: BackendKind::Groq,
        })
}

impl BackendClient for GroqClient {
    fn send(&self, request: NodeRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let api_key = self.api_key.as_deref().ok_or_else(|| {
                backend_error("GROQ_API_KEY not found in environment variables".to_string())
            })?;

            let start = Instant::now();
            let body = ChatRequest {
                model: request.model.clone(),
                messages: convert_messages(request.messages()),
                temperature: request.temperature,
                max_completion_tokens: request.max_tokens,
            };

            debug!(
                node_id = %request.node_id,
                model = %request.model,
                messages = body.messages.len(),
                "Sending Groq chat request"
            );

            let response = self
                .http
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await
                .map_err(|e| backend_error(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| backend_error(e.to_string()))?;
            let parsed = serde_json::from_str::<serde_json::Value>(&text);

            if !status.is_success() {
                let detail = parsed
                    .ok()
                    .and_then(|v| error_message(&v))
                    .unwrap_or(text);
                error!(status = status.as_u16(), detail = %detail, "Groq API error");
                return Err(backend_error(format!(
                    "Groq API returned status code {}: {}",
                    status.as_u16(),
                    detail
                )));
            }

            let value = match parsed {
                Ok(v) => v,
                Err(e) => {
                    error!(error = %e, "Invalid JSON response from Groq");
                    return Err(CanvasError::Format {
                        backend: BackendKind::Groq,
                    });
                }
            };

            let content = parse_completion(&value)?;
            debug!(
                node_id = %request.node_id,
                chars = content.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Groq reply received"
            );
            Ok(content)
        })
    }
}
