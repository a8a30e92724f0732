use std::time::Instant;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use aicanvas_core::error::{CanvasError, Result};
use aicanvas_core::limits::OLLAMA_FALLBACK_MODELS;
use aicanvas_core::traits::{BackendClient, FragmentStream};
use aicanvas_core::types::{BackendKind, NodeRequest};

use super::{convert_messages, error_message, WireMessage};
use crate::streaming::{collect_fragments, ollama_fragments};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Client for a local Ollama daemon's `/api/chat`.
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Model names installed in the daemon.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| backend_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(backend_error(format!(
                "Ollama API returned status code {}",
                response.status().as_u16()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| backend_error(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Installed models, or a fixed fallback list when the daemon is
    /// unreachable or reports none.
    pub async fn available_models(&self) -> Vec<String> {
        match self.list_models().await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => {
                info!("Ollama reported no models, using fallback list");
                fallback_models()
            }
            Err(e) => {
                warn!(error = %e, "Could not list Ollama models, using fallback list");
                fallback_models()
            }
        }
    }

    async fn post_chat(&self, request: &NodeRequest, stream: bool) -> Result<reqwest::Response> {
        let body = ChatRequest {
            model: request.model.clone(),
            messages: convert_messages(request.messages()),
            stream,
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        debug!(
            node_id = %request.node_id,
            model = %request.model,
            messages = body.messages.len(),
            stream,
            "Sending Ollama chat request"
        );

        let response = self
            .http
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| backend_error(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| error_message(&v))
                .unwrap_or(text);
            return Err(backend_error(format!(
                "Ollama API returned status code {}: {}",
                status, detail
            )));
        }

        Ok(response)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_URL)
    }
}

fn fallback_models() -> Vec<String> {
    OLLAMA_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
}

fn backend_error(message: String) -> CanvasError {
    CanvasError::Backend {
        backend: BackendKind::Ollama,
        message,
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

/// Parse a complete (non-incremental) chat body.
///
/// The body may hold one JSON object or several newline-delimited ones;
/// their `message.content` values are concatenated. Lines that are not JSON
/// are skipped.
pub fn parse_chat_body(body: &str) -> Result<String> {
    let mut content = String::new();
    let mut saw_message = false;

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Skipping unparseable Ollama line");
                continue;
            }
        };

        if let Some(message) = error_message(&value) {
            return Err(backend_error(message));
        }

        if let Some(text) = value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
        {
            content.push_str(text);
            saw_message = true;
        }
    }

    if saw_message {
        Ok(content)
    } else {
        Err(CanvasError::Format {
            backend: BackendKind::Ollama,
        })
    }
}

impl BackendClient for OllamaClient {
    fn send(&self, request: NodeRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let start = Instant::now();
            let node_id = request.node_id.clone();

            let content = if request.streaming {
                let fragments = self.send_stream(request).await?;
                collect_fragments(fragments).await?
            } else {
                let response = self.post_chat(&request, false).await?;
                let body = response
                    .text()
                    .await
                    .map_err(|e| backend_error(e.to_string()))?;
                parse_chat_body(&body)?
            };

            debug!(
                node_id = %node_id,
                chars = content.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Ollama reply received"
            );
            Ok(content)
        })
    }

    fn send_stream(&self, request: NodeRequest) -> BoxFuture<'_, Result<FragmentStream>> {
        Box::pin(async move {
            let response = self.post_chat(&request, true).await?;
            Ok(ollama_fragments(response.bytes_stream()))
        })
    }
}
