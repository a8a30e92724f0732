use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};

use aicanvas_core::error::{CanvasError, Result};
use aicanvas_core::traits::{BackendClient, FragmentStream};
use aicanvas_core::types::NodeRequest;

/// One scripted response for a node call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    /// Explicit error payload from the backend.
    Error(String),
    /// Reply without the expected success field.
    Format,
    /// Some fragments, then an error line.
    StreamError { partial: Vec<String>, message: String },
}

/// A scripted [`BackendClient`] that records every request it receives.
///
/// Replies are queued per node id. A node with an empty queue gets the
/// default reply, or `"output of <node id>"` when none is set.
pub struct MockBackend {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<NodeRequest>>,
    default_reply: Option<String>,
    delays: HashMap<String, Duration>,
    delay: Option<Duration>,
    fragment_chars: usize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            default_reply: None,
            delays: HashMap::new(),
            delay: None,
            fragment_chars: 4,
        }
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = Some(reply.into());
        self
    }

    /// Sleep before answering any call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep before answering calls for one node.
    pub fn with_delay_for(mut self, node_id: &str, delay: Duration) -> Self {
        self.delays.insert(node_id.to_string(), delay);
        self
    }

    /// Size of the fragments a streamed reply is cut into.
    pub fn with_fragment_chars(mut self, chars: usize) -> Self {
        self.fragment_chars = chars.max(1);
        self
    }

    pub fn push_for(&self, node_id: &str, scripted: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(node_id.to_string())
            .or_default()
            .push_back(scripted);
    }

    pub fn push_reply_for(&self, node_id: &str, reply: impl Into<String>) {
        self.push_for(node_id, Scripted::Reply(reply.into()));
    }

    pub fn push_error_for(&self, node_id: &str, message: impl Into<String>) {
        self.push_for(node_id, Scripted::Error(message.into()));
    }

    pub fn push_format_error_for(&self, node_id: &str) {
        self.push_for(node_id, Scripted::Format);
    }

    /// Every request received, in call order.
    pub fn requests(&self) -> Vec<NodeRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, node_id: &str) -> Vec<NodeRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.node_id == node_id)
            .collect()
    }

    /// Node ids in call order.
    pub fn call_order(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.node_id).collect()
    }

    async fn begin(&self, request: &NodeRequest) -> Scripted {
        self.requests.lock().unwrap().push(request.clone());

        let delay = self.delays.get(&request.node_id).copied().or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.node_id)
            .and_then(|q| q.pop_front());
        next.unwrap_or_else(|| {
            Scripted::Reply(
                self.default_reply
                    .clone()
                    .unwrap_or_else(|| format!("output of {}", request.node_id)),
            )
        })
    }

    fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.fragment_chars)
            .map(|c| c.iter().collect())
            .collect()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendClient for MockBackend {
    fn send(&self, request: NodeRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let backend = request.backend;
            match self.begin(&request).await {
                Scripted::Reply(text) => Ok(text),
                Scripted::Error(message) => Err(CanvasError::Backend { backend, message }),
                Scripted::Format => Err(CanvasError::Format { backend }),
                Scripted::StreamError { message, .. } => {
                    Err(CanvasError::StreamProtocol { backend, message })
                }
            }
        })
    }

    fn send_stream(&self, request: NodeRequest) -> BoxFuture<'_, Result<FragmentStream>> {
        Box::pin(async move {
            let backend = request.backend;
            if !backend.supports_streaming() {
                return Err(CanvasError::StreamingUnsupported(backend));
            }
            match self.begin(&request).await {
                Scripted::Reply(text) => {
                    let fragments: Vec<Result<String>> =
                        self.split(&text).into_iter().map(Ok).collect();
                    Ok(stream::iter(fragments).boxed())
                }
                Scripted::Error(message) => Err(CanvasError::Backend { backend, message }),
                Scripted::Format => Err(CanvasError::Format { backend }),
                Scripted::StreamError { partial, message } => {
                    let mut items: Vec<Result<String>> = partial.into_iter().map(Ok).collect();
                    items.push(Err(CanvasError::StreamProtocol { backend, message }));
                    Ok(stream::iter(items).boxed())
                }
            }
        })
    }
}
