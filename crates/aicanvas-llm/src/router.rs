use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use aicanvas_core::config::AppConfig;
use aicanvas_core::error::Result;
use aicanvas_core::traits::{BackendClient, FragmentStream};
use aicanvas_core::types::{BackendKind, NodeRequest};

use crate::providers::{GroqClient, OllamaClient};

/// Dispatches each request to the client for its `backend`.
pub struct BackendRouter {
    ollama: Arc<dyn BackendClient>,
    groq: Arc<dyn BackendClient>,
}

impl BackendRouter {
    pub fn new(ollama: Arc<dyn BackendClient>, groq: Arc<dyn BackendClient>) -> Self {
        Self { ollama, groq }
    }

    fn client_for(&self, backend: BackendKind) -> &dyn BackendClient {
        match backend {
            BackendKind::Ollama => self.ollama.as_ref(),
            BackendKind::Groq => self.groq.as_ref(),
        }
    }
}

impl BackendClient for BackendRouter {
    fn send(&self, request: NodeRequest) -> BoxFuture<'_, Result<String>> {
        self.client_for(request.backend).send(request)
    }

    fn send_stream(&self, request: NodeRequest) -> BoxFuture<'_, Result<FragmentStream>> {
        self.client_for(request.backend).send_stream(request)
    }
}

/// Build the backend router from configuration.
pub fn create_client(config: &AppConfig) -> BackendRouter {
    let api_key = config.groq.resolved_api_key();
    if api_key.is_none() {
        info!("No Groq API key configured; groq nodes will fail");
    }
    BackendRouter::new(
        Arc::new(OllamaClient::new(config.ollama.base_url.clone())),
        Arc::new(GroqClient::new(config.groq.base_url.clone(), api_key)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use aicanvas_core::error::CanvasError;
    use aicanvas_core::types::Node;
    use aicanvas_test_utils::MockBackend;

    #[tokio::test]
    async fn test_routes_by_backend() {
        let ollama = Arc::new(MockBackend::new().with_default_reply("from ollama"));
        let groq = Arc::new(MockBackend::new().with_default_reply("from groq"));
        let router = BackendRouter::new(ollama.clone(), groq.clone());

        let a = Node::new("a", "A", BackendKind::Ollama, "llama3");
        let b = Node::new("b", "B", BackendKind::Groq, "llama3-8b-8192");
        assert_eq!(router.send(NodeRequest::for_node(&a, vec![], vec![])).await.unwrap(), "from ollama");
        assert_eq!(router.send(NodeRequest::for_node(&b, vec![], vec![])).await.unwrap(), "from groq");
        assert_eq!(ollama.requests().len(), 1);
        assert_eq!(groq.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_groq_stream_is_unsupported() {
        let groq = Arc::new(GroqClient::new("http://127.0.0.1:9", Some("k".into())));
        let router = BackendRouter::new(Arc::new(MockBackend::new()), groq);
        let b = Node::new("b", "B", BackendKind::Groq, "llama3-8b-8192");
        let result = router.send_stream(NodeRequest::for_node(&b, vec![], vec![])).await;
        assert!(matches!(result, Err(CanvasError::StreamingUnsupported(BackendKind::Groq))));
    }
}
