use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use aicanvas_core::config::AppConfig;
use aicanvas_core::error::{CanvasError, Result};
use aicanvas_core::event::EventBus;
use aicanvas_core::traits::BackendClient;
use aicanvas_engine::{ConversationStore, ExecutionOrchestrator, GraphStore, NodeChat, SharedConversations};
use aicanvas_llm::{create_client, OllamaClient};

/// Shared application state for axum handlers.
pub struct AppState {
    pub orchestrator: ExecutionOrchestrator,
    pub chat: NodeChat,
    pub conversations: SharedConversations,
    pub ollama: OllamaClient,
    graphs: RwLock<HashMap<String, GraphStore>>,
}

impl AppState {
    /// Wire the engine around an arbitrary backend.
    pub fn new(client: Arc<dyn BackendClient>, ollama: OllamaClient, config: &AppConfig) -> Self {
        let conversations = ConversationStore::shared();
        let events = Arc::new(EventBus::new(config.engine.event_capacity));
        let orchestrator = ExecutionOrchestrator::new(
            client.clone(),
            conversations.clone(),
            events,
            config.engine.clone(),
        );
        Self {
            orchestrator,
            chat: NodeChat::new(client, conversations.clone()),
            conversations,
            ollama,
            graphs: RwLock::new(HashMap::new()),
        }
    }

    /// State backed by the real Ollama and Groq clients.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(create_client(config)),
            OllamaClient::new(config.ollama.base_url.clone()),
            config,
        )
    }

    pub fn graphs(&self) -> RwLockReadGuard<'_, HashMap<String, GraphStore>> {
        self.graphs.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn graphs_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, GraphStore>> {
        self.graphs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of a registered graph.
    pub fn graph(&self, id: &str) -> Result<GraphStore> {
        self.graphs()
            .get(id)
            .cloned()
            .ok_or_else(|| CanvasError::GraphNotFound(id.to_string()))
    }

    /// Run `f` against a registered graph, in place.
    pub fn with_graph_mut<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut GraphStore) -> Result<T>,
    ) -> Result<T> {
        let mut graphs = self.graphs_mut();
        let graph = graphs
            .get_mut(id)
            .ok_or_else(|| CanvasError::GraphNotFound(id.to_string()))?;
        f(graph)
    }
}
