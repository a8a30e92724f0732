use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use aicanvas_core::config::GatewayConfig;

use crate::routes;
use crate::state::AppState;

/// Every route, bound to `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        // Workflow runs
        .route("/execute", post(routes::execute))
        .route("/execute/stop", post(routes::stop_execution))
        .route("/execute/state", get(routes::execution_state))
        .route("/execute/events", get(routes::execution_events))
        // Node chat
        .route("/node/chat", post(routes::node_chat))
        // Models
        .route("/models", get(routes::list_models))
        .route("/models/limits", get(routes::model_limits))
        // Conversations
        .route(
            "/conversations",
            get(routes::export_conversations).put(routes::import_conversations),
        )
        .route(
            "/conversations/{node_id}",
            get(routes::node_conversation).delete(routes::clear_conversation),
        )
        // Graphs
        .route("/graphs/{id}", put(routes::put_graph).get(routes::get_graph))
        .route("/graphs/{id}/nodes", post(routes::add_node))
        .route(
            "/graphs/{id}/nodes/{node_id}",
            axum::routing::delete(routes::remove_node),
        )
        .route(
            "/graphs/{id}/nodes/{node_id}/context",
            get(routes::node_context),
        )
        .route(
            "/graphs/{id}/edges",
            post(routes::add_edge).delete(routes::remove_edge),
        )
        .route("/graphs/{id}/cycles", get(routes::graph_cycles))
        .route("/graphs/{id}/break-cycles", post(routes::break_graph_cycles))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        let orchestrator = self.state.orchestrator.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                orchestrator.stop_execution();
            })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
