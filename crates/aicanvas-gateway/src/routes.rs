use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, MutexGuard};

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use aicanvas_core::error::CanvasError;
use aicanvas_core::limits::{groq_model_limits, groq_models};
use aicanvas_core::types::{Edge, Message, Node, NodeRequest};
use aicanvas_engine::{
    detect_cycles, make_acyclic, ConversationStore, ExecuteOptions, GraphSnapshot, GraphStore,
};
use aicanvas_llm::format::markdown_to_html;

use crate::error::ApiError;
use crate::state::AppState;

type ApiResult = Result<Json<Value>, ApiError>;

fn success(data: impl Serialize) -> ApiResult {
    Ok(Json(json!({ "status": "success", "data": data })))
}

// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Workflow runs ───────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    pub graph_id: String,
    #[serde(default)]
    pub break_cycles: bool,
}

// POST /execute
pub async fn execute(State(state): State<Arc<AppState>>, Json(body): Json<ExecuteBody>) -> ApiResult {
    let graph = state.graph(&body.graph_id)?;
    info!(graph_id = %body.graph_id, nodes = graph.len(), "Execute requested");

    let report = state
        .orchestrator
        .execute_workflow(
            &graph,
            ExecuteOptions {
                break_cycles: body.break_cycles,
            },
        )
        .await?;

    success(json!({
        "runId": report.run_id,
        "status": report.status,
        "executionOrder": report.execution_order,
        "results": report.rendered_results(),
        "removedEdges": report.removed_edges,
    }))
}

// POST /execute/stop
pub async fn stop_execution(State(state): State<Arc<AppState>>) -> ApiResult {
    let stopped = state.orchestrator.stop_execution();
    success(json!({ "stopped": stopped }))
}

// GET /execute/state
pub async fn execution_state(State(state): State<Arc<AppState>>) -> ApiResult {
    success(state.orchestrator.state())
}

// GET /execute/events
pub async fn execution_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.orchestrator.events().subscribe();
    debug!("Execution event subscriber attached");

    let events = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(event) => Event::default().json_data(&event).ok().map(Ok),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "Execution event subscriber lagged");
                None
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

// ── Node chat ───────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(flatten)]
    pub request: NodeRequest,
    #[serde(default)]
    pub render_html: bool,
}

// POST /node/chat
pub async fn node_chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    let request = body.request;
    if request.user_input.as_deref().map_or(true, |s| s.trim().is_empty()) {
        return Err(ApiError::BadRequest("userInput is required".to_string()));
    }
    info!(
        node_id = %request.node_id,
        backend = %request.backend,
        stream = request.streaming,
        "Node chat"
    );

    if request.streaming && request.backend.supports_streaming() {
        let fragments = state.chat.chat_stream(request).await?;
        let events = fragments.filter_map(|item| async move {
            match item {
                Ok(text) if text.is_empty() => None,
                // SSE cannot carry carriage returns.
                Ok(text) => Some(Ok::<_, Infallible>(Event::default().data(text.replace('\r', "")))),
                Err(e) => Some(Ok(
                    Event::default().data(json!({ "error": e.to_string() }).to_string())
                )),
            }
        });
        return Ok(Sse::new(events).into_response());
    }

    let reply = state.chat.chat(request).await?;
    let html = body.render_html.then(|| markdown_to_html(&reply));
    let mut data = json!({
        "message": { "role": "assistant", "content": reply },
    });
    if let Some(html) = html {
        data["html"] = Value::String(html);
    }
    Ok(success(data)?.into_response())
}

// ── Models ──────────────────────────────────────────────────────

// GET /models/limits
pub async fn model_limits() -> Json<Value> {
    Json(json!(groq_model_limits()))
}

// GET /models
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let ollama = state.ollama.available_models().await;
    Json(json!({
        "ollama": ollama,
        "groq": groq_models(),
    }))
}

// ── Conversations ───────────────────────────────────────────────

fn conversations(state: &AppState) -> MutexGuard<'_, ConversationStore> {
    state.conversations.lock().unwrap_or_else(|e| e.into_inner())
}

// GET /conversations
pub async fn export_conversations(State(state): State<Arc<AppState>>) -> ApiResult {
    let all = conversations(&state).export_all();
    success(all)
}

// PUT /conversations
pub async fn import_conversations(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BTreeMap<String, Vec<Message>>>,
) -> ApiResult {
    let imported = body.len();
    conversations(&state).import_all(body);
    info!(imported, "Conversations imported");
    success(json!({ "imported": imported }))
}

// GET /conversations/{node_id}
pub async fn node_conversation(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult {
    let history = conversations(&state).history(&node_id);
    success(history)
}

// DELETE /conversations/{node_id}
pub async fn clear_conversation(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult {
    let cleared = conversations(&state).clear(&node_id);
    success(json!({ "cleared": cleared }))
}

// ── Graphs ──────────────────────────────────────────────────────

// PUT /graphs/{id}
pub async fn put_graph(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(snapshot): Json<GraphSnapshot>,
) -> ApiResult {
    let graph = GraphStore::from_snapshot(snapshot)?;
    let (nodes, edges) = (graph.len(), graph.all_edges().len());
    state.graphs_mut().insert(id.clone(), graph);
    info!(graph_id = %id, nodes, edges, "Graph stored");
    success(json!({ "nodes": nodes, "edges": edges }))
}

// GET /graphs/{id}
pub async fn get_graph(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    success(state.graph(&id)?.snapshot())
}

// POST /graphs/{id}/nodes
pub async fn add_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(node): Json<Node>,
) -> ApiResult {
    let node_id = node.id.clone();
    state.with_graph_mut(&id, |g| g.add_node(node))?;
    success(json!({ "nodeId": node_id }))
}

// DELETE /graphs/{id}/nodes/{node_id}
pub async fn remove_node(
    State(state): State<Arc<AppState>>,
    Path((id, node_id)): Path<(String, String)>,
) -> ApiResult {
    let removed = state.with_graph_mut(&id, |g| g.remove_node(&node_id))?;
    success(removed)
}

// POST /graphs/{id}/edges
pub async fn add_edge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(edge): Json<Edge>,
) -> ApiResult {
    state.with_graph_mut(&id, |g| g.add_edge(edge.from.clone(), edge.to.clone()))?;
    success(edge)
}

// DELETE /graphs/{id}/edges
pub async fn remove_edge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(edge): Json<Edge>,
) -> ApiResult {
    let removed = state.with_graph_mut(&id, |g| g.remove_edge(&edge.from, &edge.to))?;
    success(removed)
}

// GET /graphs/{id}/cycles
pub async fn graph_cycles(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let cycles = detect_cycles(&state.graph(&id)?);
    success(json!({ "cycles": cycles }))
}

// POST /graphs/{id}/break-cycles
pub async fn break_graph_cycles(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let removed = state.with_graph_mut(&id, |g| Ok(make_acyclic(g)))?;
    info!(graph_id = %id, removed = removed.len(), "Graph cycles broken");
    success(json!({ "removed": removed }))
}

// GET /graphs/{id}/nodes/{node_id}/context
pub async fn node_context(
    State(state): State<Arc<AppState>>,
    Path((id, node_id)): Path<(String, String)>,
) -> ApiResult {
    let graph = state.graph(&id)?;
    if !graph.contains(&node_id) {
        return Err(CanvasError::NodeNotFound(node_id).into());
    }
    let store = conversations(&state);
    let parent_contexts: Vec<_> = graph
        .parents_of(&node_id)
        .into_iter()
        .map(|p| {
            let context = store.parent_context(p);
            json!({
                "nodeId": context.node_id,
                "nodeName": graph.node(p).map(|n| n.name.as_str()),
                "lastResponse": context.last_response,
            })
        })
        .collect();
    let history = store.history(&node_id);
    drop(store);

    success(json!({
        "parentContexts": parent_contexts,
        "conversationHistory": history,
    }))
}
