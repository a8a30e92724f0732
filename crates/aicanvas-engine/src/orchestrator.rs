//! Sequential workflow execution.
//!
//! `execute_workflow` validates and plans a graph snapshot, then walks the
//! plan one node at a time on a spawned task that enforces the run's time
//! budget itself. Node failures are recorded and the walk continues; cycles,
//! concurrency and timeouts end the run.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use aicanvas_core::config::EngineConfig;
use aicanvas_core::error::{CanvasError, FailureKind, NodeFailure, Result};
use aicanvas_core::event::EventBus;
use aicanvas_core::traits::BackendClient;
use aicanvas_core::types::{
    Edge, ExecutionEvent, ExecutionState, Message, Node, NodeOutcome, NodeRequest, RunId,
    RunStatus,
};
use aicanvas_llm::retry::{RetryPolicy, RetryingClient};

use crate::conversation::SharedConversations;
use crate::graph::{compute_execution_order, detect_cycles, make_acyclic, GraphStore};
use crate::session::{ExecutionSession, SessionSlot};

/// Per-run options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Remove edges to make a cyclic graph runnable instead of failing.
    pub break_cycles: bool,
}

/// What a finished (or stopped) run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub execution_order: Vec<String>,
    pub results: HashMap<String, NodeOutcome>,
    pub removed_edges: Vec<Edge>,
}

impl ExecutionReport {
    /// Results flattened to display strings, keyed by node id.
    pub fn rendered_results(&self) -> BTreeMap<String, String> {
        self.results
            .iter()
            .map(|(id, outcome)| (id.clone(), outcome.render()))
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

struct Shared {
    client: Arc<dyn BackendClient>,
    conversations: SharedConversations,
    events: Arc<EventBus>,
    config: EngineConfig,
    slot: Mutex<SessionSlot>,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: ExecutionEvent) {
        self.events.publish(event);
    }
}

/// Drives workflow runs, one at a time.
#[derive(Clone)]
pub struct ExecutionOrchestrator {
    inner: Arc<Shared>,
}

impl ExecutionOrchestrator {
    pub fn new(
        client: Arc<dyn BackendClient>,
        conversations: SharedConversations,
        events: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        let client: Arc<dyn BackendClient> = if config.max_retries > 0 {
            Arc::new(RetryingClient::new(client, RetryPolicy::from_config(&config)))
        } else {
            client
        };
        Self {
            inner: Arc::new(Shared {
                client,
                conversations,
                events,
                config,
                slot: Mutex::new(SessionSlot::new()),
            }),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn conversations(&self) -> &SharedConversations {
        &self.inner.conversations
    }

    /// Snapshot of the current (or last) run.
    pub fn state(&self) -> ExecutionState {
        self.inner.slot().state().clone()
    }

    /// Take the terminal state of the last run and return to `Idle`.
    pub fn acknowledge(&self) -> Option<ExecutionState> {
        self.inner.slot().acknowledge()
    }

    /// Ask the active run to stop before its next node.
    ///
    /// A node call already in flight is allowed to finish; its result is
    /// discarded. Returns `false` when nothing is running.
    pub fn stop_execution(&self) -> bool {
        let stopped = self.inner.slot().stop();
        match stopped {
            Some(state) => {
                let run_id = state.run_id.clone().unwrap_or_default();
                info!(run_id = %run_id, completed = state.results.len(), "Workflow stop requested");
                self.inner.publish(ExecutionEvent::RunStopped {
                    run_id,
                    completed: state.results.len(),
                });
                true
            }
            None => false,
        }
    }

    /// Validate, plan and run every node of `graph` in dependency order.
    pub async fn execute_workflow(
        &self,
        graph: &GraphStore,
        options: ExecuteOptions,
    ) -> Result<ExecutionReport> {
        let shared = &self.inner;

        let begun = shared.slot().begin();
        let session = match begun {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Workflow run rejected");
                shared.publish(ExecutionEvent::RunFailed {
                    run_id: RunId::new(),
                    phase: "admission".to_string(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        let run_id = session.run_id.clone();
        let start = Instant::now();
        info!(run_id = %run_id, nodes = graph.len(), "Workflow run started");
        shared.publish(ExecutionEvent::RunStarted {
            run_id: run_id.clone(),
        });

        // Validating
        let mut working = graph.clone();
        let mut removed_edges = Vec::new();
        let cycles = detect_cycles(&working);
        if !cycles.is_empty() {
            if options.break_cycles {
                removed_edges = make_acyclic(&mut working);
                info!(run_id = %run_id, removed = removed_edges.len(), "Cycles broken");
                shared.publish(ExecutionEvent::CyclesBroken {
                    run_id: run_id.clone(),
                    removed: removed_edges.clone(),
                });
            } else {
                return Err(self.fail(&session, "validation", CanvasError::CyclePresent { cycles }));
            }
        }

        let plan = match compute_execution_order(&working) {
            Ok(plan) => plan,
            Err(e) => return Err(self.fail(&session, "planning", e)),
        };

        shared.slot().update(&session, |state| {
            state.status = RunStatus::Executing;
            state.total = plan.len();
            state.execution_order = plan.order.clone();
        });
        shared.publish(ExecutionEvent::PlanReady {
            run_id: run_id.clone(),
            order: plan.order.clone(),
        });

        // Executing. The budget is enforced on the spawned task, so it holds
        // even when the caller stops waiting.
        let task = tokio::spawn(supervise(
            shared.clone(),
            session.clone(),
            working,
            plan.order,
            removed_edges,
        ));

        match task.await {
            Ok(Ok(report)) => {
                info!(
                    run_id = %run_id,
                    status = ?report.status,
                    succeeded = report.succeeded(),
                    failed = report.failed(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Workflow run finished"
                );
                Ok(report)
            }
            Ok(Err(e)) => Err(e),
            Err(join_err) => Err(fail_run(
                shared,
                &session,
                "execution",
                CanvasError::Internal(join_err.to_string()),
            )),
        }
    }

    fn fail(&self, session: &ExecutionSession, phase: &str, err: CanvasError) -> CanvasError {
        fail_run(&self.inner, session, phase, err)
    }
}

/// Mark the run `Failed`, announce it, and hand the error back.
fn fail_run(shared: &Shared, session: &ExecutionSession, phase: &str, err: CanvasError) -> CanvasError {
    error!(run_id = %session.run_id, phase, error = %err, "Workflow run failed");
    let owned = shared
        .slot()
        .finish(session, RunStatus::Failed, Some(err.to_string()));
    if owned {
        shared.publish(ExecutionEvent::RunFailed {
            run_id: session.run_id.clone(),
            phase: phase.to_string(),
            error: err.to_string(),
        });
    }
    err
}

/// Race the walk against the run's time budget. On expiry the walk is
/// dropped mid-call and the run fails with `Timeout`.
async fn supervise(
    shared: Arc<Shared>,
    session: ExecutionSession,
    graph: GraphStore,
    order: Vec<String>,
    removed_edges: Vec<Edge>,
) -> Result<ExecutionReport> {
    let timeout_secs = shared.config.timeout_secs;
    let walk = run_plan(shared.clone(), session.clone(), graph, order, removed_edges);
    match tokio::time::timeout(Duration::from_secs(timeout_secs), walk).await {
        Ok(report) => Ok(report),
        Err(_) => Err(fail_run(
            &shared,
            &session,
            "execution",
            CanvasError::Timeout {
                run_id: session.run_id.to_string(),
                timeout_secs,
            },
        )),
    }
}

/// Walk the plan. Runs on its own task; every commit is checked against
/// the session epoch so a superseded walk leaves no trace.
async fn run_plan(
    shared: Arc<Shared>,
    session: ExecutionSession,
    graph: GraphStore,
    order: Vec<String>,
    removed_edges: Vec<Edge>,
) -> ExecutionReport {
    let run_id = session.run_id.clone();
    let total = order.len();
    let mut results: HashMap<String, NodeOutcome> = HashMap::new();

    let report = |status: RunStatus, results: HashMap<String, NodeOutcome>| ExecutionReport {
        run_id: run_id.clone(),
        status,
        execution_order: order.clone(),
        results,
        removed_edges: removed_edges.clone(),
    };

    for (index, node_id) in order.iter().enumerate() {
        let current = shared.slot().is_current(&session);
        if session.cancel.is_cancelled() || !current {
            info!(run_id = %run_id, completed = results.len(), "Workflow walk stopped");
            return report(RunStatus::Stopped, results);
        }

        let Some(node) = graph.node(node_id) else {
            continue;
        };

        shared.slot().update(&session, |state| state.current_index = index);
        shared.publish(ExecutionEvent::NodeStarted {
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            index,
        });

        let Some(request) = prepare_request(&shared, &session, &graph, node) else {
            return report(RunStatus::Stopped, results);
        };

        let node_start = Instant::now();
        let result = call_node(&shared, &session, request).await;
        let elapsed_ms = node_start.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(output) => NodeOutcome::Success { output },
            Err(e) => NodeOutcome::Failure(e.node_failure().unwrap_or_else(|| NodeFailure {
                kind: FailureKind::Backend,
                message: e.to_string(),
            })),
        };

        // Commit the result and the assistant turn together, or neither.
        let committed = {
            let mut slot = shared.slot();
            if slot.is_current(&session) {
                if let NodeOutcome::Success { output } = &outcome {
                    lock_conversations(&shared).append(node_id, Message::assistant(output.clone()));
                }
                slot.update(&session, |state| {
                    state.results.insert(node_id.clone(), outcome.clone());
                });
                true
            } else {
                false
            }
        };

        if !committed {
            debug!(run_id = %run_id, node_id = %node_id, "Discarding result of superseded run");
            return report(RunStatus::Stopped, results);
        }

        match &outcome {
            NodeOutcome::Success { output } => {
                debug!(run_id = %run_id, node_id = %node_id, elapsed_ms, "Node completed");
                shared.publish(ExecutionEvent::NodeCompleted {
                    run_id: run_id.clone(),
                    node_id: node_id.clone(),
                    output: output.clone(),
                });
            }
            NodeOutcome::Failure(failure) => {
                warn!(run_id = %run_id, node_id = %node_id, elapsed_ms, error = %failure, "Node failed");
                shared.publish(ExecutionEvent::NodeFailed {
                    run_id: run_id.clone(),
                    node_id: node_id.clone(),
                    failure: failure.clone(),
                });
            }
        }
        results.insert(node_id.clone(), outcome);

        shared.publish(ExecutionEvent::Progress {
            run_id: run_id.clone(),
            completed: index + 1,
            total,
        });
    }

    let finished = shared.slot().finish(&session, RunStatus::Completed, None);
    let done = report(
        if finished {
            RunStatus::Completed
        } else {
            RunStatus::Stopped
        },
        results,
    );
    if finished {
        shared.publish(ExecutionEvent::RunCompleted {
            run_id: run_id.clone(),
            succeeded: done.succeeded(),
            failed: done.failed(),
        });
    }
    done
}

fn lock_conversations(shared: &Shared) -> MutexGuard<'_, crate::conversation::ConversationStore> {
    shared
        .conversations
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

/// Gather parent contexts and history, seeding the default prompt when the
/// node has never had a user turn. `None` when the session was superseded.
fn prepare_request(
    shared: &Shared,
    session: &ExecutionSession,
    graph: &GraphStore,
    node: &Node,
) -> Option<NodeRequest> {
    let slot = shared.slot();
    if !slot.is_current(session) {
        return None;
    }
    let mut conversations = lock_conversations(shared);

    let parent_contexts = graph
        .parents_of(&node.id)
        .into_iter()
        .map(|p| conversations.parent_context(p))
        .collect();

    if !conversations.has_user_turn(&node.id) {
        conversations.append(&node.id, Message::user(shared.config.default_prompt.clone()));
    }
    let history = conversations.history(&node.id);

    let streaming = shared.config.stream_ollama && node.backend.supports_streaming();
    Some(NodeRequest::for_node(node, parent_contexts, history).with_streaming(streaming))
}

/// One backend call. Streamed fragments surface as `NodeDelta` events.
async fn call_node(
    shared: &Shared,
    session: &ExecutionSession,
    request: NodeRequest,
) -> Result<String> {
    if !request.streaming {
        return shared.client.send(request).await;
    }

    let node_id = request.node_id.clone();
    let mut fragments = shared.client.send_stream(request).await?;
    let mut full = String::new();
    while let Some(fragment) = fragments.next().await {
        let text = fragment?;
        let current = shared.slot().is_current(session);
        if current {
            shared.publish(ExecutionEvent::NodeDelta {
                run_id: session.run_id.clone(),
                node_id: node_id.clone(),
                text: text.clone(),
            });
        }
        full.push_str(&text);
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationStore;
    use aicanvas_test_utils::{chain, MockBackend};

    fn orchestrator(mock: Arc<MockBackend>) -> ExecutionOrchestrator {
        ExecutionOrchestrator::new(
            mock,
            ConversationStore::shared(),
            Arc::new(EventBus::default()),
            EngineConfig::default(),
        )
    }

    fn build(ids: &[&str]) -> GraphStore {
        let (nodes, edges) = chain(ids);
        let mut g = GraphStore::new();
        for n in nodes {
            g.add_node(n).unwrap();
        }
        for e in edges {
            g.add_edge(e.from, e.to).unwrap();
        }
        g
    }

    #[tokio::test]
    async fn test_default_prompt_seeded_once() {
        let mock = Arc::new(MockBackend::new());
        let orch = orchestrator(mock.clone());
        let g = build(&["a"]);

        orch.execute_workflow(&g, ExecuteOptions::default()).await.unwrap();
        orch.execute_workflow(&g, ExecuteOptions::default()).await.unwrap();

        let history = orch.conversations().lock().unwrap().history("a");
        let users: Vec<_> = history.iter().filter(|m| m.role == aicanvas_core::types::Role::User).collect();
        assert_eq!(users.len(), 1);
        assert_eq!(
            users[0].content,
            "Process the context from parent nodes and provide insights."
        );
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_ollama_nodes_stream_deltas() {
        let mock = Arc::new(MockBackend::new().with_fragment_chars(3));
        mock.push_reply_for("a", "abcdefg");
        let orch = orchestrator(mock.clone());
        let mut rx = orch.events().subscribe();

        let report = orch
            .execute_workflow(&build(&["a"]), ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(report.rendered_results()["a"], "abcdefg");
        assert!(mock.requests()[0].streaming);

        let mut deltas = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::NodeDelta { text, .. } = event {
                deltas.push(text);
            }
        }
        assert_eq!(deltas, vec!["abc", "def", "g"]);
    }

    #[tokio::test]
    async fn test_stop_without_run() {
        let orch = orchestrator(Arc::new(MockBackend::new()));
        assert!(!orch.stop_execution());
        assert!(orch.acknowledge().is_none());
    }
}
