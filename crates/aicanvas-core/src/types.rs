use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FailureKind, NodeFailure};

/// Unique workflow run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Model backend a node is bound to.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Ollama,
    Groq,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Groq => "groq",
        }
    }

    /// Whether the backend can deliver its reply incrementally.
    pub fn supports_streaming(&self) -> bool {
        matches!(self, Self::Ollama)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// A model-backed unit of work in the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    pub backend: BackendKind,
    pub model: String,
    #[serde(default)]
    pub system_message: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

impl Node {
    /// Create a node with default generation parameters.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        backend: BackendKind,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            backend,
            model: model.into(),
            system_message: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn with_system_message(mut self, text: impl Into<String>) -> Self {
        self.system_message = text.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A directed dependency: `to` receives `from`'s output as context.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(rename = "source")]
    pub from: String,
    #[serde(rename = "target")]
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// The most recent output of a graph parent, handed to a dependent node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParentContext {
    pub node_id: String,
    #[serde(default)]
    pub last_response: String,
}

/// Everything a backend needs to run one node call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRequest {
    pub node_id: String,
    pub backend: BackendKind,
    pub model: String,
    #[serde(default)]
    pub system_message: String,
    #[serde(default)]
    pub parent_contexts: Vec<ParentContext>,
    #[serde(default)]
    pub conversation_history: Vec<Message>,
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, alias = "stream")]
    pub streaming: bool,
}

impl NodeRequest {
    /// Build a request for `node` with its parents' contexts and history.
    pub fn for_node(
        node: &Node,
        parent_contexts: Vec<ParentContext>,
        conversation_history: Vec<Message>,
    ) -> Self {
        Self {
            node_id: node.id.clone(),
            backend: node.backend,
            model: node.model.clone(),
            system_message: node.system_message.clone(),
            parent_contexts,
            conversation_history,
            user_input: None,
            temperature: node.temperature,
            max_tokens: node.max_tokens,
            streaming: false,
        }
    }

    pub fn with_user_input(mut self, input: impl Into<String>) -> Self {
        self.user_input = Some(input.into());
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// System prompt with every parent's last response appended.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!("{}\n\n", self.system_message);
        for ctx in &self.parent_contexts {
            prompt.push_str(&format!(
                "Context from parent node {}: {}\n\n",
                ctx.node_id, ctx.last_response
            ));
        }
        prompt
    }

    /// The full message list sent upstream: system, history, then user input.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.conversation_history.len() + 2);
        messages.push(Message::system(self.system_prompt()));
        messages.extend(self.conversation_history.iter().cloned());
        if let Some(input) = &self.user_input {
            messages.push(Message::user(input.clone()));
        }
        messages
    }
}

/// Outcome of one node within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
    Success { output: String },
    Failure(NodeFailure),
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Flatten into the single result string used at the HTTP boundary.
    ///
    /// Format placeholders are shown as-is; other failures get an `Error:` prefix.
    pub fn render(&self) -> String {
        match self {
            Self::Success { output } => output.clone(),
            Self::Failure(f) if f.kind == FailureKind::Format => f.message.clone(),
            Self::Failure(f) => format!("Error: {}", f.message),
        }
    }
}

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Validating,
    Executing,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    /// A run in this status holds the engine's single-run guard.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Validating | Self::Executing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// Snapshot of the engine's current (or last) run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub run_id: Option<RunId>,
    pub status: RunStatus,
    pub current_index: usize,
    pub total: usize,
    pub execution_order: Vec<String>,
    pub results: HashMap<String, NodeOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Progress and lifecycle events published while a run executes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    RunStarted { run_id: RunId },
    CyclesBroken { run_id: RunId, removed: Vec<Edge> },
    PlanReady { run_id: RunId, order: Vec<String> },
    NodeStarted { run_id: RunId, node_id: String, index: usize },
    NodeDelta { run_id: RunId, node_id: String, text: String },
    NodeCompleted { run_id: RunId, node_id: String, output: String },
    NodeFailed { run_id: RunId, node_id: String, failure: NodeFailure },
    Progress { run_id: RunId, completed: usize, total: usize },
    RunCompleted { run_id: RunId, succeeded: usize, failed: usize },
    RunStopped { run_id: RunId, completed: usize },
    RunFailed { run_id: RunId, phase: String, error: String },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunStarted { run_id }
            | Self::CyclesBroken { run_id, .. }
            | Self::PlanReady { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeDelta { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::NodeFailed { run_id, .. }
            | Self::Progress { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunStopped { run_id, .. }
            | Self::RunFailed { run_id, .. } => run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_appends_parent_contexts() {
        let node = Node::new("b", "Writer", BackendKind::Ollama, "llama3")
            .with_system_message("You write.");
        let req = NodeRequest::for_node(
            &node,
            vec![ParentContext {
                node_id: "a".into(),
                last_response: "facts".into(),
            }],
            vec![],
        );
        assert_eq!(
            req.system_prompt(),
            "You write.\n\nContext from parent node a: facts\n\n"
        );
    }

    #[test]
    fn test_messages_order() {
        let node = Node::new("n", "N", BackendKind::Groq, "llama3-8b-8192");
        let req = NodeRequest::for_node(&node, vec![], vec![Message::user("hi"), Message::assistant("hello")])
            .with_user_input("again");
        let msgs = req.messages();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[1].content, "hi");
        assert_eq!(msgs[2].role, Role::Assistant);
        assert_eq!(msgs[3].content, "again");
    }

    #[test]
    fn test_request_accepts_camel_case_and_stream_alias() {
        let json = serde_json::json!({
            "nodeId": "n1",
            "backend": "ollama",
            "model": "llama3",
            "systemMessage": "sys",
            "parentContexts": [{"nodeId": "p", "lastResponse": "r"}],
            "userInput": "go",
            "stream": true
        });
        let req: NodeRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.node_id, "n1");
        assert_eq!(req.backend, BackendKind::Ollama);
        assert!(req.streaming);
        assert_eq!(req.max_tokens, 1024);
        assert_eq!(req.parent_contexts[0].last_response, "r");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let json = serde_json::json!({"id": "n", "name": "n", "backend": "openai", "model": "x"});
        assert!(serde_json::from_value::<Node>(json).is_err());
    }

    #[test]
    fn test_outcome_render() {
        let ok = NodeOutcome::Success {
            output: "done".into(),
        };
        assert_eq!(ok.render(), "done");

        let backend = NodeOutcome::Failure(NodeFailure {
            kind: FailureKind::Backend,
            message: "boom".into(),
        });
        assert_eq!(backend.render(), "Error: boom");

        let format = NodeOutcome::Failure(NodeFailure {
            kind: FailureKind::Format,
            message: "No response or unexpected format from groq".into(),
        });
        assert_eq!(format.render(), "No response or unexpected format from groq");
    }

    #[test]
    fn test_edge_serializes_as_source_target() {
        let json = serde_json::to_value(Edge::new("a", "b")).unwrap();
        assert_eq!(json, serde_json::json!({"source": "a", "target": "b"}));
    }
}
