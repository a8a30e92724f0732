use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::BackendKind;

#[derive(Debug, Error)]
pub enum CanvasError {
    // Graph errors
    #[error("Invalid edge {from} -> {to}: {reason}")]
    InvalidEdge {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Node already exists: {0}")]
    DuplicateNode(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Graph not found: {0}")]
    GraphNotFound(String),

    #[error("Graph contains cycles and cannot be executed sequentially: {}", format_cycles(.cycles))]
    CyclePresent { cycles: Vec<Vec<String>> },

    // Orchestration errors
    #[error("A workflow run is already active: {run_id}")]
    Concurrency { run_id: String },

    #[error("Workflow run {run_id} exceeded its {timeout_secs}s time budget")]
    Timeout { run_id: String, timeout_secs: u64 },

    // Backend errors
    #[error("{backend} request failed: {message}")]
    Backend {
        backend: BackendKind,
        message: String,
    },

    #[error("No response or unexpected format from {backend}")]
    Format { backend: BackendKind },

    #[error("{backend} stream error: {message}")]
    StreamProtocol {
        backend: BackendKind,
        message: String,
    },

    #[error("{0} does not support streaming")]
    StreamingUnsupported(BackendKind),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CanvasError>;

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| c.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

impl CanvasError {
    /// Convert a node-scoped error into the failure recorded for that node.
    ///
    /// Returns `None` for run-level errors, which abort the whole run instead.
    pub fn node_failure(&self) -> Option<NodeFailure> {
        let kind = match self {
            Self::Backend { .. } | Self::StreamingUnsupported(_) => FailureKind::Backend,
            Self::Format { .. } => FailureKind::Format,
            Self::StreamProtocol { .. } => FailureKind::StreamProtocol,
            _ => return None,
        };
        Some(NodeFailure {
            kind,
            message: self.to_string(),
        })
    }

    /// Whether retrying the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }
}

/// Category of a per-node failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Backend,
    Format,
    StreamProtocol,
}

/// A node-level failure captured into the run's result map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
