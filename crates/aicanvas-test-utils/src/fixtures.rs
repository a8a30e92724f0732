use aicanvas_core::config::AppConfig;
use aicanvas_core::types::{BackendKind, Edge, Node};

pub fn ollama_node(id: &str) -> Node {
    Node::new(id, format!("Node {id}"), BackendKind::Ollama, "llama3")
        .with_system_message(format!("You are step {id}."))
}

pub fn groq_node(id: &str) -> Node {
    Node::new(id, format!("Node {id}"), BackendKind::Groq, "llama3-8b-8192")
        .with_system_message(format!("You are step {id}."))
}

/// Ollama nodes `ids[0] -> ids[1] -> ...`.
pub fn chain(ids: &[&str]) -> (Vec<Node>, Vec<Edge>) {
    let nodes = ids.iter().map(|id| ollama_node(id)).collect();
    let edges = ids.windows(2).map(|w| Edge::new(w[0], w[1])).collect();
    (nodes, edges)
}

/// `a -> b`, `a -> c`, `b -> d`, `c -> d`.
pub fn diamond() -> (Vec<Node>, Vec<Edge>) {
    let nodes = ["a", "b", "c", "d"].iter().map(|id| ollama_node(id)).collect();
    let edges = vec![
        Edge::new("a", "b"),
        Edge::new("a", "c"),
        Edge::new("b", "d"),
        Edge::new("c", "d"),
    ];
    (nodes, edges)
}

/// Config with a short run timeout and no retries.
pub fn test_config(timeout_secs: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.engine.timeout_secs = timeout_secs;
    config.engine.max_retries = 0;
    config.engine.initial_backoff_ms = 1;
    config.engine.max_backoff_ms = 5;
    config
}
