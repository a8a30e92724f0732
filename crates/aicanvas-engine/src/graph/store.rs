use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use aicanvas_core::error::{CanvasError, Result};
use aicanvas_core::types::{Edge, Node};

/// Serializable form of a graph: nodes and edges in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Nodes and directed edges of one workflow graph.
///
/// Node insertion order is the scheduling tie-break; edge insertion order is
/// the creation order the cycle breaker uses.
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph, validating every node and edge as if added one by one.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        let mut graph = Self::new();
        for node in snapshot.nodes {
            graph.add_node(node)?;
        }
        for edge in snapshot.edges {
            graph.add_edge(edge.from, edge.to)?;
        }
        Ok(graph)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.index.contains_key(&node.id) {
            return Err(CanvasError::DuplicateNode(node.id));
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<Node> {
        let pos = self
            .index
            .remove(id)
            .ok_or_else(|| CanvasError::NodeNotFound(id.to_string()))?;
        let node = self.nodes.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        self.edges.retain(|e| e.from != id && e.to != id);
        Ok(node)
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> Result<()> {
        let (from, to) = (from.into(), to.into());
        let reject = |reason: &str| CanvasError::InvalidEdge {
            from: from.clone(),
            to: to.clone(),
            reason: reason.to_string(),
        };

        if !self.contains(&from) {
            return Err(reject("unknown source node"));
        }
        if !self.contains(&to) {
            return Err(reject("unknown target node"));
        }
        if from == to {
            return Err(reject("self-loops are not allowed"));
        }
        if self.has_edge(&from, &to) {
            return Err(reject("edge already exists"));
        }

        self.edges.push(Edge { from, to });
        Ok(())
    }

    pub fn remove_edge(&mut self, from: &str, to: &str) -> Result<Edge> {
        let pos = self
            .edges
            .iter()
            .position(|e| e.from == from && e.to == to)
            .ok_or_else(|| CanvasError::InvalidEdge {
                from: from.to_string(),
                to: to.to_string(),
                reason: "no such edge".to_string(),
            })?;
        Ok(self.edges.remove(pos))
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges.iter().any(|e| e.from == from && e.to == to)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Insertion rank of a node.
    pub fn rank(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Parent ids, in edge creation order.
    pub fn parents_of(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Child ids, in edge creation order.
    pub fn children_of(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == id)
            .map(|e| e.to.as_str())
            .collect()
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.edges.iter().filter(|e| e.to == id).count()
    }

    pub fn all_nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn all_edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Creation index of an edge among the current edges.
    pub fn edge_position(&self, from: &str, to: &str) -> Option<usize> {
        self.edges.iter().position(|e| e.from == from && e.to == to)
    }

    /// Children of every node, keyed by id.
    pub fn adjacency(&self) -> HashMap<&str, Vec<&str>> {
        let mut adj: HashMap<&str, Vec<&str>> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), Vec::new()))
            .collect();
        for edge in &self.edges {
            if let Some(children) = adj.get_mut(edge.from.as_str()) {
                children.push(edge.to.as_str());
            }
        }
        adj
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aicanvas_core::types::BackendKind;

    fn node(id: &str) -> Node {
        Node::new(id, id.to_uppercase(), BackendKind::Ollama, "llama3")
    }

    fn graph(ids: &[&str]) -> GraphStore {
        let mut g = GraphStore::new();
        for id in ids {
            g.add_node(node(id)).unwrap();
        }
        g
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut g = graph(&["a"]);
        assert!(matches!(g.add_node(node("a")), Err(CanvasError::DuplicateNode(_))));
    }

    #[test]
    fn test_invalid_edges_rejected() {
        let mut g = graph(&["a", "b"]);
        assert!(matches!(g.add_edge("a", "a"), Err(CanvasError::InvalidEdge { .. })));
        assert!(matches!(g.add_edge("a", "zz"), Err(CanvasError::InvalidEdge { .. })));
        assert!(matches!(g.add_edge("zz", "a"), Err(CanvasError::InvalidEdge { .. })));
        g.add_edge("a", "b").unwrap();
        let err = g.add_edge("a", "b").unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(g.all_edges().len(), 1);
    }

    #[test]
    fn test_remove_node_cascades_edges() {
        let mut g = graph(&["a", "b", "c"]);
        g.add_edge("a", "b").unwrap();
        g.add_edge("b", "c").unwrap();
        g.add_edge("a", "c").unwrap();
        g.remove_node("b").unwrap();
        assert_eq!(g.all_edges(), &[Edge::new("a", "c")]);
        assert_eq!(g.rank("c"), Some(1));
        assert_eq!(g.node("c").unwrap().id, "c");
        assert!(g.node("b").is_none());
    }

    #[test]
    fn test_adjacency_queries() {
        let mut g = graph(&["a", "b", "c"]);
        g.add_edge("a", "c").unwrap();
        g.add_edge("b", "c").unwrap();
        assert_eq!(g.parents_of("c"), vec!["a", "b"]);
        assert_eq!(g.children_of("a"), vec!["c"]);
        assert_eq!(g.in_degree("c"), 2);
        assert_eq!(g.in_degree("a"), 0);
    }

    #[test]
    fn test_remove_missing_edge() {
        let mut g = graph(&["a", "b"]);
        assert!(g.remove_edge("a", "b").is_err());
    }

    #[test]
    fn test_snapshot_round_trip_validates() {
        let snapshot = GraphSnapshot {
            nodes: vec![node("a"), node("b")],
            edges: vec![Edge::new("a", "b"), Edge::new("b", "b")],
        };
        assert!(GraphStore::from_snapshot(snapshot).is_err());
    }
}
