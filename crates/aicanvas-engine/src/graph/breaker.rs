use tracing::{debug, info};

use aicanvas_core::types::Edge;

use super::cycles::{detect_cycles, Cycle};
use super::store::GraphStore;

/// Remove one edge from each reported cycle that is still closed.
///
/// The removed edge is the cycle edge entering the node with the highest
/// in-degree in the current graph; ties go to the most recently created
/// edge. Returns the removed edges in removal order.
pub fn break_cycles(graph: &mut GraphStore, cycles: &[Cycle]) -> Vec<Edge> {
    let mut removed = Vec::new();

    for cycle in cycles {
        let edges: Vec<(&str, &str)> = cycle
            .windows(2)
            .map(|w| (w[0].as_str(), w[1].as_str()))
            .collect();

        // An earlier removal may already have opened this cycle.
        if edges.is_empty() || !edges.iter().all(|(a, b)| graph.has_edge(a, b)) {
            debug!(cycle = %cycle.join(" -> "), "Cycle already open, skipping");
            continue;
        }

        let victim = edges
            .iter()
            .filter_map(|&(a, b)| {
                graph
                    .edge_position(a, b)
                    .map(|pos| (graph.in_degree(b), pos, a, b))
            })
            .max_by_key(|&(in_degree, pos, _, _)| (in_degree, pos))
            .map(|(_, _, a, b)| (a.to_string(), b.to_string()));

        if let Some((from, to)) = victim {
            if let Ok(edge) = graph.remove_edge(&from, &to) {
                info!(edge = %edge, "Removed edge to break cycle");
                removed.push(edge);
            }
        }
    }

    removed
}

/// Break cycles until the graph is acyclic.
///
/// A single DFS pass may not report every cycle, so detection is repeated
/// after each round of removals.
pub fn make_acyclic(graph: &mut GraphStore) -> Vec<Edge> {
    let mut removed = Vec::new();
    loop {
        let cycles = detect_cycles(graph);
        if cycles.is_empty() {
            return removed;
        }
        let round = break_cycles(graph, &cycles);
        if round.is_empty() {
            // Every reported cycle is closed and has an edge, so a round
            // always removes something; stop rather than spin.
            return removed;
        }
        removed.extend(round);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aicanvas_core::types::{BackendKind, Node};

    fn graph(ids: &[&str], edges: &[(&str, &str)]) -> GraphStore {
        let mut g = GraphStore::new();
        for id in ids {
            g.add_node(Node::new(*id, *id, BackendKind::Ollama, "m")).unwrap();
        }
        for (a, b) in edges {
            g.add_edge(*a, *b).unwrap();
        }
        g
    }

    #[test]
    fn test_two_cycle_loses_latest_edge() {
        let mut g = graph(&["a", "b"], &[("a", "b"), ("b", "a")]);
        let cycles = detect_cycles(&g);
        let removed = break_cycles(&mut g, &cycles);
        assert_eq!(removed, vec![Edge::new("b", "a")]);
        assert!(detect_cycles(&g).is_empty());
        assert_eq!(g.all_edges(), &[Edge::new("a", "b")]);
    }

    #[test]
    fn test_highest_in_degree_target_chosen() {
        // c has an extra parent x, so the edge entering c goes.
        let mut g = graph(
            &["x", "a", "b", "c"],
            &[("x", "c"), ("a", "b"), ("b", "c"), ("c", "a")],
        );
        let cycles = detect_cycles(&g);
        let removed = break_cycles(&mut g, &cycles);
        assert_eq!(removed, vec![Edge::new("b", "c")]);
        assert!(detect_cycles(&g).is_empty());
    }

    #[test]
    fn test_opened_cycle_is_skipped() {
        let mut g = graph(&["a", "b"], &[("a", "b"), ("b", "a")]);
        let cycles = detect_cycles(&g);
        let twice = vec![cycles[0].clone(), cycles[0].clone()];
        assert_eq!(break_cycles(&mut g, &twice).len(), 1);
    }

    #[test]
    fn test_make_acyclic_handles_hidden_cycles() {
        // Overlapping cycles; one DFS pass reports only some of them.
        let mut g = graph(
            &["a", "b", "c"],
            &[("a", "b"), ("b", "c"), ("c", "a"), ("b", "a"), ("c", "b")],
        );
        let removed = make_acyclic(&mut g);
        assert!(!removed.is_empty());
        assert!(detect_cycles(&g).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let build = || {
            graph(
                &["a", "b", "c", "d"],
                &[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d"), ("d", "b")],
            )
        };
        let mut g1 = build();
        let mut g2 = build();
        assert_eq!(make_acyclic(&mut g1), make_acyclic(&mut g2));
    }
}
