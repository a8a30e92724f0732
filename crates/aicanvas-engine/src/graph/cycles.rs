use std::collections::HashMap;

use super::store::GraphStore;

/// A closed walk `[a, b, c, a]`.
pub type Cycle = Vec<String>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Report the cycles found by a three-color depth-first search.
///
/// Roots and children are visited in insertion order, so the result is
/// stable across calls. Every node on a reported cycle belongs to it; the
/// search does not enumerate every elementary cycle of a dense graph.
pub fn detect_cycles(graph: &GraphStore) -> Vec<Cycle> {
    let adjacency = graph.adjacency();
    let mut color: HashMap<&str, Color> = graph
        .all_nodes()
        .iter()
        .map(|n| (n.id.as_str(), Color::White))
        .collect();
    let mut cycles = Vec::new();

    for node in graph.all_nodes() {
        if color[node.id.as_str()] == Color::White {
            visit(node.id.as_str(), &adjacency, &mut color, &mut cycles);
        }
    }

    cycles
}

/// Iterative DFS from `root`; each frame keeps its own child cursor, so
/// depth is bounded by the heap rather than the call stack.
fn visit<'a, 'b>(
    root: &'a str,
    adjacency: &'b HashMap<&'a str, Vec<&'a str>>,
    color: &mut HashMap<&'a str, Color>,
    cycles: &mut Vec<Cycle>,
) {
    color.insert(root, Color::Gray);
    let mut frames: Vec<(&'a str, std::slice::Iter<'b, &'a str>)> =
        vec![(root, children(adjacency, root))];

    while let Some((_, cursor)) = frames.last_mut() {
        let Some(&child) = cursor.next() else {
            if let Some((id, _)) = frames.pop() {
                color.insert(id, Color::Black);
            }
            continue;
        };

        match color.get(child).copied().unwrap_or(Color::Black) {
            Color::White => {
                color.insert(child, Color::Gray);
                frames.push((child, children(adjacency, child)));
            }
            Color::Gray => {
                if let Some(start) = frames.iter().position(|(n, _)| *n == child) {
                    let mut cycle: Cycle = frames[start..].iter().map(|(n, _)| n.to_string()).collect();
                    cycle.push(child.to_string());
                    cycles.push(cycle);
                }
            }
            Color::Black => {}
        }
    }
}

fn children<'a, 'b>(
    adjacency: &'b HashMap<&'a str, Vec<&'a str>>,
    id: &str,
) -> std::slice::Iter<'b, &'a str> {
    adjacency.get(id).map(|c| c.iter()).unwrap_or_default()
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
    fn test_acyclic_graph_has_no_cycles() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("a", "c")]);
        assert!(detect_cycles(&g).is_empty());
    }

    #[test]
    fn test_two_node_cycle() {
        let g = graph(&["a", "b"], &[("a", "b"), ("b", "a")]);
        assert_eq!(detect_cycles(&g), vec![vec!["a", "b", "a"]]);
    }

    #[test]
    fn test_three_node_cycle() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "a")]);
        let cycles = detect_cycles(&g);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec!["a", "b", "c", "a"]);
        assert_eq!(cycles[0].len() - 1, 3);
    }

    #[test]
    fn test_cycle_not_reachable_from_first_root() {
        let g = graph(&["x", "a", "b"], &[("a", "b"), ("b", "a")]);
        assert_eq!(detect_cycles(&g), vec![vec!["a", "b", "a"]]);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let ids: Vec<String> = (0..20_000).map(|i| format!("n{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut edges: Vec<(&str, &str)> = refs.windows(2).map(|w| (w[0], w[1])).collect();
        let g = graph(&refs, &edges);
        assert!(detect_cycles(&g).is_empty());

        edges.push((refs[refs.len() - 1], refs[0]));
        let g = graph(&refs, &edges);
        let cycles = detect_cycles(&g);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), refs.len() + 1);
    }

    #[test]
    fn test_repeated_detection_is_stable() {
        let g = graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "a"), ("c", "d"), ("d", "c"), ("b", "c")],
        );
        let first = detect_cycles(&g);
        assert_eq!(first.len(), 2);
        for _ in 0..5 {
            assert_eq!(detect_cycles(&g), first);
        }
    }
}
