//! Path queries over a causal graph.

use petgraph::graph::NodeIndex;
use petgraph::Direction;

use crate::domain::graph::CausalGraph;
use crate::errors::PathError;

pub const DEFAULT_MAX_PATHS: usize = 10;

fn lookup(graph: &CausalGraph, node: &str) -> Result<NodeIndex, PathError> {
    graph.index_of(node).ok_or_else(|| PathError::NodeNotFound {
        node: node.to_string(),
    })
}

/// Depth-bounded enumeration of paths ending at `target`.
///
/// `shortest[v]` / `longest[v]` are edge counts from `v` to `target`
/// (`None` when unreachable), so every expanded prefix can still be
/// completed within the current depth.
struct PathSearch {
    children: Vec<Vec<NodeIndex>>,
    shortest: Vec<Option<usize>>,
    longest: Vec<Option<usize>>,
    target: NodeIndex,
    limit: usize,
    found: Vec<Vec<NodeIndex>>,
}

impl PathSearch {
    fn new(graph: &CausalGraph, target: NodeIndex, limit: usize) -> Self {
        let inner = graph.inner();
        let n = inner.node_count();
        let children: Vec<Vec<NodeIndex>> = inner
            .node_indices()
            .map(|i| {
                let mut out: Vec<NodeIndex> =
                    inner.neighbors_directed(i, Direction::Outgoing).collect();
                out.sort_by(|a, b| inner[*a].id.cmp(&inner[*b].id));
                out.dedup();
                out
            })
            .collect();

        let mut shortest = vec![None; n];
        let mut longest = vec![None; n];
        shortest[target.index()] = Some(0);
        longest[target.index()] = Some(0);
        for v in graph.kahn_order().into_iter().rev() {
            if v == target {
                continue;
            }
            for c in &children[v.index()] {
                if let (Some(s), Some(l)) = (shortest[c.index()], longest[c.index()]) {
                    shortest[v.index()] =
                        Some(shortest[v.index()].map_or(s + 1, |cur: usize| cur.min(s + 1)));
                    longest[v.index()] =
                        Some(longest[v.index()].map_or(l + 1, |cur: usize| cur.max(l + 1)));
                }
            }
        }

        Self {
            children,
            shortest,
            longest,
            target,
            limit,
            found: Vec::new(),
        }
    }

    /// Extend `path` by exactly `remaining` edges, children in id order.
    fn extend(&mut self, path: &mut Vec<NodeIndex>, remaining: usize) {
        let Some(&last) = path.last() else {
            return;
        };
        if remaining == 0 {
            if last == self.target {
                self.found.push(path.clone());
            }
            return;
        }
        for i in 0..self.children[last.index()].len() {
            if self.found.len() >= self.limit {
                return;
            }
            let next = self.children[last.index()][i];
            let fits = matches!(
                (self.shortest[next.index()], self.longest[next.index()]),
                (Some(s), Some(l)) if s < remaining && remaining <= l + 1
            );
            if fits {
                path.push(next);
                self.extend(path, remaining - 1);
                path.pop();
            }
        }
    }
}

/// Simple directed paths from `source` to `target`, shortest first.
///
/// Paths of equal length are ordered by their id sequence. Lengths are
/// explored in increasing order and the search stops as soon as
/// `max_paths` paths are complete, so the cost follows the output size
/// rather than the total number of paths.
pub fn causal_paths(
    graph: &CausalGraph,
    source: &str,
    target: &str,
    max_paths: usize,
) -> Result<Vec<Vec<String>>, PathError> {
    let from = lookup(graph, source)?;
    let to = lookup(graph, target)?;
    if max_paths == 0 {
        return Ok(Vec::new());
    }

    let mut search = PathSearch::new(graph, to, max_paths);
    let (Some(min_len), Some(max_len)) =
        (search.shortest[from.index()], search.longest[from.index()])
    else {
        return Ok(Vec::new());
    };

    let mut path = vec![from];
    for depth in min_len..=max_len {
        search.extend(&mut path, depth);
        if search.found.len() >= max_paths {
            break;
        }
    }

    let inner = graph.inner();
    Ok(search
        .found
        .into_iter()
        .map(|p| p.into_iter().map(|i| inner[i].id.clone()).collect())
        .collect())
}

/// Root ancestors of `node`, sorted. A root is its own root cause.
pub fn root_causes(graph: &CausalGraph, node: &str) -> Result<Vec<String>, PathError> {
    lookup(graph, node)?;
    if graph.is_root(node) {
        return Ok(vec![node.to_string()]);
    }
    Ok(graph
        .ancestors(node)
        .into_iter()
        .filter(|a| graph.is_root(a))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{CausalEdge, CausalNode, EdgeType, NodeKind};

    fn graph(edges: &[(&str, &str)]) -> CausalGraph {
        let mut ids: Vec<&str> = edges.iter().flat_map(|(s, t)| [*s, *t]).collect();
        ids.sort();
        ids.dedup();
        CausalGraph::from_parts(
            ids.into_iter()
                .map(|id| CausalNode::new(id, NodeKind::Variable))
                .collect(),
            edges
                .iter()
                .map(|(s, t)| CausalEdge::new(*s, *t, EdgeType::DataFlow))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_paths_sorted_by_length_then_ids() {
        let g = graph(&[
            ("a", "c"),
            ("a", "b"),
            ("b", "d"),
            ("c", "d"),
            ("a", "d"),
            ("b", "c"),
        ]);
        let paths = causal_paths(&g, "a", "d", 10).unwrap();
        assert_eq!(
            paths,
            vec![
                vec!["a", "d"],
                vec!["a", "b", "d"],
                vec!["a", "c", "d"],
                vec!["a", "b", "c", "d"],
            ]
        );
        assert_eq!(causal_paths(&g, "a", "d", 2).unwrap().len(), 2);
    }

    #[test]
    fn test_trivial_and_unreachable() {
        let g = graph(&[("a", "b"), ("c", "b")]);
        assert_eq!(causal_paths(&g, "a", "a", 10).unwrap(), vec![vec!["a"]]);
        assert!(causal_paths(&g, "b", "a", 10).unwrap().is_empty());
        assert_eq!(
            causal_paths(&g, "a", "nope", 10),
            Err(PathError::NodeNotFound {
                node: "nope".into()
            })
        );
    }

    #[test]
    fn test_root_causes() {
        let g = graph(&[("a", "b"), ("c", "b"), ("b", "d")]);
        assert_eq!(root_causes(&g, "d").unwrap(), vec!["a", "c"]);
        assert_eq!(root_causes(&g, "a").unwrap(), vec!["a"]);
    }

    #[test]
    fn test_wide_layered_graph_stops_at_limit() {
        // 4 nodes per layer, fully connected between layers: 4^12 long paths.
        let layer = |k: usize| -> Vec<String> { (0..4).map(|j| format!("l{:02}_{}", k, j)).collect() };
        let mut edges: Vec<(String, String)> = vec![("src".into(), "dst".into())];
        for n in layer(0) {
            edges.push(("src".into(), n));
        }
        for k in 0..11 {
            for a in layer(k) {
                for b in layer(k + 1) {
                    edges.push((a.clone(), b));
                }
            }
        }
        for n in layer(11) {
            edges.push((n, "dst".into()));
        }
        let refs: Vec<(&str, &str)> = edges.iter().map(|(s, t)| (s.as_str(), t.as_str())).collect();
        let g = graph(&refs);

        assert_eq!(causal_paths(&g, "src", "dst", 1).unwrap(), vec![vec!["src", "dst"]]);

        let paths = causal_paths(&g, "src", "dst", 3).unwrap();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0], vec!["src", "dst"]);
        let mut second: Vec<String> = vec!["src".into()];
        second.extend((0..12).map(|k| format!("l{:02}_0", k)));
        second.push("dst".into());
        assert_eq!(paths[1], second);
        let mut third = second.clone();
        third[12] = "l11_1".into();
        assert_eq!(paths[2], third);
    }

    #[test]
    fn test_mixed_lengths_skip_dead_ends() {
        // "x" is a dead end; "a -> e" only reaches the target in 3 edges.
        let g = graph(&[
            ("s", "a"),
            ("s", "x"),
            ("a", "t"),
            ("a", "e"),
            ("e", "f"),
            ("f", "t"),
            ("s", "t"),
        ]);
        assert_eq!(
            causal_paths(&g, "s", "t", 10).unwrap(),
            vec![
                vec!["s", "t"],
                vec!["s", "a", "t"],
                vec!["s", "a", "e", "f", "t"],
            ]
        );
        assert!(causal_paths(&g, "s", "t", 0).unwrap().is_empty());
    }
}
