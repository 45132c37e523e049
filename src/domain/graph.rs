// Causal graph structures for lift-causal.
// Nodes are code elements, edges are cause -> effect relationships. The graph is a DAG
// and read-only once constructed.

use crate::errors::GraphBuildError;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::fmt;
use std::str::FromStr;

/// What a node stands for in the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Function,
    Variable,
    Return,
    Effect,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Function => "function",
            NodeKind::Variable => "variable",
            NodeKind::Return => "return",
            NodeKind::Effect => "effect",
        }
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(NodeKind::Function),
            "variable" => Ok(NodeKind::Variable),
            "return" => Ok(NodeKind::Return),
            "effect" => Ok(NodeKind::Effect),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge types, ordered by strength: a call implies control and data dependence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    DataFlow,
    ControlFlow,
    Call,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::DataFlow => "data_flow",
            EdgeType::ControlFlow => "control_flow",
            EdgeType::Call => "call",
        }
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data_flow" => Ok(EdgeType::DataFlow),
            "control_flow" => Ok(EdgeType::ControlFlow),
            "call" => Ok(EdgeType::Call),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the causal graph.
#[derive(Debug, Clone, PartialEq)]
pub struct CausalNode {
    pub id: String,
    pub kind: NodeKind,
    pub attributes: BTreeMap<String, String>,
}

/// A directed cause -> effect edge.
#[derive(Debug, Clone, PartialEq)]
pub struct CausalEdge {
    pub source: String,
    pub target: String,
    pub edge_type: EdgeType,
    pub weight: Option<f64>,
}

impl CausalNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            attributes: BTreeMap::new(),
        }
    }
}

impl CausalEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, edge_type: EdgeType) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            edge_type,
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// The causal DAG.
#[derive(Debug, Clone)]
pub struct CausalGraph {
    graph: DiGraph<CausalNode, EdgeType>,
    index: HashMap<String, NodeIndex>,
    edges: Vec<CausalEdge>,
}

impl CausalGraph {
    /// Assemble a graph from nodes and edges, rejecting unknown endpoints and cycles.
    ///
    /// Node order is preserved; edges are kept sorted by (source, target).
    pub fn from_parts(
        nodes: Vec<CausalNode>,
        mut edges: Vec<CausalEdge>,
    ) -> Result<Self, GraphBuildError> {
        if nodes.is_empty() {
            return Err(GraphBuildError::EmptyInput);
        }

        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut index = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if index.contains_key(&node.id) {
                return Err(GraphBuildError::DuplicateElement { id: node.id });
            }
            let id = node.id.clone();
            let idx = graph.add_node(node);
            index.insert(id, idx);
        }

        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
        edges.dedup_by(|a, b| a.source == b.source && a.target == b.target);

        for edge in &edges {
            let lookup = |id: &str| {
                index
                    .get(id)
                    .copied()
                    .ok_or_else(|| GraphBuildError::UnknownEndpoint {
                        source_id: edge.source.clone(),
                        target_id: edge.target.clone(),
                        missing: id.to_string(),
                    })
            };
            let s = lookup(&edge.source)?;
            let t = lookup(&edge.target)?;
            if let Some(w) = edge.weight.filter(|w| !w.is_finite()) {
                return Err(GraphBuildError::NonFiniteWeight {
                    source_id: edge.source.clone(),
                    target_id: edge.target.clone(),
                    weight: w,
                });
            }
            graph.add_edge(s, t, edge.edge_type);
        }

        let built = Self {
            graph,
            index,
            edges,
        };
        built.check_acyclic()?;
        Ok(built)
    }

    fn check_acyclic(&self) -> Result<(), GraphBuildError> {
        let order = self.kahn_order();
        if order.len() == self.graph.node_count() {
            return Ok(());
        }

        // Nodes left unvisited by the sort lie on or downstream of a cycle;
        // report the strongly connected components that actually loop.
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.find_edge(scc[0], scc[0]).is_some()
            })
            .map(|scc| {
                let mut ids: Vec<String> =
                    scc.iter().map(|&i| self.graph[i].id.clone()).collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();
        tracing::warn!(cycles = cycles.len(), "causal graph contains cycles");
        Err(GraphBuildError::CycleDetected { cycles })
    }

    /// Kahn's algorithm with ties broken by insertion order, so the order is stable.
    pub(crate) fn kahn_order(&self) -> Vec<NodeIndex> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|i| self.graph.neighbors_directed(i, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(i)) = ready.pop() {
            let idx = NodeIndex::new(i);
            order.push(idx);
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let d = &mut in_degree[next.index()];
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }
        order
    }

    /// Node ids in a topological order (parents before children).
    pub fn topological_order(&self) -> Vec<String> {
        self.kahn_order()
            .into_iter()
            .map(|i| self.graph[i].id.clone())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&CausalNode> {
        self.index.get(id).map(|&i| &self.graph[i])
    }

    /// Nodes in construction order.
    pub fn nodes(&self) -> impl Iterator<Item = &CausalNode> {
        self.graph.node_indices().map(move |i| &self.graph[i])
    }

    /// Edges sorted by (source, target).
    pub fn edges(&self) -> &[CausalEdge] {
        &self.edges
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&CausalEdge> {
        self.edges
            .binary_search_by(|e| (e.source.as_str(), e.target.as_str()).cmp(&(source, target)))
            .ok()
            .map(|i| &self.edges[i])
    }

    /// Direct causes of a node, sorted by id.
    pub fn parents(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct effects of a node, sorted by id.
    pub fn children(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, dir: Direction) -> Vec<&str> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].id.as_str())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn is_root(&self, id: &str) -> bool {
        self.index.get(id).is_some_and(|&i| {
            self.graph
                .neighbors_directed(i, Direction::Incoming)
                .next()
                .is_none()
        })
    }

    /// Strict descendants of a node (the node itself excluded).
    pub fn descendants(&self, id: &str) -> BTreeSet<String> {
        self.reachable(id, Direction::Outgoing)
    }

    /// Strict ancestors of a node (the node itself excluded).
    pub fn ancestors(&self, id: &str) -> BTreeSet<String> {
        self.reachable(id, Direction::Incoming)
    }

    fn reachable(&self, id: &str, dir: Direction) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let Some(&start) = self.index.get(id) else {
            return out;
        };
        let mut stack = vec![start];
        let mut seen = vec![false; self.graph.node_count()];
        seen[start.index()] = true;
        while let Some(current) = stack.pop() {
            for next in self.graph.neighbors_directed(current, dir) {
                if !seen[next.index()] {
                    seen[next.index()] = true;
                    out.insert(self.graph[next].id.clone());
                    stack.push(next);
                }
            }
        }
        out
    }

    pub(crate) fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub(crate) fn inner(&self) -> &DiGraph<CausalNode, EdgeType> {
        &self.graph
    }
}
