//! Graph Builder
//!
//! Turns program elements and relations into a validated causal DAG:
//! duplicate relations collapse to their strongest edge type, non-causal
//! relations and side-effect-only sinks are pruned, and cycles fail the build.

use crate::domain::element::{ControlDependency, ProgramElement, Relation};
use crate::domain::graph::{CausalEdge, CausalGraph, CausalNode, EdgeType, NodeKind};
use crate::errors::GraphBuildError;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Default name patterns of logging / printing facilities.
pub const DEFAULT_SIDE_EFFECT_PATTERNS: &[&str] = &[
    "log", "logger", "logging", "print", "println", "eprint", "eprintln", "dbg", "trace",
    "debug", "info", "warn", "metrics",
];

/// Attribute that marks a node as a pure side-effect emitter regardless of its name.
pub const PURE_SIDE_EFFECT_ATTR: &str = "pure_side_effect";

/// Decides whether a node only emits side effects (logging, printing) that
/// nothing downstream can observe.
pub trait SideEffectClassifier: Send + Sync {
    fn is_pure_side_effect(&self, node: &CausalNode) -> bool;
}

/// Classifies effect and function nodes by the last segment of their id.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    patterns: Vec<String>,
}

impl PatternClassifier {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .collect(),
        }
    }

    /// `crate::fn::println!@12` -> `println`
    fn callee_name(id: &str) -> String {
        let last = id.rsplit("::").next().unwrap_or(id);
        let last = last.rsplit('.').next().unwrap_or(last);
        let last = last.split('@').next().unwrap_or(last);
        last.trim_end_matches('!').to_lowercase()
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_SIDE_EFFECT_PATTERNS.iter().copied())
    }
}

impl SideEffectClassifier for PatternClassifier {
    fn is_pure_side_effect(&self, node: &CausalNode) -> bool {
        if node
            .attributes
            .get(PURE_SIDE_EFFECT_ATTR)
            .is_some_and(|v| v == "true")
        {
            return true;
        }
        if !matches!(node.kind, NodeKind::Effect | NodeKind::Function) {
            return false;
        }
        let name = Self::callee_name(&node.id);
        self.patterns
            .iter()
            .any(|p| name == *p || name.starts_with(&format!("{}_", p)))
    }
}

/// What the builder did besides producing the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Relations folded into an already existing edge.
    pub merged_relations: usize,
    /// Import / declaration relations that carry no runtime dependency.
    pub non_causal_relations: usize,
    /// Side-effect sinks removed, with their incoming edges.
    pub pruned_sinks: Vec<String>,
}

pub struct GraphBuilder {
    classifier: Box<dyn SideEffectClassifier>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::with_classifier(PatternClassifier::default())
    }

    pub fn with_classifier(classifier: impl SideEffectClassifier + 'static) -> Self {
        Self {
            classifier: Box::new(classifier),
        }
    }

    pub fn build(
        &self,
        elements: &[ProgramElement],
        relations: &[Relation],
        control_flow: Option<&[ControlDependency]>,
    ) -> Result<CausalGraph, GraphBuildError> {
        self.build_with_report(elements, relations, control_flow)
            .map(|(graph, _)| graph)
    }

    pub fn build_with_report(
        &self,
        elements: &[ProgramElement],
        relations: &[Relation],
        control_flow: Option<&[ControlDependency]>,
    ) -> Result<(CausalGraph, BuildReport), GraphBuildError> {
        if elements.is_empty() {
            return Err(GraphBuildError::EmptyInput);
        }

        let mut seen = HashSet::with_capacity(elements.len());
        for el in elements {
            if !seen.insert(el.id.as_str()) {
                return Err(GraphBuildError::DuplicateElement { id: el.id.clone() });
            }
        }

        let mut report = BuildReport::default();
        let mut merged: BTreeMap<(String, String), (EdgeType, Option<f64>)> = BTreeMap::new();

        let control = control_flow.unwrap_or(&[]).iter().map(|c| Relation {
            source: c.predicate.clone(),
            target: c.dependent.clone(),
            kind: crate::domain::element::RelationKind::ControlFlow,
            weight: None,
        });

        for rel in relations.iter().cloned().chain(control) {
            for endpoint in [&rel.source, &rel.target] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(GraphBuildError::UnknownEndpoint {
                        source_id: rel.source.clone(),
                        target_id: rel.target.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }

            if let Some(w) = rel.weight.filter(|w| !w.is_finite()) {
                return Err(GraphBuildError::NonFiniteWeight {
                    source_id: rel.source.clone(),
                    target_id: rel.target.clone(),
                    weight: w,
                });
            }

            let Some(edge_type) = rel.kind.edge_type() else {
                report.non_causal_relations += 1;
                continue;
            };

            match merged.get_mut(&(rel.source.clone(), rel.target.clone())) {
                Some((existing, weight)) => {
                    report.merged_relations += 1;
                    *existing = (*existing).max(edge_type);
                    *weight = match (*weight, rel.weight) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        (a, b) => a.or(b),
                    };
                }
                None => {
                    merged.insert((rel.source, rel.target), (edge_type, rel.weight));
                }
            }
        }

        let nodes: Vec<CausalNode> = elements
            .iter()
            .map(|el| CausalNode {
                id: el.id.clone(),
                kind: el.kind,
                attributes: el.attributes.clone(),
            })
            .collect();

        let mut edges: Vec<CausalEdge> = merged
            .into_iter()
            .map(|((source, target), (edge_type, weight))| CausalEdge {
                source,
                target,
                edge_type,
                weight,
            })
            .collect();

        let removed = self.prune_sinks(&nodes, &mut edges);
        let nodes: Vec<CausalNode> = nodes
            .into_iter()
            .filter(|n| !removed.contains(&n.id))
            .collect();
        if nodes.is_empty() {
            return Err(GraphBuildError::EmptyAfterPruning);
        }
        report.pruned_sinks = {
            let mut pruned: Vec<String> = removed.into_iter().collect();
            pruned.sort();
            pruned
        };

        let graph = CausalGraph::from_parts(nodes, edges)?;
        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            merged = report.merged_relations,
            non_causal = report.non_causal_relations,
            pruned = report.pruned_sinks.len(),
            "causal graph built"
        );
        Ok((graph, report))
    }

    /// Remove side-effect sinks until none remain; removing one may expose another.
    fn prune_sinks(&self, nodes: &[CausalNode], edges: &mut Vec<CausalEdge>) -> HashSet<String> {
        let mut out_degree: HashMap<&str, usize> = HashMap::new();
        for e in edges.iter() {
            *out_degree.entry(e.source.as_str()).or_default() += 1;
        }

        let mut removed: HashSet<String> = HashSet::new();
        loop {
            let sinks: HashSet<String> = nodes
                .iter()
                .filter(|n| !removed.contains(&n.id))
                .filter(|n| out_degree.get(n.id.as_str()).copied().unwrap_or(0) == 0)
                .filter(|n| self.classifier.is_pure_side_effect(n))
                .map(|n| n.id.clone())
                .collect();
            if sinks.is_empty() {
                break;
            }

            for e in edges.iter().filter(|e| sinks.contains(&e.target)) {
                if let Some(d) = out_degree.get_mut(e.source.as_str()) {
                    *d -= 1;
                }
            }
            removed.extend(sinks);
        }

        edges.retain(|e| !removed.contains(&e.target));
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::element::RelationKind;

    fn el(id: &str, kind: NodeKind) -> ProgramElement {
        ProgramElement::new(id, kind)
    }

    #[test]
    fn test_strongest_edge_type_wins() {
        let elements = vec![el("a", NodeKind::Function), el("b", NodeKind::Function)];
        let relations = vec![
            Relation::new("a", "b", RelationKind::DataFlow),
            Relation::new("a", "b", RelationKind::Call).with_weight(0.4),
            Relation::new("a", "b", RelationKind::ControlFlow).with_weight(0.9),
        ];
        let (g, report) = GraphBuilder::new()
            .build_with_report(&elements, &relations, None)
            .unwrap();
        assert_eq!(g.edge_count(), 1);
        let edge = g.edge("a", "b").unwrap();
        assert_eq!(edge.edge_type, EdgeType::Call);
        assert_eq!(edge.weight, Some(0.9));
        assert_eq!(report.merged_relations, 2);
    }

    #[test]
    fn test_import_relations_dropped() {
        let elements = vec![el("a", NodeKind::Variable), el("b", NodeKind::Variable)];
        let relations = vec![
            Relation::new("a", "b", RelationKind::Import),
            Relation::new("b", "a", RelationKind::Declaration),
        ];
        let (g, report) = GraphBuilder::new()
            .build_with_report(&elements, &relations, None)
            .unwrap();
        assert_eq!(g.edge_count(), 0);
        assert_eq!(report.non_causal_relations, 2);
    }

    #[test]
    fn test_pruning_reaches_fixed_point() {
        // compute -> log_result -> println!: once println! goes, log_result becomes a sink.
        let elements = vec![
            el("compute", NodeKind::Function),
            el("log_result", NodeKind::Function),
            el("println!@3", NodeKind::Effect),
            el("write_file", NodeKind::Effect),
        ];
        let relations = vec![
            Relation::new("compute", "log_result", RelationKind::Call),
            Relation::new("log_result", "println!@3", RelationKind::DataFlow),
            Relation::new("compute", "write_file", RelationKind::DataFlow),
        ];
        let (g, report) = GraphBuilder::new()
            .build_with_report(&elements, &relations, None)
            .unwrap();
        assert_eq!(report.pruned_sinks, vec!["log_result", "println!@3"]);
        assert!(g.contains("write_file"));
        assert_eq!(g.children("compute"), vec!["write_file"]);
    }

    #[test]
    fn test_logging_with_outgoing_edges_is_kept() {
        let elements = vec![el("logger", NodeKind::Function), el("x", NodeKind::Variable)];
        let relations = vec![Relation::new("logger", "x", RelationKind::DataFlow)];
        let g = GraphBuilder::new().build(&elements, &relations, None).unwrap();
        assert!(g.contains("logger"));
    }

    #[test]
    fn test_control_flow_list_adds_edges() {
        let elements = vec![el("cond", NodeKind::Variable), el("y", NodeKind::Variable)];
        let control = vec![ControlDependency {
            predicate: "cond".into(),
            dependent: "y".into(),
        }];
        let g = GraphBuilder::new()
            .build(&elements, &[], Some(&control))
            .unwrap();
        assert_eq!(g.edge("cond", "y").unwrap().edge_type, EdgeType::ControlFlow);
    }

    #[test]
    fn test_errors() {
        let builder = GraphBuilder::new();
        assert_eq!(
            builder.build(&[], &[], None).unwrap_err(),
            GraphBuildError::EmptyInput
        );

        let dup = vec![el("a", NodeKind::Variable), el("a", NodeKind::Return)];
        assert!(matches!(
            builder.build(&dup, &[], None),
            Err(GraphBuildError::DuplicateElement { .. })
        ));

        let one = vec![el("a", NodeKind::Variable)];
        let dangling = vec![Relation::new("a", "ghost", RelationKind::DataFlow)];
        assert!(matches!(
            builder.build(&one, &dangling, None),
            Err(GraphBuildError::UnknownEndpoint { .. })
        ));

        let pair = vec![el("a", NodeKind::Variable), el("b", NodeKind::Variable)];
        for bad in [f64::NAN, f64::INFINITY] {
            let rel = vec![Relation::new("a", "b", RelationKind::DataFlow).with_weight(bad)];
            assert!(matches!(
                builder.build(&pair, &rel, None),
                Err(GraphBuildError::NonFiniteWeight { .. })
            ));
        }

        let only_log = vec![el("info!@1", NodeKind::Effect)];
        assert_eq!(
            builder.build(&only_log, &[], None).unwrap_err(),
            GraphBuildError::EmptyAfterPruning
        );
    }

    #[test]
    fn test_attribute_marks_side_effect() {
        let classifier = PatternClassifier::new(Vec::<String>::new());
        let node = CausalNode {
            id: "emit".into(),
            kind: NodeKind::Variable,
            attributes: [(PURE_SIDE_EFFECT_ATTR.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        };
        assert!(classifier.is_pure_side_effect(&node));
    }
}
