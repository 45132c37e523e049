use std::collections::{BTreeSet, HashMap};

use lift_causal::api;
use lift_causal::domain::element::{ControlDependency, ProgramElement, Relation, RelationKind};
use lift_causal::domain::graph::{EdgeType, NodeKind};
use lift_causal::errors::GraphBuildError;
use proptest::prelude::*;

fn variables(n: usize) -> Vec<ProgramElement> {
    (0..n)
        .map(|i| ProgramElement::new(format!("n{i}"), NodeKind::Variable))
        .collect()
}

/// Forward-only pairs over `0..n` form a DAG.
fn forward_edges(n: usize) -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..n, 0..n), 0..(n * 3))
        .prop_map(|pairs| pairs.into_iter().filter(|(a, b)| a < b).collect())
}

fn dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2usize..24).prop_flat_map(|n| (Just(n), forward_edges(n)))
}

fn relations(edges: &[(usize, usize)], kind: RelationKind) -> Vec<Relation> {
    edges
        .iter()
        .map(|(a, b)| Relation::new(format!("n{a}"), format!("n{b}"), kind))
        .collect()
}

proptest! {
    #[test]
    fn random_dags_build_and_order_topologically((n, edges) in dag()) {
        let graph = api::build(&variables(n), &relations(&edges, RelationKind::DataFlow), None)
            .unwrap();

        let distinct: BTreeSet<_> = edges.iter().collect();
        prop_assert_eq!(graph.node_count(), n);
        prop_assert_eq!(graph.edge_count(), distinct.len());

        let order = graph.topological_order();
        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        for edge in graph.edges() {
            prop_assert!(position[edge.source.as_str()] < position[edge.target.as_str()]);
        }
        for id in &order {
            prop_assert!(!graph.descendants(id).contains(id));
        }
    }

    #[test]
    fn any_back_edge_is_rejected((n, edges) in dag(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!edges.is_empty());
        let &(a, b) = pick.get(&edges);
        let mut all = relations(&edges, RelationKind::DataFlow);
        all.push(Relation::new(format!("n{b}"), format!("n{a}"), RelationKind::Call));

        let result = api::build(&variables(n), &all, None);
        prop_assert!(
            matches!(result, Err(GraphBuildError::CycleDetected { .. })),
            "expected a cycle error"
        );
    }
}

#[test]
fn duplicate_relations_keep_strongest_type() {
    let elements = variables(2);
    let rels = vec![
        Relation::new("n0", "n1", RelationKind::DataFlow),
        Relation::new("n0", "n1", RelationKind::Call),
        Relation::new("n0", "n1", RelationKind::Import),
    ];
    let control = vec![ControlDependency {
        predicate: "n0".into(),
        dependent: "n1".into(),
    }];
    let graph = api::build(&elements, &rels, Some(&control)).unwrap();
    assert_eq!(graph.edge_count(), 1);
    assert_eq!(graph.edge("n0", "n1").unwrap().edge_type, EdgeType::Call);
}

#[test]
fn structural_errors() {
    assert_eq!(api::build(&[], &[], None).unwrap_err(), GraphBuildError::EmptyInput);

    let dup = vec![
        ProgramElement::new("x", NodeKind::Variable),
        ProgramElement::new("x", NodeKind::Return),
    ];
    assert!(matches!(
        api::build(&dup, &[], None),
        Err(GraphBuildError::DuplicateElement { .. })
    ));

    let dangling = vec![Relation::new("n0", "ghost", RelationKind::DataFlow)];
    assert!(matches!(
        api::build(&variables(1), &dangling, None),
        Err(GraphBuildError::UnknownEndpoint { .. })
    ));
}

#[test]
fn logging_sinks_are_pruned() {
    let elements = vec![
        ProgramElement::new("svc::handle::req", NodeKind::Variable),
        ProgramElement::new("svc::handle::println!@4", NodeKind::Effect),
        ProgramElement::new("svc::handle::return", NodeKind::Return),
    ];
    let rels = vec![
        Relation::new("svc::handle::req", "svc::handle::println!@4", RelationKind::DataFlow),
        Relation::new("svc::handle::req", "svc::handle::return", RelationKind::DataFlow),
    ];
    let graph = api::build(&elements, &rels, None).unwrap();
    assert!(!graph.contains("svc::handle::println!@4"));
    assert_eq!(graph.children("svc::handle::req"), vec!["svc::handle::return"]);
}
