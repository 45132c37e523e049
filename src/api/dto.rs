use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::graph::{CausalEdge, CausalGraph, CausalNode, EdgeType, NodeKind};
use crate::errors::GraphBuildError;

/// JSON shape of a causal graph, as written by `lift-causal extract`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDto {
    pub nodes: Vec<NodeDto>,
    pub edges: Vec<EdgeDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDto {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDto {
    pub source: String,
    pub target: String,
    pub edge_type: EdgeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl From<&CausalGraph> for GraphDto {
    fn from(graph: &CausalGraph) -> Self {
        let nodes = graph
            .nodes()
            .map(|n| NodeDto {
                id: n.id.clone(),
                kind: n.kind,
                attributes: n.attributes.clone(),
            })
            .collect();
        let edges = graph
            .edges()
            .iter()
            .map(|e| EdgeDto {
                source: e.source.clone(),
                target: e.target.clone(),
                edge_type: e.edge_type,
                weight: e.weight,
            })
            .collect();
        GraphDto { nodes, edges }
    }
}

impl TryFrom<GraphDto> for CausalGraph {
    type Error = GraphBuildError;

    /// Re-validates the graph: unknown endpoints and cycles are rejected.
    fn try_from(dto: GraphDto) -> Result<Self, Self::Error> {
        let nodes = dto
            .nodes
            .into_iter()
            .map(|n| CausalNode {
                id: n.id,
                kind: n.kind,
                attributes: n.attributes,
            })
            .collect();
        let edges = dto
            .edges
            .into_iter()
            .map(|e| CausalEdge {
                source: e.source,
                target: e.target,
                edge_type: e.edge_type,
                weight: e.weight,
            })
            .collect();
        CausalGraph::from_parts(nodes, edges)
    }
}

/// Reply body of a `PATHS` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsDto {
    pub source: String,
    pub target: String,
    pub paths: Vec<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_dto_json_shape() {
        let graph = CausalGraph::from_parts(
            vec![
                CausalNode::new("a", NodeKind::Variable),
                CausalNode::new("b", NodeKind::Return),
            ],
            vec![CausalEdge::new("a", "b", EdgeType::DataFlow).with_weight(2.0)],
        )
        .unwrap();

        let json = serde_json::to_value(GraphDto::from(&graph)).unwrap();
        assert_eq!(json["nodes"][0]["kind"], "variable");
        assert_eq!(json["edges"][0]["edge_type"], "data_flow");
        assert_eq!(json["edges"][0]["weight"], 2.0);
        assert!(json["nodes"][0].get("attributes").is_none());

        let back: GraphDto = serde_json::from_value(json).unwrap();
        let rebuilt = CausalGraph::try_from(back).unwrap();
        assert_eq!(rebuilt.parents("b"), vec!["a"]);
    }

    #[test]
    fn test_cyclic_dto_rejected() {
        let dto = GraphDto {
            nodes: vec![
                NodeDto {
                    id: "x".into(),
                    kind: NodeKind::Variable,
                    attributes: BTreeMap::new(),
                },
                NodeDto {
                    id: "y".into(),
                    kind: NodeKind::Variable,
                    attributes: BTreeMap::new(),
                },
            ],
            edges: vec![
                EdgeDto {
                    source: "x".into(),
                    target: "y".into(),
                    edge_type: EdgeType::DataFlow,
                    weight: None,
                },
                EdgeDto {
                    source: "y".into(),
                    target: "x".into(),
                    edge_type: EdgeType::DataFlow,
                    weight: None,
                },
            ],
        };
        assert!(matches!(
            CausalGraph::try_from(dto),
            Err(GraphBuildError::CycleDetected { .. })
        ));
    }
}
